use std::{sync::OnceLock, time::Duration};

use reqwest::Client;

fn default_http_client_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        // No overall request timeout: local inference backends can take minutes to
        // produce a first token, and the per-request watchdog in `server` already
        // bounds time to a terminal event independently of the transport.
        .pool_idle_timeout(Some(Duration::from_secs(30)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
}

/// Shared client so outbound connections to the backend are pooled across requests.
pub(crate) fn http_client() -> reqwest::Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| default_http_client_builder().build().expect("failed to build default HTTP client"))
        .clone()
}
