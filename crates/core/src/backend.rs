//! Outbound calls to the single configured OpenAI-compatible backend: streaming and
//! non-streaming chat completions, and a model listing used for `/v1/models`
//! passthrough.

use std::sync::atomic::{AtomicBool, Ordering};

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::{error::RelayError, http_client::http_client, protocol::openai};

pub struct Backend {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    last_reachable: AtomicBool,
}

impl Backend {
    pub fn new(config: &relay_config::Config) -> Self {
        Self {
            client: http_client(),
            base_url: config.backend_base_url.clone(),
            api_key: config.backend_api_key.clone(),
            last_reachable: AtomicBool::new(true),
        }
    }

    /// Most recently observed TCP/TLS-level reachability of the backend, used for the
    /// `/health` endpoint's `backend_ok` field. Not an active poll.
    pub fn last_known_reachable(&self) -> bool {
        self.last_reachable.load(Ordering::Relaxed)
    }

    fn request_builder(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path);
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        builder
    }

    fn record_reachability(&self, reached: bool) {
        self.last_reachable.store(reached, Ordering::Relaxed);
    }

    pub async fn chat_completions(&self, request: &openai::Request) -> Result<openai::Response, RelayError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| RelayError::ClientInput(format!("failed to serialize backend request: {e}")))?;

        let response = self
            .request_builder(Method::POST, "chat/completions")
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .inspect(|_| self.record_reachability(true))
            .map_err(|e| {
                self.record_reachability(false);
                RelayError::UpstreamUnavailable(e.to_string())
            })?;

        let response = ensure_success(response).await?;

        let text = response
            .text()
            .await
            .map_err(|e| RelayError::UpstreamProtocol(format!("failed to read backend response body: {e}")))?;

        serde_json::from_str(&text).map_err(|e| RelayError::UpstreamProtocol(format!("malformed backend response: {e}")))
    }

    pub async fn chat_completions_stream(
        &self,
        request: &openai::Request,
    ) -> Result<impl Stream<Item = Result<openai::StreamChunk, RelayError>>, RelayError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| RelayError::ClientInput(format!("failed to serialize backend request: {e}")))?;

        let response = self
            .request_builder(Method::POST, "chat/completions")
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .inspect(|_| self.record_reachability(true))
            .map_err(|e| {
                self.record_reachability(false);
                RelayError::UpstreamUnavailable(e.to_string())
            })?;

        let response = ensure_success(response).await?;

        let events = response.bytes_stream().eventsource().filter_map(|event| async move {
            let event = match event {
                Ok(event) => event,
                Err(e) => return Some(Err(RelayError::UpstreamProtocol(format!("malformed SSE frame: {e}")))),
            };

            if event.data == "[DONE]" {
                return None;
            }

            match serde_json::from_str::<openai::StreamChunk>(&event.data) {
                Ok(chunk) => Some(Ok(chunk)),
                Err(e) => Some(Err(RelayError::UpstreamProtocol(format!("malformed backend chunk: {e}")))),
            }
        });

        Ok(events)
    }

    pub async fn list_models(&self) -> Result<openai::ModelsResponse, RelayError> {
        let response = self
            .request_builder(Method::GET, "models")
            .send()
            .await
            .inspect(|_| self.record_reachability(true))
            .map_err(|e| {
                self.record_reachability(false);
                RelayError::UpstreamUnavailable(e.to_string())
            })?;

        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|e| RelayError::UpstreamProtocol(format!("malformed models response: {e}")))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(RelayError::UpstreamProtocol(format!("backend responded {status}: {body}")))
}
