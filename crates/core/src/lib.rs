//! Translating reverse proxy core: accepts Anthropic Messages API requests and drives
//! them against an OpenAI Chat Completions-compatible backend.

use axum::{
    Router,
    routing::{get, post},
};

mod backend;
mod cache;
mod error;
mod http_client;
mod metrics;
pub mod protocol;
mod request_log;
mod server;
mod state;
mod stream;
mod tools;
mod trace;
mod translate;

pub use error::{RelayError, RelayResult};
pub use state::RelayState;

/// Builds the router exposing `/v1/messages`, `/v1/models`, `/health`, and `/metrics`.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/v1/messages", post(server::messages))
        .route("/v1/models", get(server::models))
        .route("/health", get(server::health))
        .route("/metrics", get(server::metrics))
        .with_state(state)
}
