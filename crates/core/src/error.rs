use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::protocol::anthropic;

pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Errors that can surface while handling a single proxied request.
///
/// Every variant maps to an HTTP status code and an Anthropic error `type` so the
/// client always receives a shape it already knows how to parse, regardless of
/// which side of the translation the failure occurred on.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The client's request could not be translated: malformed JSON, a missing
    /// required field, or a tool/content shape we don't understand.
    #[error("invalid request: {0}")]
    ClientInput(String),

    /// The backend could not be reached at all (connection refused, DNS failure, TLS
    /// error) or returned a response we cannot interpret as a chat completion.
    #[error("backend unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The backend responded but the response violates the OpenAI wire contract we
    /// rely on (malformed JSON body, unparseable SSE frame).
    #[error("backend returned an invalid response: {0}")]
    UpstreamProtocol(String),

    /// The backend did not produce a terminal event before the watchdog bound.
    #[error("backend request timed out")]
    Timeout,

    /// The client disconnected before the backend finished responding.
    #[error("request cancelled by client")]
    Cancelled,

    /// An invariant inside the relay itself was violated. Never attributable to the
    /// client or the backend.
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientInput(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable(_) | Self::UpstreamProtocol(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ClientInput(_) => anthropic::ERROR_TYPE_INVALID_REQUEST,
            Self::UpstreamUnavailable(_) | Self::UpstreamProtocol(_) | Self::Timeout | Self::Internal(_) => {
                anthropic::ERROR_TYPE_API
            }
            Self::Cancelled => anthropic::ERROR_TYPE_INVALID_REQUEST,
        }
    }

    /// Message safe to expose to API consumers. Internal errors never leak their
    /// cause; everything else is already phrased for a client audience.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_owned(),
            other => other.to_string(),
        }
    }
}

impl From<RelayError> for anthropic::ErrorResponse {
    fn from(error: RelayError) -> Self {
        anthropic::ErrorResponse {
            request_id: None,
            error: anthropic::Error::new(error.error_type(), error.client_message()),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = anthropic::ErrorResponse::from(self);

        (status, Json(body)).into_response()
    }
}
