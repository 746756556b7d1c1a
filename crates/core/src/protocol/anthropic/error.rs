use serde::{Deserialize, Serialize};

use crate::protocol::unknown_fields::UnknownFields;

pub const ERROR_TYPE_INVALID_REQUEST: &str = "invalid_request_error";
pub const ERROR_TYPE_API: &str = "api_error";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub request_id: Option<String>,

    pub error: Error,
}

/// Anthropic error payload surfaced for 4XX/5XX responses and `error` SSE events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    #[serde(rename = "type")]
    pub r#type: String,
    pub message: String,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

impl Error {
    pub(crate) fn new(r#type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            message: message.into(),
            unknown_fields: UnknownFields::default(),
        }
    }

    pub fn invalid_request_error(message: impl Into<String>) -> Self {
        Self::new(ERROR_TYPE_INVALID_REQUEST, message)
    }

    pub fn api_error(message: impl Into<String>) -> Self {
        Self::new(ERROR_TYPE_API, message)
    }
}
