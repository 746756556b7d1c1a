use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::unknown_fields::UnknownFields;

use super::cache_control::CacheControl;

/// A single input message provided to the Anthropic API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputMessage {
    /// Originating role for the message turn.
    pub role: Role,
    /// Message body provided as text or structured blocks.
    pub content: InputMessageContent,

    /// Extra message fields passed through untouched.
    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Supported Anthropic message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content may be provided as a bare string or as structured content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InputMessageContent {
    Text(String),
    Items(Vec<InputMessageStructuredContent>),
}

/// Structured content blocks accepted on request messages.
///
/// Only `text`, `image`, `tool_use` and `tool_result` are modeled explicitly; any other block
/// kind Anthropic may send is preserved verbatim via [`InputMessageStructuredContent::Unknown`]
/// so the request round-trips instead of failing to deserialize.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputMessageStructuredContent {
    Text(RequestTextBlock),
    Image(RequestImageBlock),
    ToolUse(RequestToolUseBlock),
    ToolResult(RequestToolResultBlock),
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestTextBlock {
    pub text: String,

    #[serde(default)]
    pub cache_control: Option<CacheControl>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Image content block. `source` is forwarded opaquely to the backend translator, which
/// decides whether to pass it through or stub it with placeholder text.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestImageBlock {
    pub source: Value,

    #[serde(default)]
    pub cache_control: Option<CacheControl>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestToolUseBlock {
    pub id: String,
    pub input: Value,
    pub name: String,

    #[serde(default)]
    pub cache_control: Option<CacheControl>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestToolResultBlock {
    pub tool_use_id: String,

    #[serde(default)]
    pub content: Option<Value>,

    #[serde(default)]
    pub is_error: Option<bool>,

    #[serde(default)]
    pub cache_control: Option<CacheControl>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}
