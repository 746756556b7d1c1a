use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::unknown_fields::UnknownFields;

/// Content blocks returned in an assistant message.
///
/// Only `text`, `thinking`, and `tool_use` are emitted by the translator. Any other block
/// kind surfaced by a future backend is preserved as [`ResponseContent::Unknown`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseContent {
    Text(ResponseTextBlock),
    Thinking(ResponseThinkingBlock),
    ToolUse(ResponseToolUseBlock),

    #[serde(untagged)]
    Unknown(Value),
}

/// Text produced by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTextBlock {
    /// Raw assistant text generated for this block.
    pub text: String,
    /// Forward-compatible storage for unsupported properties.
    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Reasoning content surfaced when the backend reports a `reasoning_content` delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseThinkingBlock {
    /// Raw reasoning text emitted by the model.
    pub thinking: String,
    /// Forward-compatible storage for unsupported properties.
    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Tool invocation requested by the assistant within the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseToolUseBlock {
    /// Unique identifier assigned to the tool call.
    pub id: String,
    /// Tool input payload provided by the model.
    pub input: Value,
    /// Name of the tool being invoked.
    pub name: String,
    /// Forward-compatible storage for unsupported properties.
    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}
