use serde::{Deserialize, Serialize};

use crate::protocol::unknown_fields::UnknownFields;

use super::{ResponseContent, Role};

/// Non-streaming response body for the Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: ResponseType,
    pub role: Role,
    pub content: Vec<ResponseContent>,
    pub model: String,

    #[serde(default)]
    pub stop_reason: Option<StopReason>,

    #[serde(default)]
    pub stop_sequence: Option<String>,

    pub usage: Usage,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Message,
}

/// Reason generation stopped, translated from the backend's `finish_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

/// Token accounting for a completed message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A single entry in the `/v1/models` listing, echoing the backend's model catalog
/// in the shape Anthropic clients expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: ModelType,
    pub display_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<Model>,
    pub has_more: bool,

    #[serde(default)]
    pub first_id: Option<String>,

    #[serde(default)]
    pub last_id: Option<String>,
}
