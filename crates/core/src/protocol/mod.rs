//! Wire-protocol types for both sides of the translation: the Anthropic Messages
//! shape the client speaks, and the OpenAI Chat Completions shape the backend speaks.

pub mod anthropic;
pub mod openai;
pub mod unknown_fields;
