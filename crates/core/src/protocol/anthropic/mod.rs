//! The Anthropic Messages wire protocol: what the client sends and what we emit back.

mod error;
mod messages;

pub use error::{ERROR_TYPE_API, ERROR_TYPE_INVALID_REQUEST, Error, ErrorResponse};
pub use messages::*;
