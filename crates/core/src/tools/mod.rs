//! Recognizes tool invocations that a backend emitted as plain text instead of a
//! structured `tool_calls` field. Backends vary widely in how they render tool syntax
//! when fine-tuned without native function-calling support; each dialect below covers
//! one of the shapes seen in the wild, tried strictest-to-loosest.

mod bare_json_fence;
mod bracketed;
mod named_function;
mod tagged_json;

use std::ops::Range;

use serde_json::Value;

/// A tool invocation recovered from free-form text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
    /// Byte range in the scanned buffer the match consumed, including its delimiters.
    pub consumed: Range<usize>,
}

/// One textual tool-call dialect. `find` scans the whole buffer and returns its
/// earliest well-formed match, or `None` if the dialect's syntax never appears (or
/// appears but fails to parse as JSON, in which case it must be skipped rather than
/// reported as a false match).
trait Dialect: Send + Sync {
    fn find(&self, buffer: &str) -> Option<ParsedToolCall>;
}

/// Chain of dialects in strictest-to-loosest order. The first dialect with a match
/// wins regardless of where in the buffer later dialects might also match.
pub struct DialectRegistry {
    dialects: Vec<Box<dyn Dialect>>,
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self {
            dialects: vec![
                Box::new(tagged_json::TaggedJson),
                Box::new(named_function::NamedFunction),
                Box::new(bracketed::Bracketed),
                Box::new(bare_json_fence::BareJsonFence),
            ],
        }
    }
}

impl DialectRegistry {
    pub fn scan(&self, buffer: &str) -> Option<ParsedToolCall> {
        self.dialects.iter().find_map(|dialect| dialect.find(buffer))
    }
}

/// Parses `text` as a JSON object and extracts `{name, arguments}`, the shape shared
/// by every textual dialect's payload.
fn parse_name_and_arguments(text: &str) -> Option<(String, Value)> {
    let value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let name = object.get("name")?.as_str()?.to_owned();
    let arguments = object.get("arguments")?.clone();
    Some((name, arguments))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_returns_none_on_empty_buffer() {
        assert_eq!(DialectRegistry::default().scan(""), None);
    }
}
