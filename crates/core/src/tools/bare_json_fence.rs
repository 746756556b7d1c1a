use std::sync::LazyLock;

use regex::Regex;

use super::{Dialect, ParsedToolCall, parse_name_and_arguments};

/// A fenced code block whose top-level JSON object has `name` and `arguments` keys,
/// with no surrounding tag syntax at all. The loosest dialect: tried last.
pub struct BareJsonFence;

static PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex"));

impl Dialect for BareJsonFence {
    fn find(&self, buffer: &str) -> Option<ParsedToolCall> {
        for found in PATTERN.captures_iter(buffer) {
            let Some((name, arguments)) = parse_name_and_arguments(&found[1]) else {
                continue;
            };
            let whole = found.get(0).expect("group 0 always matches");

            return Some(ParsedToolCall {
                name,
                arguments,
                consumed: whole.range(),
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_bare_json_fence() {
        let buffer = "```json\n{\"name\":\"ls\",\"arguments\":{\"path\":\"/\"}}\n```";
        let parsed = BareJsonFence.find(buffer).unwrap();

        assert_eq!(parsed.name, "ls");
        assert_eq!(parsed.arguments, json!({"path": "/"}));
    }

    #[test]
    fn skips_fences_that_are_not_tool_calls() {
        let buffer = "```json\n{\"foo\":\"bar\"}\n```";
        assert!(BareJsonFence.find(buffer).is_none());
    }
}
