use std::sync::LazyLock;

use regex::Regex;

use super::{Dialect, ParsedToolCall, parse_name_and_arguments};

/// `<tool_call>{"name": "...", "arguments": {...}}</tool_call>`
pub struct TaggedJson;

static PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tool_call>\s*(\{.*?\})\s*</tool_call>").expect("valid regex"));

impl Dialect for TaggedJson {
    fn find(&self, buffer: &str) -> Option<ParsedToolCall> {
        let found = PATTERN.captures(buffer)?;
        let whole = found.get(0)?;
        let (name, arguments) = parse_name_and_arguments(&found[1])?;

        Some(ParsedToolCall {
            name,
            arguments,
            consumed: whole.range(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_tagged_json_call() {
        let buffer = r#"Sure. <tool_call>{"name":"ls","arguments":{"path":"/"}}</tool_call>"#;
        let parsed = TaggedJson.find(buffer).unwrap();

        assert_eq!(parsed.name, "ls");
        assert_eq!(parsed.arguments, json!({"path": "/"}));
        assert_eq!(&buffer[parsed.consumed], r#"<tool_call>{"name":"ls","arguments":{"path":"/"}}</tool_call>"#);
    }

    #[test]
    fn ignores_buffer_without_tags() {
        assert!(TaggedJson.find("just some text").is_none());
    }
}
