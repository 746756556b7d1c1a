use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{Dialect, ParsedToolCall};

/// `[TOOL_CALLS] name({…json…})`
pub struct Bracketed;

static PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[TOOL_CALLS\]\s*([A-Za-z0-9_]+)\((\{.*?\})\)").expect("valid regex"));

impl Dialect for Bracketed {
    fn find(&self, buffer: &str) -> Option<ParsedToolCall> {
        let found = PATTERN.captures(buffer)?;
        let whole = found.get(0)?;
        let name = found[1].to_owned();
        let arguments: Value = serde_json::from_str(&found[2]).ok()?;

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
    fn parses_bracketed_call() {
        let buffer = r#"[TOOL_CALLS] ls({"path":"/"})"#;
        let parsed = Bracketed.find(buffer).unwrap();

        assert_eq!(parsed.name, "ls");
        assert_eq!(parsed.arguments, json!({"path": "/"}));
    }
}
