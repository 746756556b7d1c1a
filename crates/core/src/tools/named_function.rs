use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{Dialect, ParsedToolCall};

/// `<function=name>{…json…}</function>`
pub struct NamedFunction;

static PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<function=([A-Za-z0-9_]+)>\s*(\{.*?\})\s*</function>").expect("valid regex"));

impl Dialect for NamedFunction {
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
    fn parses_named_function_call() {
        let buffer = r#"<function=search>{"q":"cats"}</function>"#;
        let parsed = NamedFunction.find(buffer).unwrap();

        assert_eq!(parsed.name, "search");
        assert_eq!(parsed.arguments, json!({"q": "cats"}));
    }
}
