//! Translates an inbound Anthropic Messages request into the OpenAI Chat Completions
//! shape the backend speaks, and computes the fingerprint used for request caching.

use std::collections::HashSet;

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::{
    error::RelayError,
    protocol::{
        anthropic::{self, InputMessageContent, InputMessageStructuredContent, Role, SystemInputMessage, SystemPrompt},
        openai,
    },
};

/// A 256-bit digest over the cache-relevant portion of a request. `cache_control`
/// placement never changes this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn to_hex(self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

/// Cache-marked segments discovered while translating, used to decide cache
/// eligibility and to estimate token counts for accounting.
#[derive(Debug, Clone, Default)]
pub struct ExtractedCacheInfo {
    pub cache_eligible: bool,
    pub cached_segment_bytes: usize,
    pub estimated_tokens: usize,
}

pub struct Translation {
    pub request: openai::Request,
    pub fingerprint: Fingerprint,
    pub cache_info: ExtractedCacheInfo,
}

/// ~4 characters per token, used only where the backend doesn't report real usage.
const CHARS_PER_TOKEN: usize = 4;

pub fn translate(request: &anthropic::Request) -> Result<Translation, RelayError> {
    if request.messages.is_empty() {
        return Err(RelayError::ClientInput("messages must not be empty".to_owned()));
    }

    let mut cache_info = ExtractedCacheInfo::default();

    let system_text = extract_system_text(request.system.as_ref(), &mut cache_info);

    let mut messages = Vec::new();
    if let Some(text) = &system_text {
        messages.push(openai::Message {
            role: "system".to_owned(),
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    let mut known_tool_use_ids = HashSet::new();
    for message in &request.messages {
        translate_message(message, &mut known_tool_use_ids, &mut cache_info, &mut messages)?;
    }

    let tools = request
        .tools
        .as_ref()
        .map(|tools| translate_tools(tools))
        .transpose()?;
    let tool_choice = request.tool_choice.as_ref().map(translate_tool_choice);
    let streaming = request.stream.unwrap_or(false);

    let openai_request = openai::Request {
        model: request.model.clone(),
        messages,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone(),
        stream: request.stream,
        stream_options: streaming.then_some(openai::StreamOptions { include_usage: true }),
        tools,
        tool_choice,
    };

    cache_info.estimated_tokens = cache_info.cached_segment_bytes / CHARS_PER_TOKEN;
    let fingerprint = compute_fingerprint(system_text.as_deref(), request.tools.as_deref(), &request.messages);

    Ok(Translation {
        request: openai_request,
        fingerprint,
        cache_info,
    })
}

fn extract_system_text(system: Option<&SystemPrompt>, cache_info: &mut ExtractedCacheInfo) -> Option<String> {
    let system = system?;

    let text = match system {
        SystemPrompt::Text(text) => text.clone(),
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                SystemInputMessage::Text(text_block) => {
                    if text_block.cache_control.is_some() {
                        cache_info.cache_eligible = true;
                    }
                    Some(text_block.text.as_str())
                }
                SystemInputMessage::Unknown(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };

    cache_info.cached_segment_bytes += text.len();
    Some(text)
}

fn translate_message(
    message: &anthropic::InputMessage,
    known_tool_use_ids: &mut HashSet<String>,
    cache_info: &mut ExtractedCacheInfo,
    out: &mut Vec<openai::Message>,
) -> Result<(), RelayError> {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let items = match &message.content {
        InputMessageContent::Text(text) => {
            out.push(openai::Message {
                role: role.to_owned(),
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
            return Ok(());
        }
        InputMessageContent::Items(items) => items,
    };

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for item in items {
        match item {
            InputMessageStructuredContent::Text(block) => {
                if block.cache_control.is_some() {
                    cache_info.cache_eligible = true;
                }
                cache_info.cached_segment_bytes += block.text.len();
                text_parts.push(block.text.clone());
            }
            InputMessageStructuredContent::Image(block) => {
                if block.cache_control.is_some() {
                    cache_info.cache_eligible = true;
                }
                text_parts.push("[image]".to_owned());
            }
            InputMessageStructuredContent::ToolUse(block) => {
                if block.cache_control.is_some() {
                    cache_info.cache_eligible = true;
                }
                known_tool_use_ids.insert(block.id.clone());
                let arguments = serde_json::to_string(&block.input).unwrap_or_default();
                cache_info.cached_segment_bytes += arguments.len();
                tool_calls.push(openai::ToolCall {
                    id: block.id.clone(),
                    r#type: openai::ToolType::Function,
                    function: openai::FunctionCall {
                        name: block.name.clone(),
                        arguments,
                    },
                });
            }
            InputMessageStructuredContent::ToolResult(block) => {
                if block.cache_control.is_some() {
                    cache_info.cache_eligible = true;
                }
                if !known_tool_use_ids.contains(&block.tool_use_id) {
                    return Err(RelayError::ClientInput(format!(
                        "dangling_tool_result: tool_result references unknown tool_use id '{}'",
                        block.tool_use_id
                    )));
                }
                let content = match &block.content {
                    Some(Value::String(text)) => text.clone(),
                    Some(value) => value.to_string(),
                    None => String::new(),
                };
                cache_info.cached_segment_bytes += content.len();
                tool_results.push((block.tool_use_id.clone(), content));
            }
            InputMessageStructuredContent::Unknown(_) => {}
        }
    }

    if !tool_results.is_empty() {
        if !text_parts.is_empty() {
            out.push(openai::Message {
                role: role.to_owned(),
                content: Some(text_parts.join("\n")),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
        for (tool_call_id, content) in tool_results {
            out.push(openai::Message {
                role: "tool".to_owned(),
                content: Some(content),
                tool_calls: None,
                tool_call_id: Some(tool_call_id),
                name: None,
            });
        }
        return Ok(());
    }

    out.push(openai::Message {
        role: role.to_owned(),
        content: if text_parts.is_empty() { None } else { Some(text_parts.join("\n")) },
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
        name: None,
    });

    Ok(())
}

fn translate_tools(tools: &[anthropic::Tool]) -> Result<Vec<openai::Tool>, RelayError> {
    tools
        .iter()
        .map(|tool| {
            let parameters = adapt_schema(&tool.input_schema);

            Ok(openai::Tool {
                r#type: openai::ToolType::Function,
                function: openai::FunctionDef {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Box::new(parameters),
                },
            })
        })
        .collect()
}

fn translate_tool_choice(choice: &anthropic::ToolChoice) -> openai::ToolChoice {
    match choice {
        anthropic::ToolChoice::Auto { .. } => openai::ToolChoice::Mode("auto".to_owned()),
        anthropic::ToolChoice::Any { .. } => openai::ToolChoice::Mode("required".to_owned()),
        anthropic::ToolChoice::None { .. } => openai::ToolChoice::Mode("none".to_owned()),
        anthropic::ToolChoice::Tool { name, .. } => openai::ToolChoice::Named {
            r#type: openai::ToolType::Function,
            function: openai::NamedFunction { name: name.clone() },
        },
        anthropic::ToolChoice::Unknown(_) => openai::ToolChoice::Mode("auto".to_owned()),
    }
}

/// Strips keywords the backend's schema dialect rejects and normalizes a couple of
/// shapes OpenAI-compatible function calling doesn't accept. Applied recursively
/// since nested object/array schemas can carry the same offending keywords; the
/// `oneOf`/`anyOf` rewrite only applies at the root, per the root parameter shape
/// function calling actually validates against.
fn adapt_schema(schema: &Value) -> Value {
    let mut schema = strip_unsupported_keywords(schema);

    if let Value::Object(object) = &mut schema {
        if let Some(one_of) = object.remove("oneOf") {
            object.insert("anyOf".to_owned(), one_of);
        }
    }

    schema
}

fn strip_unsupported_keywords(schema: &Value) -> Value {
    match schema {
        Value::Object(object) => {
            let mut out = serde_json::Map::new();
            for (key, value) in object {
                if key == "$schema" {
                    continue;
                }
                if key == "additionalProperties" && value == &Value::Bool(false) {
                    continue;
                }
                if key == "type" {
                    if let Value::Array(variants) = value {
                        let first = variants.iter().find(|v| v.as_str() != Some("null")).cloned();
                        out.insert(key.clone(), first.unwrap_or_else(|| json!("object")));
                        continue;
                    }
                }
                out.insert(key.clone(), strip_unsupported_keywords(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_unsupported_keywords).collect()),
        other => other.clone(),
    }
}

fn compute_fingerprint(system_text: Option<&str>, tools: Option<&[anthropic::Tool]>, messages: &[anthropic::InputMessage]) -> Fingerprint {
    let mut tool_defs: Vec<Value> = tools
        .unwrap_or_default()
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema.as_ref(),
            })
        })
        .collect();
    tool_defs.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    let messages_normalized: Vec<Value> = messages.iter().map(normalize_message_for_fingerprint).collect();

    let canonical = json!({
        "system_text": system_text,
        "tools": tool_defs,
        "messages": messages_normalized,
    });

    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);

    Fingerprint(out)
}

/// Drops `cache_control` so fingerprints are stable regardless of where callers
/// place cache markers.
fn normalize_message_for_fingerprint(message: &anthropic::InputMessage) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let content = match &message.content {
        InputMessageContent::Text(text) => json!(text),
        InputMessageContent::Items(items) => {
            let blocks: Vec<Value> = items
                .iter()
                .map(|item| {
                    let mut value = serde_json::to_value(item).unwrap_or(Value::Null);
                    if let Value::Object(object) = &mut value {
                        object.remove("cache_control");
                    }
                    value
                })
                .collect();
            json!(blocks)
        }
    };

    json!({"role": role, "content": content})
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn parse(body: &str) -> anthropic::Request {
        serde_json::from_str(body).expect("valid request fixture")
    }

    #[test]
    fn translates_simple_text_message() {
        let request = parse(indoc! {r#"
            {"model":"m","max_tokens":10,"messages":[{"role":"user","content":"hi"}]}
        "#});

        let translation = translate(&request).unwrap();
        assert_eq!(translation.request.messages.len(), 1);
        assert_eq!(translation.request.messages[0].role, "user");
        assert_eq!(translation.request.messages[0].content.as_deref(), Some("hi"));
    }

    #[test]
    fn system_prompt_becomes_leading_system_message() {
        let request = parse(indoc! {r#"
            {"model":"m","max_tokens":10,"system":"be nice","messages":[{"role":"user","content":"hi"}]}
        "#});

        let translation = translate(&request).unwrap();
        assert_eq!(translation.request.messages[0].role, "system");
        assert_eq!(translation.request.messages[0].content.as_deref(), Some("be nice"));
    }

    #[test]
    fn rejects_empty_messages() {
        let request = parse(r#"{"model":"m","max_tokens":10,"messages":[]}"#);
        assert!(matches!(translate(&request), Err(RelayError::ClientInput(_))));
    }

    #[test]
    fn dangling_tool_result_is_rejected() {
        let request = parse(indoc! {r#"
            {
                "model":"m","max_tokens":10,
                "messages":[
                    {"role":"user","content":[{"type":"tool_result","tool_use_id":"missing","content":"x"}]}
                ]
            }
        "#});

        assert!(matches!(translate(&request), Err(RelayError::ClientInput(_))));
    }

    #[test]
    fn tool_use_then_tool_result_round_trips_ids() {
        let request = parse(indoc! {r#"
            {
                "model":"m","max_tokens":10,
                "messages":[
                    {"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"search","input":{"q":"cats"}}]},
                    {"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}
                ]
            }
        "#});

        let translation = translate(&request).unwrap();
        assert_eq!(translation.request.messages[0].tool_calls.as_ref().unwrap()[0].id, "t1");
        assert_eq!(translation.request.messages[1].role, "tool");
        assert_eq!(translation.request.messages[1].tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn fingerprint_is_stable_across_cache_control_placement() {
        let with_cache = parse(indoc! {r#"
            {"model":"m","max_tokens":10,"messages":[{"role":"user","content":[{"type":"text","text":"hi","cache_control":{"type":"ephemeral"}}]}]}
        "#});
        let without_cache = parse(indoc! {r#"
            {"model":"m","max_tokens":10,"messages":[{"role":"user","content":[{"type":"text","text":"hi"}]}]}
        "#});

        let a = translate(&with_cache).unwrap();
        let b = translate(&without_cache).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert!(a.cache_info.cache_eligible);
        assert!(!b.cache_info.cache_eligible);
    }

    #[test]
    fn schema_adapter_strips_schema_keyword_and_false_additional_properties() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {"q": {"type": ["string", "null"]}}
        });

        let adapted = adapt_schema(&schema);
        assert!(adapted.get("$schema").is_none());
        assert!(adapted.get("additionalProperties").is_none());
        assert_eq!(adapted["properties"]["q"]["type"], json!("string"));
    }
}
