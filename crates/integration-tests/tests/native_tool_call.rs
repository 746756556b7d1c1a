use std::time::Duration;

use integration_tests::{MockBackend, RelayHandle, Script, parse_sse_events};
use serde_json::json;

/// A tool call arriving through the native `tool_calls` delta field surfaces as a
/// `tool_use` content block whose `input_json_delta` fragments reassemble into the
/// arguments the backend sent.
#[tokio::test]
async fn native_tool_call_reassembles_into_tool_use_block() {
    let backend = MockBackend::start(Script::StreamChunks {
        chunks: vec![
            json!({
                "id": "chatcmpl-2", "model": "gpt-4",
                "choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "get_weather", "arguments": ""}}]}, "finish_reason": null}],
            }),
            json!({
                "id": "chatcmpl-2", "model": "gpt-4",
                "choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"city\":"}}]}, "finish_reason": null}],
            }),
            json!({
                "id": "chatcmpl-2", "model": "gpt-4",
                "choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "function": {"arguments": "\"NYC\"}"}}]}, "finish_reason": null}],
            }),
            json!({
                "id": "chatcmpl-2", "model": "gpt-4",
                "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}],
            }),
        ],
        gap: Duration::ZERO,
    })
    .await;

    let relay = RelayHandle::start(&backend.base_url).await;

    let response = relay
        .post_messages(&json!({
            "model": "gpt-4",
            "max_tokens": 256,
            "stream": true,
            "messages": [{"role": "user", "content": "What's the weather in NYC?"}],
            "tools": [{
                "name": "get_weather",
                "description": "Look up current weather for a city",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]},
            }],
        }))
        .await;

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    let events = parse_sse_events(&body);

    let start = events
        .iter()
        .find(|(name, _)| name == "content_block_start")
        .map(|(_, data)| data.clone())
        .unwrap();
    assert_eq!(start["content_block"]["type"], "tool_use");
    assert_eq!(start["content_block"]["name"], "get_weather");

    let partial_json: String = events
        .iter()
        .filter(|(name, _)| name == "content_block_delta")
        .filter_map(|(_, data)| data["delta"]["partial_json"].as_str())
        .collect();
    let arguments: serde_json::Value = serde_json::from_str(&partial_json).unwrap();
    assert_eq!(arguments, json!({"city": "NYC"}));

    let stop_reason = events
        .iter()
        .find(|(name, _)| name == "message_delta")
        .and_then(|(_, data)| data["delta"]["stop_reason"].as_str())
        .unwrap();
    assert_eq!(stop_reason, "tool_use");
}
