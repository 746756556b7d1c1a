use integration_tests::{MockBackend, RelayHandle, Script};
use serde_json::json;

/// A backend that never uses the native `tool_calls` field but emits a recognized
/// textual tool-call dialect inline still produces a `tool_use` block, with the
/// surrounding prose preserved as a separate text block.
#[tokio::test]
async fn inline_tagged_json_dialect_becomes_tool_use_block() {
    let backend = MockBackend::start(Script::Response(json!({
        "id": "chatcmpl-3",
        "model": "gpt-4",
        "choices": [{
            "index": 0,
            "message": {"content": "Sure. <tool_call>{\"name\":\"ls\",\"arguments\":{\"path\":\"/\"}}</tool_call>"},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 8},
    })))
    .await;

    let relay = RelayHandle::start(&backend.base_url).await;

    let response = relay
        .post_messages(&json!({
            "model": "gpt-4",
            "max_tokens": 256,
            "messages": [{"role": "user", "content": "list the root directory"}],
        }))
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();

    let blocks = body["content"].as_array().unwrap();
    let text_block = blocks.iter().find(|b| b["type"] == "text").unwrap();
    assert_eq!(text_block["text"], "Sure. ");

    let tool_block = blocks.iter().find(|b| b["type"] == "tool_use").unwrap();
    assert_eq!(tool_block["name"], "ls");
    assert_eq!(tool_block["input"], json!({"path": "/"}));

    assert_eq!(body["stop_reason"], "tool_use");
}
