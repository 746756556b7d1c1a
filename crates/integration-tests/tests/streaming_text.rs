use std::time::Duration;

use integration_tests::{MockBackend, RelayHandle, Script, parse_sse_events};
use serde_json::json;

/// A plain text prompt streamed back in several chunks reconstructs into the same
/// text client-side, bracketed by `message_start` and `message_stop`.
#[tokio::test]
async fn simple_text_reply_streams_and_reassembles() {
    let backend = MockBackend::start(Script::StreamChunks {
        chunks: vec![
            json!({"id": "chatcmpl-1", "model": "gpt-4", "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]}),
            json!({"id": "chatcmpl-1", "model": "gpt-4", "choices": [{"index": 0, "delta": {"content": "Hello"}, "finish_reason": null}]}),
            json!({"id": "chatcmpl-1", "model": "gpt-4", "choices": [{"index": 0, "delta": {"content": ", world"}, "finish_reason": null}]}),
            json!({"id": "chatcmpl-1", "model": "gpt-4", "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
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
            "messages": [{"role": "user", "content": "Hi"}],
        }))
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("content-type").unwrap(), "text/event-stream");

    let body = response.text().await.unwrap();
    let events = parse_sse_events(&body);

    assert_eq!(events.first().unwrap().0, "message_start");
    assert_eq!(events.last().unwrap().0, "message_stop");

    let text: String = events
        .iter()
        .filter(|(name, _)| name == "content_block_delta")
        .filter_map(|(_, data)| data["delta"]["text"].as_str())
        .collect();
    assert_eq!(text, "Hello, world");

    let stop_reason = events
        .iter()
        .find(|(name, _)| name == "message_delta")
        .and_then(|(_, data)| data["delta"]["stop_reason"].as_str())
        .unwrap();
    assert_eq!(stop_reason, "end_turn");

    assert_eq!(backend.call_count(), 1);
}
