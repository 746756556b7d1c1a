use std::time::Duration;

use integration_tests::{MockBackend, RelayHandle, Script, read_body_for};
use serde_json::json;

/// A backend that never sends its first chunk still produces keepalive comments
/// while waiting, and the stream is force-finished once the terminal watchdog
/// fires rather than hanging forever.
#[tokio::test]
async fn keepalive_comments_then_watchdog_closes_the_stream() {
    let backend = MockBackend::start(Script::StreamChunks {
        chunks: vec![json!({
            "id": "chatcmpl-4", "model": "gpt-4",
            "choices": [{"index": 0, "delta": {"content": "too late"}, "finish_reason": "stop"}],
        })],
        gap: Duration::from_secs(5),
    })
    .await;

    let relay = RelayHandle::start_with(&backend.base_url, |overrides| {
        overrides.keepalive_interval_ms = Some(30);
        overrides.terminal_watchdog_ms = Some(150);
    })
    .await;

    let response = relay
        .post_messages(&json!({
            "model": "gpt-4",
            "max_tokens": 256,
            "stream": true,
            "messages": [{"role": "user", "content": "take your time"}],
        }))
        .await;

    assert_eq!(response.status(), 200);

    let body = read_body_for(response, Duration::from_millis(800)).await;
    assert!(body.contains(": keepalive"), "expected at least one keepalive comment, got: {body}");
    assert!(body.contains("event: message_stop"), "expected the watchdog to force a message_stop, got: {body}");

    let metrics = relay.metrics().await;
    assert!(metrics["stream_watchdog_fires"].as_u64().unwrap() >= 1);
    assert!(metrics["requests_total"]["timeout"].as_u64().unwrap() >= 1);
}
