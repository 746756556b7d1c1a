use std::time::Duration;

use futures::StreamExt;
use integration_tests::{MockBackend, RelayHandle, Script};
use serde_json::json;

/// Dropping the client connection mid-stream is recorded as a cancelled request,
/// not an upstream error or a success.
#[tokio::test]
async fn client_disconnect_mid_stream_is_recorded_as_cancelled() {
    let backend = MockBackend::start(Script::StreamChunks {
        chunks: vec![
            json!({"id": "chatcmpl-5", "model": "gpt-4", "choices": [{"index": 0, "delta": {"content": "one "}, "finish_reason": null}]}),
            json!({"id": "chatcmpl-5", "model": "gpt-4", "choices": [{"index": 0, "delta": {"content": "two "}, "finish_reason": null}]}),
            json!({"id": "chatcmpl-5", "model": "gpt-4", "choices": [{"index": 0, "delta": {"content": "three"}, "finish_reason": null}]}),
            json!({"id": "chatcmpl-5", "model": "gpt-4", "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
        ],
        gap: Duration::from_millis(80),
    })
    .await;

    let relay = RelayHandle::start(&backend.base_url).await;

    let response = relay
        .post_messages(&json!({
            "model": "gpt-4",
            "max_tokens": 256,
            "stream": true,
            "messages": [{"role": "user", "content": "count slowly"}],
        }))
        .await;
    assert_eq!(response.status(), 200);

    let mut stream = response.bytes_stream();
    assert!(stream.next().await.is_some(), "expected at least the message_start frame");
    drop(stream);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let metrics = relay.metrics().await;
    assert!(metrics["requests_total"]["cancelled"].as_u64().unwrap() >= 1);
}
