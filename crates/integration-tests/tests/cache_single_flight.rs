use std::time::Duration;

use integration_tests::{MockBackend, RelayHandle, Script};
use serde_json::json;

/// Two concurrent, fingerprint-identical cache-eligible requests coalesce into a
/// single upstream call: the second caller waits on the first's in-flight
/// computation instead of triggering its own.
#[tokio::test]
async fn concurrent_identical_requests_share_one_upstream_call() {
    let backend = MockBackend::start(Script::DelayedResponse {
        delay: Duration::from_millis(150),
        body: json!({
            "id": "chatcmpl-6",
            "model": "gpt-4",
            "choices": [{"index": 0, "message": {"content": "4"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 1},
        }),
    })
    .await;

    let relay = RelayHandle::start_with(&backend.base_url, |overrides| {
        overrides.cache_max_bytes = Some(1_000_000);
    })
    .await;

    let request = json!({
        "model": "gpt-4",
        "max_tokens": 100,
        "system": [{"type": "text", "text": "You are helpful.", "cache_control": {"type": "ephemeral"}}],
        "messages": [{"role": "user", "content": "What is 2+2?"}],
    });

    let (first, second) = tokio::join!(relay.post_messages(&request), relay.post_messages(&request));

    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);

    let first_body: serde_json::Value = first.json().await.unwrap();
    let second_body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(first_body["content"], second_body["content"]);

    assert_eq!(backend.call_count(), 1, "both callers should have shared the one upstream call");

    let metrics = relay.metrics().await;
    assert!(metrics["cache_misses"].as_u64().unwrap() >= 1);
    assert!(metrics["cache_hits"].as_u64().unwrap() >= 1);
    assert!(metrics["cache_stores"].as_u64().unwrap() >= 1);
}
