//! Test doubles and harness helpers shared by the end-to-end scenario tests.
//!
//! [`MockBackend`] stands in for the OpenAI-compatible upstream; [`RelayHandle`]
//! boots the relay itself against an ephemeral port. Both are plain Tokio tasks
//! bound to `127.0.0.1:0`, so tests can run concurrently without port clashes.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Sse, sse::Event},
    routing::post,
};
use futures::StreamExt;
use relay_config::{Config, ConfigOverrides};
use serde_json::Value;
use tokio::net::TcpListener;

/// Canned behavior a [`MockBackend`] replays for every `/v1/chat/completions` call.
#[derive(Clone)]
pub enum Script {
    /// A single non-streaming JSON response body.
    Response(Value),
    /// A non-streaming response delivered after an artificial delay, used to widen
    /// the race window for single-flight coalescing tests.
    DelayedResponse { delay: Duration, body: Value },
    /// A sequence of OpenAI `chat.completion.chunk` payloads, each preceded by
    /// `gap`, followed by the usual `[DONE]` sentinel.
    StreamChunks { chunks: Vec<Value>, gap: Duration },
}

struct Inner {
    script: Script,
    calls: AtomicUsize,
}

/// A spawned OpenAI-compatible backend double.
pub struct MockBackend {
    pub base_url: String,
    inner: Arc<Inner>,
}

impl MockBackend {
    pub async fn start(script: Script) -> Self {
        let inner = Arc::new(Inner {
            script,
            calls: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .with_state(inner.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock backend");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock backend crashed");
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        Self {
            base_url: format!("http://{addr}/v1"),
            inner,
        }
    }

    /// Number of `/v1/chat/completions` calls observed so far.
    pub fn call_count(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

async fn chat_completions(State(inner): State<Arc<Inner>>, Json(request): Json<Value>) -> axum::response::Response {
    inner.calls.fetch_add(1, Ordering::SeqCst);
    let streaming = request.get("stream").and_then(Value::as_bool).unwrap_or(false);

    match &inner.script {
        Script::Response(body) => Json(body.clone()).into_response(),
        Script::DelayedResponse { delay, body } => {
            tokio::time::sleep(*delay).await;
            Json(body.clone()).into_response()
        }
        Script::StreamChunks { chunks, gap } => {
            assert!(streaming, "StreamChunks script was sent a non-streaming request");

            let mut payloads: Vec<String> = chunks.iter().map(|c| serde_json::to_string(c).expect("chunk serializes")).collect();
            payloads.push("[DONE]".to_owned());

            let gap = *gap;
            let events = futures::stream::iter(payloads).then(move |data| async move {
                if gap > Duration::ZERO {
                    tokio::time::sleep(gap).await;
                }
                Ok::<_, std::convert::Infallible>(Event::default().data(data))
            });

            Sse::new(events).into_response()
        }
    }
}

/// A running relay instance, pointed at a [`MockBackend`] (or any other base URL).
pub struct RelayHandle {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl RelayHandle {
    pub async fn start(backend_base_url: &str) -> Self {
        Self::start_with(backend_base_url, |_| {}).await
    }

    pub async fn start_with(backend_base_url: &str, configure: impl FnOnce(&mut ConfigOverrides)) -> Self {
        let mut overrides = ConfigOverrides {
            backend_base_url: Some(backend_base_url.to_owned()),
            backend_api_key: Some("test-key".to_owned()),
            ..Default::default()
        };
        configure(&mut overrides);

        let config = Config::load(None, &overrides).expect("valid test configuration");
        let state = relay_core::RelayState::new(config).expect("relay state");
        let router = relay_core::router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("relay crashed");
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    pub async fn post_messages(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .json(body)
            .send()
            .await
            .expect("request reaches the relay")
    }

    pub async fn metrics(&self) -> Value {
        self.client
            .get(format!("{}/metrics", self.base_url))
            .send()
            .await
            .expect("metrics endpoint reachable")
            .json()
            .await
            .expect("metrics body is JSON")
    }
}

/// Splits a complete SSE body into `(event, data)` pairs, skipping comment-only
/// blocks (keepalive pings) since they carry no `data:` field.
pub fn parse_sse_events(body: &str) -> Vec<(String, Value)> {
    let mut out = Vec::new();

    for block in body.split("\n\n") {
        let mut event = String::from("message");
        let mut data_lines = Vec::new();

        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                event = rest.trim().to_owned();
            } else if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.trim().to_owned());
            }
        }

        if data_lines.is_empty() {
            continue;
        }
        if let Ok(data) = serde_json::from_str(&data_lines.join("\n")) {
            out.push((event, data));
        }
    }

    out
}

/// Reads `response`'s body for up to `budget`, returning whatever text arrived.
/// Used for streams whose backend deliberately never finishes within the test.
pub async fn read_body_for(response: reqwest::Response, budget: Duration) -> String {
    let mut text = String::new();
    let mut stream = response.bytes_stream();
    let deadline = tokio::time::Instant::now() + budget;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Some(Ok(chunk))) => text.push_str(&String::from_utf8_lossy(&chunk)),
            _ => break,
        }
    }

    text
}
