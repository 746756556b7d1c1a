use std::{convert::Infallible, time::Duration, time::Instant};

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response as AxumResponse, Sse, sse::Event},
};
use axum_serde::Sonic;
use futures::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    error::RelayError,
    metrics::Outcome,
    protocol::{anthropic, openai},
    request_log::RequestLogEntry,
    state::RelayState,
    stream::{FinishReason, StreamTransformer, UpstreamChunk, normalize},
    translate,
};

/// `RequestLogEntry.backend_id` anticipates multi-backend routing, which this proxy
/// doesn't implement, so it is always this constant.
const BACKEND_ID: &str = "default";

pub async fn messages(State(state): State<RelayState>, Sonic(request): Sonic<anthropic::Request>) -> Result<AxumResponse, RelayError> {
    let translation = translate::translate(&request)?;
    let request_id = format!("msg_{}", Uuid::new_v4().simple());

    if request.stream.unwrap_or(false) {
        Ok(stream_response(state, request, translation, request_id).into_response())
    } else {
        non_streaming_response(state, request, translation, request_id).await
    }
}

async fn non_streaming_response(
    state: RelayState,
    request: anthropic::Request,
    translation: translate::Translation,
    request_id: String,
) -> Result<AxumResponse, RelayError> {
    let start = Instant::now();
    let model = request.model.clone();
    let system_bytes = translation.cache_info.cached_segment_bytes;
    let tool_count = request.tools.as_ref().map_or(0, Vec::len);
    let message_count = request.messages.len();
    let cache_eligible = translation.cache_info.cache_eligible;
    let fingerprint = translation.fingerprint;
    let openai_request = translation.request;
    let request_json = state.trace().is_enabled().then(|| serde_json::to_value(&request).unwrap_or(serde_json::Value::Null));

    let compute = {
        let state = state.clone();
        let request_id = request_id.clone();
        let model = model.clone();
        move || async move {
            let response = state.backend().chat_completions(&openai_request).await?;
            let assembled = assemble_response(request_id, model, &response);
            serde_json::to_vec(&assembled).map_err(|e| RelayError::Internal(e.into()))
        }
    };

    let bytes_result = if cache_eligible {
        state.cache().get_or_compute(fingerprint, state.metrics(), compute).await
    } else {
        compute().await
    };

    let outcome = match &bytes_result {
        Ok(_) => Outcome::Ok,
        Err(error) => outcome_for_error(error),
    };
    let duration_ms = start.elapsed().as_millis() as u64;
    log_request(&state, outcome, duration_ms, system_bytes, tool_count, message_count, false, model);

    let bytes = bytes_result?;
    let response: anthropic::Response = serde_json::from_slice(&bytes).map_err(|e| RelayError::Internal(e.into()))?;

    if let Some(request_json) = request_json {
        let response_json = serde_json::to_value(&response).unwrap_or(serde_json::Value::Null);
        state.trace().write(&request_id, request_json, response_json);
    }

    Ok(Json(response).into_response())
}

fn stream_response(
    state: RelayState,
    request: anthropic::Request,
    translation: translate::Translation,
    request_id: String,
) -> impl IntoResponse {
    let model = request.model.clone();
    let system_bytes = translation.cache_info.cached_segment_bytes;
    let tool_count = request.tools.as_ref().map_or(0, Vec::len);
    let message_count = request.messages.len();
    let request_json = state.trace().is_enabled().then(|| serde_json::to_value(&request).unwrap_or(serde_json::Value::Null));

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(32);

    tokio::spawn(run_stream(
        state,
        translation.request,
        request_id,
        model,
        system_bytes,
        tool_count,
        message_count,
        request_json,
        tx,
    ));

    let body = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
    Sse::new(body)
}

#[allow(clippy::too_many_arguments)]
async fn run_stream(
    state: RelayState,
    openai_request: openai::Request,
    request_id: String,
    model: String,
    system_bytes: usize,
    tool_count: usize,
    message_count: usize,
    request_json: Option<serde_json::Value>,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let start = Instant::now();
    let mut transformer = StreamTransformer::new();
    let mut traced_events: Vec<anthropic::StreamEvent> = Vec::new();
    let tracing = request_json.is_some();

    let message_start = anthropic::StreamEvent::MessageStart(Box::new(anthropic::StreamMessageStart {
        id: request_id.clone(),
        role: anthropic::Role::Assistant,
        content: Vec::new(),
        model: model.clone(),
        usage: anthropic::StreamUsage::default(),
        stop_reason: None,
        stop_sequence: None,
        unknown_fields: Default::default(),
    }));
    if tx.send(Ok(to_sse_event(&message_start))).await.is_err() {
        return;
    }

    let mut backend_stream = match state.backend().chat_completions_stream(&openai_request).await {
        Ok(stream) => Box::pin(stream),
        Err(error) => {
            let error_event = error_event(&error);
            let _ = tx.send(Ok(to_sse_event(&error_event))).await;
            let _ = tx.send(Ok(to_sse_event(&anthropic::StreamEvent::MessageStop))).await;
            let duration_ms = start.elapsed().as_millis() as u64;
            log_request(&state, Outcome::UpstreamError, duration_ms, system_bytes, tool_count, message_count, true, model.clone());
            if let Some(request_json) = request_json {
                write_stream_trace(&state, &request_id, request_json, model, vec![error_event]);
            }
            return;
        }
    };

    let mut keepalive = tokio::time::interval(Duration::from_millis(state.config().keepalive_interval_ms));
    keepalive.tick().await;
    let watchdog = tokio::time::sleep(Duration::from_millis(state.config().terminal_watchdog_ms));
    tokio::pin!(watchdog);

    let mut first_chunk_received = false;
    let mut keepalive_count = 0u32;

    let outcome = loop {
        tokio::select! {
            biased;
            () = &mut watchdog => {
                state.metrics().watchdog_fired();
                for event in transformer.force_finish(FinishReason::Stop) {
                    if tracing {
                        traced_events.push(event.clone());
                    }
                    if send_event(&state, &tx, &event).await.is_err() {
                        break;
                    }
                }
                break Outcome::Timeout;
            }
            _ = keepalive.tick(), if !first_chunk_received => {
                keepalive_count += 1;
                state.metrics().keepalive_sent();
                if tx.send(Ok(Event::default().comment(format!("keepalive {keepalive_count}")))).await.is_err() {
                    break Outcome::Cancelled;
                }
            }
            item = backend_stream.next() => {
                match item {
                    None => {
                        if !transformer.is_done() {
                            for event in transformer.force_finish(FinishReason::Stop) {
                                if tracing {
                                    traced_events.push(event.clone());
                                }
                                if send_event(&state, &tx, &event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        break Outcome::Ok;
                    }
                    Some(Err(error)) => {
                        let error_event = error_event(&error);
                        if tracing {
                            traced_events.push(error_event.clone());
                        }
                        let _ = tx.send(Ok(to_sse_event(&error_event))).await;
                        let _ = tx.send(Ok(to_sse_event(&anthropic::StreamEvent::MessageStop))).await;
                        break Outcome::UpstreamError;
                    }
                    Some(Ok(chunk)) => {
                        if !first_chunk_received {
                            first_chunk_received = true;
                            state.metrics().record_time_to_first_event(start.elapsed().as_millis() as u64);
                        }

                        let mut disconnected = false;
                        'chunks: for upstream_chunk in normalize(chunk) {
                            for event in transformer.feed(upstream_chunk) {
                                if tracing {
                                    traced_events.push(event.clone());
                                }
                                if send_event(&state, &tx, &event).await.is_err() {
                                    disconnected = true;
                                    break 'chunks;
                                }
                            }
                        }

                        if disconnected {
                            break Outcome::Cancelled;
                        }
                        if transformer.is_done() {
                            break Outcome::Ok;
                        }
                    }
                }
            }
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    log_request(&state, outcome, duration_ms, system_bytes, tool_count, message_count, true, model.clone());

    if let Some(request_json) = request_json {
        write_stream_trace(&state, &request_id, request_json, model, traced_events);
    }
}

/// Replays the events actually sent down the wire through the same reconstruction
/// non-streaming responses use, so trace files capture a faithful final snapshot even
/// though nothing ever held a single `anthropic::Response` for a streamed reply.
fn write_stream_trace(state: &RelayState, request_id: &str, request_json: serde_json::Value, model: String, events: Vec<anthropic::StreamEvent>) {
    let response = build_response_from_events(request_id.to_owned(), model, events);
    let response_json = serde_json::to_value(&response).unwrap_or(serde_json::Value::Null);
    state.trace().write(request_id, request_json, response_json);
}

async fn send_event(state: &RelayState, tx: &mpsc::Sender<Result<Event, Infallible>>, event: &anthropic::StreamEvent) -> Result<(), ()> {
    let sse_event = Ok(to_sse_event(event));

    if matches!(event, anthropic::StreamEvent::MessageStop) {
        state.metrics().drain_wait();
        let drain_timeout = Duration::from_millis(state.config().drain_timeout_ms);
        match tokio::time::timeout(drain_timeout, tx.send(sse_event)).await {
            Ok(Ok(())) => Ok(()),
            _ => Err(()),
        }
    } else {
        tx.send(sse_event).await.map_err(|_| ())
    }
}

fn to_sse_event(event: &anthropic::StreamEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event_name(event)).data(data)
}

fn event_name(event: &anthropic::StreamEvent) -> &'static str {
    match event {
        anthropic::StreamEvent::MessageStart(_) => "message_start",
        anthropic::StreamEvent::ContentBlockStart { .. } => "content_block_start",
        anthropic::StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        anthropic::StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        anthropic::StreamEvent::MessageDelta(_) => "message_delta",
        anthropic::StreamEvent::MessageStop => "message_stop",
        anthropic::StreamEvent::Ping => "ping",
        anthropic::StreamEvent::Error { .. } => "error",
        anthropic::StreamEvent::Unknown(_) => "message",
    }
}

fn error_event(error: &RelayError) -> anthropic::StreamEvent {
    anthropic::StreamEvent::Error {
        error: anthropic::Error::api_error(error.client_message()),
    }
}

fn outcome_for_error(error: &RelayError) -> Outcome {
    match error {
        RelayError::ClientInput(_) => Outcome::ClientError,
        RelayError::Timeout => Outcome::Timeout,
        RelayError::Cancelled => Outcome::Cancelled,
        RelayError::UpstreamUnavailable(_) | RelayError::UpstreamProtocol(_) | RelayError::Internal(_) => Outcome::UpstreamError,
    }
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Ok => "ok",
        Outcome::ClientError => "client_error",
        Outcome::UpstreamError => "upstream_error",
        Outcome::Cancelled => "cancelled",
        Outcome::Timeout => "timeout",
    }
}

#[allow(clippy::too_many_arguments)]
fn log_request(
    state: &RelayState,
    outcome: Outcome,
    duration_ms: u64,
    system_bytes: usize,
    tool_count: usize,
    message_count: usize,
    streaming: bool,
    model: String,
) {
    state.metrics().record_request(outcome, duration_ms);
    state.request_log().log(RequestLogEntry {
        timestamp: jiff::Timestamp::now().to_string(),
        system_bytes,
        tool_count,
        message_count,
        streaming,
        backend_id: BACKEND_ID.to_owned(),
        model,
        duration_ms,
        outcome: outcome_label(outcome),
    });
}

/// Drives a non-streaming backend response through the same block-lifecycle state
/// machine streaming responses use, so both paths share dialect-fallback and
/// deduplication behavior, then reassembles the resulting events into a single
/// Messages response object.
fn assemble_response(id: String, model: String, response: &openai::Response) -> anthropic::Response {
    let mut transformer = StreamTransformer::new();
    let mut events = Vec::new();

    for chunk in upstream_chunks_from_response(response) {
        events.extend(transformer.feed(chunk));
    }
    if !transformer.is_done() {
        events.extend(transformer.force_finish(FinishReason::Stop));
    }

    build_response_from_events(id, model, events)
}

fn upstream_chunks_from_response(response: &openai::Response) -> Vec<UpstreamChunk> {
    let Some(choice) = response.choices.first() else {
        return vec![UpstreamChunk::Finish(FinishReason::Stop)];
    };

    let mut chunks = Vec::new();
    if let Some(content) = choice.message.content.as_deref().filter(|c| !c.is_empty()) {
        chunks.push(UpstreamChunk::TextDelta(content.to_owned()));
    }
    if let Some(reasoning) = choice.message.reasoning_content.as_deref().filter(|c| !c.is_empty()) {
        chunks.push(UpstreamChunk::ReasoningDelta(reasoning.to_owned()));
    }
    for (index, tool_call) in choice.message.tool_calls.iter().flatten().enumerate() {
        chunks.push(UpstreamChunk::ToolCallFragment {
            index: index as u32,
            id: Some(tool_call.id.clone()),
            name: Some(tool_call.function.name.clone()),
            arguments: Some(tool_call.function.arguments.clone()),
        });
    }
    if let Some(usage) = response.usage {
        chunks.push(UpstreamChunk::Usage {
            input_tokens: Some(usage.prompt_tokens),
            output_tokens: Some(usage.completion_tokens),
        });
    }

    let finish = choice.finish_reason.as_deref().map(FinishReason::from).unwrap_or(FinishReason::Stop);
    chunks.push(UpstreamChunk::Finish(finish));
    chunks
}

fn build_response_from_events(id: String, model: String, events: Vec<anthropic::StreamEvent>) -> anthropic::Response {
    let mut content: Vec<anthropic::ResponseContent> = Vec::new();
    let mut tool_json: std::collections::HashMap<usize, String> = std::collections::HashMap::new();
    let mut stop_reason = None;
    let mut usage = anthropic::Usage::default();

    for event in events {
        match event {
            anthropic::StreamEvent::ContentBlockStart { index, content_block } => {
                let index = index as usize;
                if content.len() <= index {
                    content.resize_with(index + 1, || anthropic::ResponseContent::Unknown(serde_json::Value::Null));
                }
                content[index] = content_block;
            }
            anthropic::StreamEvent::ContentBlockDelta { index, delta } => {
                apply_delta(&mut content, &mut tool_json, index as usize, &delta);
            }
            anthropic::StreamEvent::MessageDelta(message_delta) => {
                if message_delta.delta.stop_reason.is_some() {
                    stop_reason = message_delta.delta.stop_reason;
                }
                if let Some(reported) = message_delta.usage {
                    usage.input_tokens = reported.input_tokens.unwrap_or(usage.input_tokens);
                    usage.output_tokens = reported.output_tokens.unwrap_or(usage.output_tokens);
                }
            }
            _ => {}
        }
    }

    for (index, raw) in tool_json {
        if let Some(anthropic::ResponseContent::ToolUse(block)) = content.get_mut(index) {
            block.input = serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({}));
        }
    }

    anthropic::Response {
        id,
        r#type: anthropic::ResponseType::Message,
        role: anthropic::Role::Assistant,
        content,
        model,
        stop_reason,
        stop_sequence: None,
        usage,
        unknown_fields: Default::default(),
    }
}

fn apply_delta(
    content: &mut [anthropic::ResponseContent],
    tool_json: &mut std::collections::HashMap<usize, String>,
    index: usize,
    delta: &serde_json::Value,
) {
    let kind = delta.get("type").and_then(serde_json::Value::as_str);
    match (content.get_mut(index), kind) {
        (Some(anthropic::ResponseContent::Text(block)), Some("text_delta")) => {
            if let Some(text) = delta.get("text").and_then(serde_json::Value::as_str) {
                block.text.push_str(text);
            }
        }
        (Some(anthropic::ResponseContent::Thinking(block)), Some("thinking_delta")) => {
            if let Some(text) = delta.get("thinking").and_then(serde_json::Value::as_str) {
                block.thinking.push_str(text);
            }
        }
        (Some(anthropic::ResponseContent::ToolUse(_)), Some("input_json_delta")) => {
            if let Some(partial) = delta.get("partial_json").and_then(serde_json::Value::as_str) {
                tool_json.entry(index).or_default().push_str(partial);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_message(content: Option<&str>, tool_calls: Option<Vec<openai::ToolCall>>) -> openai::ResponseMessage {
        openai::ResponseMessage {
            content: content.map(str::to_owned),
            reasoning_content: None,
            tool_calls,
            unknown_fields: Default::default(),
        }
    }

    fn response_with_choice(message: openai::ResponseMessage, finish_reason: Option<&str>) -> openai::Response {
        openai::Response {
            id: "chatcmpl-1".to_owned(),
            model: "gpt-4".to_owned(),
            choices: vec![openai::Choice {
                index: 0,
                message,
                finish_reason: finish_reason.map(str::to_owned),
            }],
            usage: Some(openai::Usage { prompt_tokens: 10, completion_tokens: 5 }),
            unknown_fields: Default::default(),
        }
    }

    #[test]
    fn upstream_chunks_from_response_emits_text_and_finish() {
        let response = response_with_choice(response_message(Some("hello"), None), Some("stop"));
        let chunks = upstream_chunks_from_response(&response);

        assert!(matches!(&chunks[0], UpstreamChunk::TextDelta(text) if text == "hello"));
        assert!(matches!(chunks.last(), Some(UpstreamChunk::Finish(FinishReason::Stop))));
    }

    #[test]
    fn upstream_chunks_from_response_skips_empty_content() {
        let response = response_with_choice(response_message(Some(""), None), Some("stop"));
        let chunks = upstream_chunks_from_response(&response);

        assert!(!chunks.iter().any(|c| matches!(c, UpstreamChunk::TextDelta(_))));
    }

    #[test]
    fn upstream_chunks_from_response_carries_tool_calls() {
        let tool_call = openai::ToolCall {
            id: "call_1".to_owned(),
            r#type: openai::ToolType::Function,
            function: openai::FunctionCall {
                name: "lookup".to_owned(),
                arguments: "{\"q\":\"rust\"}".to_owned(),
            },
        };
        let response = response_with_choice(response_message(None, Some(vec![tool_call])), Some("tool_calls"));
        let chunks = upstream_chunks_from_response(&response);

        assert!(chunks.iter().any(|c| matches!(c, UpstreamChunk::ToolCallFragment { name: Some(name), .. } if name == "lookup")));
        assert!(matches!(chunks.last(), Some(UpstreamChunk::Finish(FinishReason::ToolCalls))));
    }

    #[test]
    fn upstream_chunks_from_response_with_no_choices_still_finishes() {
        let response = openai::Response {
            id: "chatcmpl-1".to_owned(),
            model: "gpt-4".to_owned(),
            choices: Vec::new(),
            usage: None,
            unknown_fields: Default::default(),
        };
        let chunks = upstream_chunks_from_response(&response);

        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], UpstreamChunk::Finish(FinishReason::Stop)));
    }

    #[test]
    fn assemble_response_reconstructs_text_block() {
        let response = response_with_choice(response_message(Some("hi there"), None), Some("stop"));
        let assembled = assemble_response("msg_1".to_owned(), "gpt-4".to_owned(), &response);

        assert_eq!(assembled.content.len(), 1);
        assert!(matches!(&assembled.content[0], anthropic::ResponseContent::Text(block) if block.text == "hi there"));
        assert_eq!(assembled.usage.input_tokens, 10);
        assert_eq!(assembled.usage.output_tokens, 5);
    }

    #[test]
    fn assemble_response_reassembles_streamed_tool_input() {
        let tool_call = openai::ToolCall {
            id: "call_1".to_owned(),
            r#type: openai::ToolType::Function,
            function: openai::FunctionCall {
                name: "lookup".to_owned(),
                arguments: "{\"q\":\"rust\"}".to_owned(),
            },
        };
        let response = response_with_choice(response_message(None, Some(vec![tool_call])), Some("tool_calls"));
        let assembled = assemble_response("msg_1".to_owned(), "gpt-4".to_owned(), &response);

        let anthropic::ResponseContent::ToolUse(block) = &assembled.content[0] else {
            panic!("expected a tool_use block");
        };
        assert_eq!(block.name, "lookup");
        assert_eq!(block.input, serde_json::json!({"q": "rust"}));
    }

    #[test]
    fn outcome_for_error_maps_client_input_to_client_error() {
        let error = RelayError::ClientInput("bad request".to_owned());
        assert_eq!(outcome_label(outcome_for_error(&error)), "client_error");
    }

    #[test]
    fn outcome_for_error_maps_upstream_variants_to_upstream_error() {
        assert_eq!(outcome_label(outcome_for_error(&RelayError::UpstreamUnavailable("down".to_owned()))), "upstream_error");
        assert_eq!(outcome_label(outcome_for_error(&RelayError::UpstreamProtocol("bad body".to_owned()))), "upstream_error");
    }

    #[test]
    fn outcome_for_error_maps_timeout_and_cancelled() {
        assert_eq!(outcome_label(outcome_for_error(&RelayError::Timeout)), "timeout");
        assert_eq!(outcome_label(outcome_for_error(&RelayError::Cancelled)), "cancelled");
    }

    #[test]
    fn event_name_matches_anthropic_sse_names() {
        assert_eq!(event_name(&anthropic::StreamEvent::MessageStop), "message_stop");
        assert_eq!(
            event_name(&anthropic::StreamEvent::Error { error: anthropic::Error::api_error("boom") }),
            "error"
        );
    }
}
