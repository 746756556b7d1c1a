//! Consumes normalized upstream chunks and emits the Anthropic SSE event sequence,
//! maintaining the content-block lifecycle invariant: a block is opened before it is
//! delta'd and closed before the next one opens.
//!
//! Anthropic content blocks are strictly sequential (open, delta*, stop, with no
//! overlap), but OpenAI-compatible backends may interleave argument fragments for
//! several parallel tool calls. Rather than holding multiple blocks open at once, a
//! fragment for a different tool index than the one currently open closes the
//! current block and starts a new one; a backend that truly interleaves parallel
//! tool calls will see them emitted as separate block cycles instead of overlapping
//! ones.

use serde_json::{Value, json};

use crate::{
    protocol::{
        anthropic::{Delta, MessageDelta, ResponseContent, ResponseTextBlock, ResponseThinkingBlock, ResponseToolUseBlock, StopReason, StreamEvent, StreamUsage},
        openai,
    },
    tools::DialectRegistry,
};

/// One normalized event out of an upstream streaming chunk. A single
/// [`openai::StreamChunk`] can unpack into several of these (a text delta and a
/// finish reason together, for example).
#[derive(Debug, Clone)]
pub enum UpstreamChunk {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCallFragment {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    Finish(FinishReason),
    Usage { input_tokens: Option<u32>, output_tokens: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other,
}

impl From<&str> for FinishReason {
    fn from(value: &str) -> Self {
        match value {
            "stop" => Self::Stop,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "length" => Self::Length,
            _ => Self::Other,
        }
    }
}

/// Splits one backend SSE chunk into the normalized events the transformer consumes.
pub fn normalize(chunk: openai::StreamChunk) -> Vec<UpstreamChunk> {
    let mut out = Vec::new();

    if let Some(usage) = chunk.usage {
        out.push(UpstreamChunk::Usage {
            input_tokens: Some(usage.prompt_tokens),
            output_tokens: Some(usage.completion_tokens),
        });
    }

    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            out.push(UpstreamChunk::TextDelta(content));
        }
        if let Some(reasoning) = choice.delta.reasoning_content.filter(|c| !c.is_empty()) {
            out.push(UpstreamChunk::ReasoningDelta(reasoning));
        }
        for fragment in choice.delta.tool_calls.into_iter().flatten() {
            let (name, arguments) = match fragment.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            out.push(UpstreamChunk::ToolCallFragment {
                index: fragment.index,
                id: fragment.id,
                name,
                arguments,
            });
        }
        if let Some(reason) = choice.finish_reason {
            out.push(UpstreamChunk::Finish(FinishReason::from(reason.as_str())));
        }
    }

    out
}

#[derive(Debug)]
struct OpenToolBlock {
    upstream_index: u32,
    block_index: u32,
    /// Logical argument text already emitted for this block; used to recognize when
    /// a backend resends the full accumulated arguments instead of a true delta.
    emitted: String,
}

#[derive(Debug, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Tool,
}

/// Opening delimiters the textual-fallback dialects recognize; a trailing fragment
/// of the open text block that matches one of these as a prefix is held back from
/// emission until it either completes into a full match or is ruled out.
const OPENERS: &[&str] = &["<tool_call>", "<function=", "[TOOL_CALLS]", "```"];

pub struct StreamTransformer {
    dialects: DialectRegistry,

    next_index: u32,
    open_block: Option<OpenBlock>,
    current_text_index: u32,
    open_tool: Option<OpenToolBlock>,

    /// Text accumulated for the open text block, used for dialect re-scanning.
    pending_text: String,
    /// Prefix of `pending_text` already flushed to the client as delta events.
    flushed_len: usize,

    used_tool_fallback: bool,
    used_native_tool: bool,

    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    output_chars: usize,

    done: bool,
}

impl StreamTransformer {
    pub fn new() -> Self {
        Self {
            dialects: DialectRegistry::default(),
            next_index: 0,
            open_block: None,
            current_text_index: 0,
            open_tool: None,
            pending_text: String::new(),
            flushed_len: 0,
            used_tool_fallback: false,
            used_native_tool: false,
            input_tokens: None,
            output_tokens: None,
            output_chars: 0,
            done: false,
        }
    }

    pub fn feed(&mut self, chunk: UpstreamChunk) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }

        match chunk {
            UpstreamChunk::TextDelta(text) => self.on_text_delta(text),
            UpstreamChunk::ReasoningDelta(text) => self.on_reasoning_delta(text),
            UpstreamChunk::ToolCallFragment { index, id, name, arguments } => {
                self.on_tool_call_fragment(index, id, name, arguments)
            }
            UpstreamChunk::Usage { input_tokens, output_tokens } => {
                self.input_tokens = input_tokens.or(self.input_tokens);
                self.output_tokens = output_tokens.or(self.output_tokens);
                Vec::new()
            }
            UpstreamChunk::Finish(reason) => self.on_finish(reason),
        }
    }

    /// Forces terminal-event emission when the upstream never reports a finish
    /// reason (connection drop, watchdog expiry). No-op once already done.
    pub fn force_finish(&mut self, reason: FinishReason) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        self.on_finish(reason)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn on_text_delta(&mut self, text: String) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.close_open_tool(&mut events);
        self.ensure_text_open(&mut events);

        self.pending_text.push_str(&text);
        self.output_chars += text.chars().count();

        // Loop rather than a single match: the remainder after a consumed tool
        // call can itself contain another inline tool call, and must never be
        // dropped even when it's empty or holds only plain text.
        while let Some(parsed) = self.dialects.scan(&self.pending_text) {
            let visible_before = self.pending_text[self.flushed_len..parsed.consumed.start].to_owned();
            if !visible_before.is_empty() {
                events.push(text_delta_event(self.current_text_index, &visible_before));
            }
            events.push(StreamEvent::ContentBlockStop {
                index: self.current_text_index,
            });
            self.open_block = None;

            let tool_index = self.next_index;
            self.next_index += 1;
            self.used_tool_fallback = true;

            events.push(StreamEvent::ContentBlockStart {
                index: tool_index,
                content_block: ResponseContent::ToolUse(ResponseToolUseBlock {
                    id: format!("toolu_fallback_{tool_index}"),
                    name: parsed.name,
                    input: json!({}),
                    unknown_fields: Default::default(),
                }),
            });
            events.push(StreamEvent::ContentBlockDelta {
                index: tool_index,
                delta: input_json_delta(&serde_json::to_string(&parsed.arguments).unwrap_or_default()),
            });
            events.push(StreamEvent::ContentBlockStop { index: tool_index });

            let remainder = self.pending_text[parsed.consumed.end..].to_owned();
            self.pending_text = remainder;
            self.flushed_len = 0;

            if !self.pending_text.is_empty() {
                self.open_text_block(&mut events);
            }
        }

        if self.open_block == Some(OpenBlock::Text) {
            let hold = holdback_len(&self.pending_text);
            let flush_end = self.pending_text.len() - hold;
            if flush_end > self.flushed_len {
                let visible = self.pending_text[self.flushed_len..flush_end].to_owned();
                events.push(text_delta_event(self.current_text_index, &visible));
                self.flushed_len = flush_end;
            }
        }

        events
    }

    fn on_reasoning_delta(&mut self, text: String) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.close_open_tool(&mut events);

        // Reasoning text opens its own block and never participates in dialect
        // scanning, so any held-back text block is closed first.
        if self.open_block != Some(OpenBlock::Text) || !self.pending_text.is_empty() {
            self.close_open_text(&mut events);
            self.current_text_index = self.next_index;
            self.next_index += 1;
            self.open_block = Some(OpenBlock::Text);
            events.push(StreamEvent::ContentBlockStart {
                index: self.current_text_index,
                content_block: ResponseContent::Thinking(ResponseThinkingBlock {
                    thinking: String::new(),
                    unknown_fields: Default::default(),
                }),
            });
        }

        events.push(StreamEvent::ContentBlockDelta {
            index: self.current_text_index,
            delta: json!({"type": "thinking_delta", "thinking": text}),
        });

        events
    }

    fn on_tool_call_fragment(
        &mut self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        let needs_new_block = match &self.open_tool {
            Some(open) => open.upstream_index != index,
            None => true,
        };

        if needs_new_block {
            self.close_open_tool(&mut events);
            self.close_open_text(&mut events);

            let block_index = self.next_index;
            self.next_index += 1;
            self.used_native_tool = true;

            let id = id.unwrap_or_else(|| format!("toolu_{block_index}"));
            let name = name.unwrap_or_default();

            events.push(StreamEvent::ContentBlockStart {
                index: block_index,
                content_block: ResponseContent::ToolUse(ResponseToolUseBlock {
                    id,
                    name,
                    input: json!({}),
                    unknown_fields: Default::default(),
                }),
            });

            self.open_tool = Some(OpenToolBlock {
                upstream_index: index,
                block_index,
                emitted: String::new(),
            });
        }

        if let Some(fragment) = arguments {
            let open = self.open_tool.as_mut().expect("just ensured a tool block is open");
            let suffix = dedup_suffix(&mut open.emitted, &fragment);
            if !suffix.is_empty() {
                events.push(StreamEvent::ContentBlockDelta {
                    index: open.block_index,
                    delta: input_json_delta(&suffix),
                });
            }
        }

        events
    }

    fn on_finish(&mut self, reason: FinishReason) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.close_open_tool(&mut events);
        self.close_open_text(&mut events);

        let stop_reason = map_stop_reason(reason, self.used_native_tool || self.used_tool_fallback);

        let output_tokens = self.output_tokens.or_else(|| {
            if self.output_chars == 0 {
                None
            } else {
                Some((self.output_chars / 4).max(1) as u32)
            }
        });

        events.push(StreamEvent::MessageDelta(Box::new(MessageDelta {
            delta: Delta {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
                unknown_fields: Default::default(),
            },
            usage: Some(StreamUsage {
                input_tokens: self.input_tokens,
                output_tokens,
                unknown_fields: Default::default(),
            }),
            unknown_fields: Default::default(),
        })));
        events.push(StreamEvent::MessageStop);

        self.done = true;
        events
    }

    fn close_open_tool(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(open) = self.open_tool.take() {
            events.push(StreamEvent::ContentBlockStop { index: open.block_index });
        }
    }

    fn close_open_text(&mut self, events: &mut Vec<StreamEvent>) {
        if self.open_block == Some(OpenBlock::Text) {
            self.flush_pending_text(events);
            events.push(StreamEvent::ContentBlockStop {
                index: self.current_text_index,
            });
            self.open_block = None;
        }
    }

    fn ensure_text_open(&mut self, events: &mut Vec<StreamEvent>) {
        if self.open_block.is_none() {
            self.pending_text.clear();
            self.flushed_len = 0;
            self.open_text_block(events);
        }
    }

    /// Opens a fresh text block without touching `pending_text`/`flushed_len`, so
    /// callers that are reopening a block around already-buffered content (the
    /// remainder left over after an inline tool call) don't lose it.
    fn open_text_block(&mut self, events: &mut Vec<StreamEvent>) {
        self.current_text_index = self.next_index;
        self.next_index += 1;
        self.open_block = Some(OpenBlock::Text);
        events.push(StreamEvent::ContentBlockStart {
            index: self.current_text_index,
            content_block: ResponseContent::Text(ResponseTextBlock {
                text: String::new(),
                unknown_fields: Default::default(),
            }),
        });
    }

    fn flush_pending_text(&mut self, events: &mut Vec<StreamEvent>) {
        if self.flushed_len < self.pending_text.len() {
            let visible = self.pending_text[self.flushed_len..].to_owned();
            events.push(text_delta_event(self.current_text_index, &visible));
            self.flushed_len = self.pending_text.len();
        }
    }
}

impl Default for StreamTransformer {
    fn default() -> Self {
        Self::new()
    }
}

fn map_stop_reason(reason: FinishReason, used_tool: bool) -> StopReason {
    match reason {
        FinishReason::ToolCalls => StopReason::ToolUse,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::Stop if used_tool => StopReason::ToolUse,
        FinishReason::Stop | FinishReason::Other => StopReason::EndTurn,
    }
}

fn text_delta_event(index: u32, text: &str) -> StreamEvent {
    StreamEvent::ContentBlockDelta {
        index,
        delta: json!({"type": "text_delta", "text": text}),
    }
}

fn input_json_delta(partial_json: &str) -> Value {
    json!({"type": "input_json_delta", "partial_json": partial_json})
}

/// Some backends resend the full accumulated arguments as a final fragment instead of
/// a true incremental delta. If the new fragment is a superset of what was already
/// emitted (i.e. `emitted` is a prefix of it), only the unseen suffix is returned and
/// `emitted` is extended to match; otherwise the fragment is a genuine new delta and
/// is emitted whole.
fn dedup_suffix(emitted: &mut String, fragment: &str) -> String {
    let suffix = if !emitted.is_empty() && fragment.starts_with(emitted.as_str()) {
        fragment[emitted.len()..].to_owned()
    } else {
        fragment.to_owned()
    };
    emitted.push_str(&suffix);
    suffix
}

/// Longest suffix of `buffer` (by character count) that is itself a prefix of one of
/// the fallback dialects' opening delimiters.
fn holdback_len(buffer: &str) -> usize {
    let max_chars = OPENERS.iter().map(|o| o.chars().count()).max().unwrap_or(0);
    let buffer_chars = buffer.chars().count();

    for take in (1..=max_chars.min(buffer_chars)).rev() {
        let start = buffer.char_indices().rev().nth(take - 1).map(|(i, _)| i).unwrap_or(0);
        let suffix = &buffer[start..];
        if OPENERS.iter().any(|opener| opener.starts_with(suffix)) {
            return buffer.len() - start;
        }
    }

    0
}
