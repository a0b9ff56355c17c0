//! Stream translation
//!
//! Turns upstream Chat Completions chunks into the frames a client receives,
//! either as normalized Chat Completions chunks or as Responses API lifecycle
//! events. Text and tool-call fragments are accumulated on the way through so
//! the final usage and the cacheable response can be built at the end.

use super::usage::{count_completion_tokens, resolve_usage};
use crate::models::openai::{
    ChatChunk, ChatMessage, ChatResponse, Choice, ChunkChoice, Delta, ErrorEnvelope, FunctionCall,
    FunctionCallDelta, MessageContent, ToolCall, ToolCallDelta, Usage,
};
use crate::models::responses::{OutputContent, OutputItem, ResponseError, ResponseObject, ResponseStreamEvent};
use crate::utils::error::AppError;
use std::collections::BTreeMap;
use tracing::warn;

/// One frame written to the client's SSE stream
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// Chat Completions chunk
    Chunk(ChatChunk),
    /// Responses API event
    Event(ResponseStreamEvent),
    /// Chat Completions in-stream error
    Error(ErrorEnvelope),
    /// Chat Completions `[DONE]` sentinel
    Done,
}

impl WireFrame {
    /// SSE `event:` name, Responses frames only
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            WireFrame::Event(event) => Some(event.event_name()),
            _ => None,
        }
    }

    /// SSE `data:` payload
    pub fn data(&self) -> String {
        let json = match self {
            WireFrame::Chunk(chunk) => serde_json::to_string(chunk),
            WireFrame::Event(event) => serde_json::to_string(event),
            WireFrame::Error(envelope) => serde_json::to_string(envelope),
            WireFrame::Done => return "[DONE]".to_string(),
        };
        json.unwrap_or_else(|_| "{}".to_string())
    }

    /// Raw SSE text of this frame
    pub fn to_sse_text(&self) -> String {
        match self.event_name() {
            Some(name) => format!("event: {}\ndata: {}\n\n", name, self.data()),
            None => format!("data: {}\n\n", self.data()),
        }
    }

    /// Whether nothing may follow this frame
    pub fn is_terminal(&self) -> bool {
        match self {
            WireFrame::Done => true,
            WireFrame::Event(event) => event.is_terminal(),
            _ => false,
        }
    }
}

/// Tool call being rebuilt from streamed fragments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallAccumulator {
    /// Merge one fragment; ids and names arrive whole, arguments in pieces
    pub fn apply(&mut self, delta: &ToolCallDelta) {
        if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
            self.id = id.to_string();
        }
        if let Some(function) = &delta.function {
            if let Some(name) = function.name.as_deref().filter(|n| !n.is_empty()) {
                if self.name.is_empty() {
                    self.name = name.to_string();
                }
            }
            if let Some(arguments) = &function.arguments {
                self.arguments.push_str(arguments);
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.id.is_empty() && !self.name.is_empty()
    }

    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall {
            id: self.id.clone(),
            call_type: "function".to_string(),
            function: FunctionCall { name: self.name.clone(), arguments: self.arguments.clone() },
        }
    }
}

/// Content of an assistant message item: always a text part, plus tool calls
/// when there are any
pub fn message_content(text: &str, tool_calls: Vec<ToolCall>) -> Vec<OutputContent> {
    let mut content = vec![OutputContent::text(text)];
    if !tool_calls.is_empty() {
        content.push(OutputContent::ToolCalls { tool_calls });
    }
    content
}

#[derive(Debug)]
struct ResponsesState {
    template: ResponseObject,
    item_id: String,
    content_started: bool,
    sequence: u64,
}

impl ResponsesState {
    fn next_seq(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }

    fn snapshot(&self, status: &str) -> ResponseObject {
        let mut response = self.template.clone();
        response.status = status.to_string();
        response
    }
}

#[derive(Debug)]
enum Mode {
    Chat,
    Responses(ResponsesState),
}

/// Per-stream translator
#[derive(Debug)]
pub struct StreamTranslator {
    mode: Mode,
    served_model: String,
    prompt_tokens: u32,
    stream_id: String,
    created: u64,
    text: String,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finish_reason: Option<String>,
    upstream_usage: Option<Usage>,
    usage_forwarded: bool,
}

impl StreamTranslator {
    /// Translator producing Chat Completions chunks labelled with `served_model`
    pub fn chat(served_model: impl Into<String>, prompt_tokens: u32) -> Self {
        Self::with_mode(Mode::Chat, served_model.into(), prompt_tokens)
    }

    /// Translator producing Responses events built around `template`
    pub fn responses(template: ResponseObject, prompt_tokens: u32) -> Self {
        let served_model = template.model.clone();
        let state = ResponsesState {
            template,
            item_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            content_started: false,
            sequence: 0,
        };
        Self::with_mode(Mode::Responses(state), served_model, prompt_tokens)
    }

    fn with_mode(mode: Mode, served_model: String, prompt_tokens: u32) -> Self {
        Self {
            mode,
            served_model,
            prompt_tokens,
            stream_id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp().max(0) as u64,
            text: String::new(),
            tool_calls: BTreeMap::new(),
            finish_reason: None,
            upstream_usage: None,
            usage_forwarded: false,
        }
    }

    /// Frames sent before any upstream content
    pub fn begin(&mut self) -> Vec<WireFrame> {
        let Mode::Responses(state) = &mut self.mode else {
            return Vec::new();
        };

        let created = state.snapshot("in_progress");
        let in_progress = created.clone();
        let item = OutputItem::message(&state.item_id, "in_progress", Vec::new());
        vec![
            WireFrame::Event(ResponseStreamEvent::Created { sequence_number: state.next_seq(), response: created }),
            WireFrame::Event(ResponseStreamEvent::InProgress {
                sequence_number: state.next_seq(),
                response: in_progress,
            }),
            WireFrame::Event(ResponseStreamEvent::OutputItemAdded {
                sequence_number: state.next_seq(),
                output_index: 0,
                item,
            }),
        ]
    }

    /// Translate one upstream chunk
    pub fn on_chunk(&mut self, mut chunk: ChatChunk) -> Vec<WireFrame> {
        // All-zero usage is a placeholder; the estimate is reported instead
        if let Some(usage) = chunk.usage.take().filter(|u| u.prompt_tokens > 0 || u.completion_tokens > 0) {
            let usage = usage.normalized();
            self.upstream_usage = Some(usage);
            chunk.usage = Some(usage);
        }

        for choice in chunk.choices.iter().filter(|c| c.index == 0) {
            if let Some(content) = &choice.delta.content {
                self.text.push_str(content);
            }
            for delta in choice.delta.tool_calls.iter().flatten() {
                self.tool_calls.entry(delta.index).or_default().apply(delta);
            }
            if let Some(reason) = &choice.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }

        match &mut self.mode {
            Mode::Chat => {
                chunk.choices.retain(|c| !c.is_degenerate());
                if chunk.choices.is_empty() && chunk.usage.is_none() {
                    return Vec::new();
                }
                if chunk.usage.is_some() {
                    self.usage_forwarded = true;
                }
                if chunk.id.is_empty() {
                    chunk.id = self.stream_id.clone();
                }
                if chunk.created == 0 {
                    chunk.created = self.created;
                }
                chunk.object = "chat.completion.chunk".to_string();
                chunk.model = self.served_model.clone();
                vec![WireFrame::Chunk(chunk)]
            }
            Mode::Responses(state) => {
                let mut frames = Vec::new();
                for choice in chunk.choices.iter().filter(|c| c.index == 0) {
                    let text = choice.delta.content.as_deref().unwrap_or("");
                    let has_tool_call = choice.delta.tool_calls.as_ref().map_or(false, |t| !t.is_empty());

                    if (!text.is_empty() || has_tool_call) && !state.content_started {
                        state.content_started = true;
                        frames.push(WireFrame::Event(ResponseStreamEvent::ContentPartAdded {
                            sequence_number: state.next_seq(),
                            item_id: state.item_id.clone(),
                            output_index: 0,
                            content_index: 0,
                            part: OutputContent::text(""),
                        }));
                    }
                    if !text.is_empty() {
                        frames.push(WireFrame::Event(ResponseStreamEvent::OutputTextDelta {
                            sequence_number: state.next_seq(),
                            item_id: state.item_id.clone(),
                            output_index: 0,
                            content_index: 0,
                            delta: text.to_string(),
                        }));
                    }
                }
                frames
            }
        }
    }

    /// Accumulated text so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Completed tool calls in index order; fragments missing an id or name
    /// are dropped
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .iter()
            .filter_map(|(index, acc)| {
                if acc.is_complete() {
                    Some(acc.to_tool_call())
                } else {
                    warn!(index = *index, "Dropping incomplete streamed tool call");
                    None
                }
            })
            .collect()
    }

    /// Whether any content has been accumulated
    pub fn has_output(&self) -> bool {
        !self.text.is_empty() || !self.tool_calls.is_empty()
    }

    /// Upstream-reported usage, or the estimate from accumulated output
    pub fn final_usage(&self) -> Usage {
        let completion = count_completion_tokens(&self.text, &self.tool_calls(), &self.served_model);
        resolve_usage(self.upstream_usage, self.prompt_tokens, completion)
    }

    /// Frames closing a successful stream; the last frame is terminal
    pub fn finish(&mut self, usage: Usage) -> Vec<WireFrame> {
        let usage = usage.normalized();
        let tool_calls = self.tool_calls();

        match &mut self.mode {
            Mode::Chat => {
                let mut frames = Vec::new();
                if !self.usage_forwarded {
                    frames.push(WireFrame::Chunk(ChatChunk {
                        id: self.stream_id.clone(),
                        object: "chat.completion.chunk".to_string(),
                        created: self.created,
                        model: self.served_model.clone(),
                        choices: Vec::new(),
                        usage: Some(usage),
                        system_fingerprint: None,
                    }));
                }
                frames.push(WireFrame::Done);
                frames
            }
            Mode::Responses(state) => {
                let mut frames = Vec::new();
                if state.content_started {
                    frames.push(WireFrame::Event(ResponseStreamEvent::OutputTextDone {
                        sequence_number: state.next_seq(),
                        item_id: state.item_id.clone(),
                        output_index: 0,
                        content_index: 0,
                        text: self.text.clone(),
                    }));
                    frames.push(WireFrame::Event(ResponseStreamEvent::ContentPartDone {
                        sequence_number: state.next_seq(),
                        item_id: state.item_id.clone(),
                        output_index: 0,
                        content_index: 0,
                        part: OutputContent::text(self.text.clone()),
                    }));
                }

                let item = OutputItem::message(&state.item_id, "completed", message_content(&self.text, tool_calls));
                frames.push(WireFrame::Event(ResponseStreamEvent::OutputItemDone {
                    sequence_number: state.next_seq(),
                    output_index: 0,
                    item: item.clone(),
                }));

                let mut response = state.snapshot("completed");
                response.output = vec![item];
                response.usage = Some(usage.into());
                frames.push(WireFrame::Event(ResponseStreamEvent::Completed {
                    sequence_number: state.next_seq(),
                    response,
                }));
                frames
            }
        }
    }

    /// Frames closing a stream that failed after it started
    pub fn fail(&mut self, error: &AppError) -> Vec<WireFrame> {
        let tool_calls = self.tool_calls();
        match &mut self.mode {
            Mode::Chat => vec![WireFrame::Error(error.to_envelope()), WireFrame::Done],
            Mode::Responses(state) => {
                let mut response = state.snapshot("failed");
                response.output = vec![OutputItem::message(
                    &state.item_id,
                    "incomplete",
                    message_content(&self.text, tool_calls),
                )];
                response.error = Some(ResponseError {
                    code: error.error_code().to_string(),
                    message: error.client_message(),
                });
                vec![WireFrame::Event(ResponseStreamEvent::Failed {
                    sequence_number: state.next_seq(),
                    response,
                })]
            }
        }
    }

    /// Non-streaming equivalent of everything streamed so far
    pub fn assembled_response(&self, usage: Usage) -> ChatResponse {
        let tool_calls = self.tool_calls();
        let content = if self.text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(MessageContent::Text(self.text.clone()))
        };
        let finish_reason = self
            .finish_reason
            .clone()
            .or_else(|| Some(if tool_calls.is_empty() { "stop" } else { "tool_calls" }.to_string()));

        ChatResponse {
            id: self.stream_id.clone(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.served_model.clone(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content,
                    name: None,
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    tool_call_id: None,
                },
                finish_reason,
                logprobs: None,
            }],
            usage: Some(usage.normalized()),
            system_fingerprint: None,
        }
    }
}

/// Re-slice a cached response into chunks so a hit can be served as a stream
pub fn replay_chunks(response: &ChatResponse, chunk_chars: usize) -> Vec<ChatChunk> {
    let chunk_chars = chunk_chars.max(1);
    let chunk = |delta: Delta, finish_reason: Option<String>| ChatChunk {
        id: response.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: response.created,
        model: response.model.clone(),
        choices: vec![ChunkChoice { index: 0, delta, finish_reason }],
        usage: None,
        system_fingerprint: None,
    };

    let mut chunks = vec![chunk(
        Delta { role: Some("assistant".to_string()), content: Some(String::new()), tool_calls: None },
        None,
    )];

    let chars: Vec<char> = response.first_text().chars().collect();
    for piece in chars.chunks(chunk_chars) {
        chunks.push(chunk(
            Delta { content: Some(piece.iter().collect()), ..Default::default() },
            None,
        ));
    }

    for (index, call) in response.first_tool_calls().into_iter().enumerate() {
        chunks.push(chunk(
            Delta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: index as u32,
                    id: Some(call.id),
                    call_type: Some(call.call_type),
                    function: Some(FunctionCallDelta {
                        name: Some(call.function.name),
                        arguments: Some(call.function.arguments),
                    }),
                }]),
                ..Default::default()
            },
            None,
        ));
    }

    let finish_reason = response
        .choices
        .first()
        .and_then(|c| c.finish_reason.clone())
        .unwrap_or_else(|| "stop".to_string());
    chunks.push(chunk(Delta::default(), Some(finish_reason)));

    if let Some(usage) = response.usage {
        chunks.push(ChatChunk { choices: Vec::new(), usage: Some(usage.normalized()), ..chunk(Delta::default(), None) });
    }
    chunks
}
