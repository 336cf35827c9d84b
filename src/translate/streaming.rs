//! State machine for translating chat completion stream frames into Anthropic SSE events.
//!
//! [`StreamTranslator`] owns one [`StreamState`] for the lifetime of a single
//! streaming request. Raw backend bytes go in through [`StreamTranslator::feed`],
//! which frames them into `data:` lines, and Anthropic [`StreamEvent`]s come out
//! in the order the client must observe them.
//!
//! Block indices: a text block that opens before any tool call takes index 0
//! and is closed as soon as the first tool-call fragment arrives. Tool call `i`
//! then lives at `current_block_index + i`. Indices are never reused.

use std::collections::{BTreeMap, BTreeSet};

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChunkToolCall};
use super::response::{map_finish_reason, new_message_id};

/// A tool call being assembled from streamed fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    /// Raw concatenation of every `arguments` fragment seen so far.
    pub arguments: String,
    /// Anthropic block index, assigned when the block is started.
    pub block_index: Option<usize>,
}

/// Per-request stream state. Never shared between requests.
#[derive(Debug, Clone)]
pub struct StreamState {
    pub message_id: String,
    pub current_block_index: usize,
    pub text_block_started: bool,
    /// Index of the open text block; meaningful only while `text_block_started`.
    pub text_block_index: usize,
    /// Keyed by the backend's tool-call index.
    pub tool_calls: BTreeMap<usize, ToolCallAccumulator>,
    pub tool_blocks_started: BTreeSet<usize>,
    pub input_tokens: u64,
    /// One per text delta until the backend reports a real completion count.
    pub output_tokens: u64,
    pub usage_reported: bool,
    /// Bytes after the last newline, waiting for the rest of their line.
    pub partial_line_buffer: Vec<u8>,
    /// `data:` lines that were not valid JSON and got skipped.
    pub malformed_frames: u64,
    pub finished: bool,
    opened_blocks: BTreeSet<usize>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            message_id: new_message_id(),
            current_block_index: 0,
            text_block_started: false,
            text_block_index: 0,
            tool_calls: BTreeMap::new(),
            tool_blocks_started: BTreeSet::new(),
            input_tokens: 0,
            output_tokens: 0,
            usage_reported: false,
            partial_line_buffer: Vec::new(),
            malformed_frames: 0,
            finished: false,
            opened_blocks: BTreeSet::new(),
        }
    }

    fn next_unused_index(&self) -> usize {
        self.opened_blocks.last().map_or(0, |last| last + 1)
    }

    /// Pick an index for a new block, falling back to the next unused one if
    /// the preferred index was already taken.
    fn claim_index(&mut self, preferred: usize) -> usize {
        let index = if self.opened_blocks.contains(&preferred) {
            self.next_unused_index()
        } else {
            preferred
        };
        self.opened_blocks.insert(index);
        index
    }
}

/// Translates a backend SSE byte stream into Anthropic stream events.
///
/// Usage:
///   let mut translator = StreamTranslator::new("claude-sonnet-4-20250514");
///   send(translator.message_start());
///   while let Some(bytes) = upstream.next().await {
///       for event in translator.feed(&bytes) { send(event) }
///       if translator.is_finished() { break }
///   }
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    state: StreamState,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            state: StreamState::new(),
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// True once a finish reason has been translated; later input is ignored.
    pub fn is_finished(&self) -> bool {
        self.state.finished
    }

    /// The opening event, sent before any backend bytes are read.
    pub fn message_start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.state.message_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: self.state.input_tokens,
                    output_tokens: 0,
                },
            },
        }
    }

    /// Feed raw backend bytes. Complete lines are translated immediately; a
    /// trailing partial line is buffered until the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.state.finished {
            return events;
        }

        self.state.partial_line_buffer.extend_from_slice(bytes);

        while let Some(newline_pos) = self
            .state
            .partial_line_buffer
            .iter()
            .position(|&b| b == b'\n')
        {
            let line: Vec<u8> = self
                .state
                .partial_line_buffer
                .drain(..=newline_pos)
                .collect();
            events.extend(self.process_line(&line));

            if self.state.finished {
                self.state.partial_line_buffer.clear();
                break;
            }
        }

        events
    }

    fn process_line(&mut self, line: &[u8]) -> Vec<StreamEvent> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();

        let Some(data) = line.strip_prefix("data:") else {
            return Vec::new();
        };
        let data = data.trim_start();

        if data == "[DONE]" {
            return Vec::new();
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => self.process_chunk(&chunk),
            Err(_) => {
                self.state.malformed_frames += 1;
                Vec::new()
            }
        }
    }

    /// Process a single parsed chunk, returning zero or more Anthropic events.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.state.finished {
            return events;
        }

        if let Some(ref usage) = chunk.usage {
            if let Some(prompt) = usage.prompt_tokens {
                self.state.input_tokens = prompt;
            }
            if let Some(completion) = usage.completion_tokens {
                self.state.output_tokens = completion;
                self.state.usage_reported = true;
            }
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if let Some(text) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            self.push_text_delta(text, &mut events);
        }

        if let Some(ref tool_calls) = choice.delta.tool_calls {
            if !tool_calls.is_empty() {
                self.close_text_block(&mut events);
                for fragment in tool_calls {
                    self.push_tool_fragment(fragment, &mut events);
                }
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            self.finish(reason, &mut events);
        }

        events
    }

    fn push_text_delta(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        if !self.state.text_block_started {
            // Text after a tool call cannot reuse the reserved slot
            let preferred = if self.state.tool_blocks_started.is_empty() {
                self.state.current_block_index
            } else {
                self.state.next_unused_index()
            };
            let index = self.state.claim_index(preferred);
            self.state.text_block_index = index;
            self.state.text_block_started = true;
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            });
        }

        events.push(StreamEvent::ContentBlockDelta {
            index: self.state.text_block_index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        });

        if !self.state.usage_reported {
            self.state.output_tokens += 1;
        }
    }

    fn close_text_block(&mut self, events: &mut Vec<StreamEvent>) {
        if !self.state.text_block_started {
            return;
        }
        events.push(StreamEvent::ContentBlockStop {
            index: self.state.text_block_index,
        });
        if self.state.tool_blocks_started.is_empty() {
            self.state.current_block_index += 1;
        }
        self.state.text_block_started = false;
    }

    fn push_tool_fragment(&mut self, fragment: &ChunkToolCall, events: &mut Vec<StreamEvent>) {
        let upstream_index = fragment.index;
        let new_arguments = fragment
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or_default();

        let acc = self.state.tool_calls.entry(upstream_index).or_default();
        if let Some(id) = fragment.id.as_deref().filter(|s| !s.is_empty()) {
            acc.id = id.to_string();
        }
        if let Some(name) = fragment
            .function
            .as_ref()
            .and_then(|f| f.name.as_deref())
            .filter(|s| !s.is_empty())
        {
            acc.name = name.to_string();
        }
        acc.arguments.push_str(new_arguments);

        if let Some(index) = acc.block_index {
            if !new_arguments.is_empty() {
                events.push(input_json_delta(index, new_arguments));
            }
            return;
        }

        if acc.name.is_empty() {
            // Start is deferred until a name shows up; arguments keep accumulating
            return;
        }

        let id = acc.id.clone();
        let name = acc.name.clone();
        let buffered = acc.arguments.clone();

        let index = self
            .state
            .claim_index(self.state.current_block_index + upstream_index);
        self.state.tool_blocks_started.insert(index);
        if let Some(acc) = self.state.tool_calls.get_mut(&upstream_index) {
            acc.block_index = Some(index);
        }

        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::ToolUse {
                id,
                name,
                input: serde_json::Value::Object(serde_json::Map::new()),
            },
        });

        if !buffered.is_empty() {
            events.push(input_json_delta(index, &buffered));
        }
    }

    fn finish(&mut self, reason: &str, events: &mut Vec<StreamEvent>) {
        if self.state.text_block_started {
            events.push(StreamEvent::ContentBlockStop {
                index: self.state.text_block_index,
            });
            self.state.text_block_started = false;
        }

        for acc in self.state.tool_calls.values() {
            if let Some(index) = acc.block_index {
                events.push(StreamEvent::ContentBlockStop { index });
            }
        }

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: map_finish_reason(reason).to_string(),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.state.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);

        self.state.finished = true;
    }
}

fn input_json_delta(index: usize, partial_json: &str) -> StreamEvent {
    StreamEvent::ContentBlockDelta {
        index,
        delta: Delta::InputJsonDelta {
            partial_json: partial_json.to_string(),
        },
    }
}
