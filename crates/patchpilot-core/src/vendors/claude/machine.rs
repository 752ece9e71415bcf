//! Multi-turn run driver for the Messages API.
//!
//! A run alternates between reading one native stream and executing the
//! client-side tool calls it requested, resubmitting their results as a new
//! request until the model stops asking for tools.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use futures::StreamExt as _;
use futures::stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::backend::{AbortSignal, EventStream};
use crate::errors::ProviderError;
use crate::event::{NormalizedEvent, ToolDescriptor};
use crate::translate::{ToolOutputTracker, TurnDiffs, error_message, structured_patch};

use super::client::{BACKEND, MessageSource, NativeStream, RequestTemplate};
use super::tools::{
    CommandRunner, CommandUpdate, OutputTail, PROPOSE_DIFF, RUN_COMMAND, RunningCommand,
    STDERR_TAIL_BYTES, STDOUT_TAIL_BYTES, command_result, end_status,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeEvent {
    MessageStart {},
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
    },
    MessageStop {},
    Ping {},
    Error {
        #[serde(default)]
        error: Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
        #[serde(default)]
        signature: String,
    },
    RedactedThinking {
        #[serde(default)]
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug)]
enum Block {
    Text(String),
    Thinking { thinking: String, signature: String },
    RedactedThinking(String),
    ToolUse {
        id: String,
        name: String,
        input: Value,
        partial_json: String,
    },
}

/// A tool call requested by the model, with its parsed input.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

fn tool_input(input: &Value, partial_json: &str) -> Value {
    if partial_json.trim().is_empty() {
        return input.clone();
    }
    serde_json::from_str(partial_json).unwrap_or_else(|e| {
        debug!(error = %e, "unparseable tool input");
        Value::Null
    })
}

/// Accumulates one native stream into the assistant message it describes.
#[derive(Debug, Default)]
pub(crate) struct TurnAssembler {
    blocks: BTreeMap<usize, Block>,
    stop_reason: Option<String>,
    stopped: bool,
}

impl TurnAssembler {
    pub fn apply(
        &mut self,
        value: Value,
        diffs: &mut TurnDiffs,
    ) -> Result<Vec<NormalizedEvent>, ProviderError> {
        let event = match serde_json::from_value::<ClaudeEvent>(value.clone()) {
            Ok(event) => event,
            Err(e) => {
                return Ok(match NormalizedEvent::passthrough(&value) {
                    Some(event) => vec![event],
                    None => {
                        debug!(error = %e, "skipping unrecognized claude event");
                        Vec::new()
                    }
                });
            }
        };

        let mut events = Vec::new();
        match event {
            ClaudeEvent::MessageStart {} | ClaudeEvent::Ping {} => {}
            ClaudeEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let block = match content_block {
                    ContentBlock::Text { text } => {
                        if !text.is_empty() {
                            diffs.push_text(&text);
                            events.push(NormalizedEvent::message(text.clone()));
                        }
                        Block::Text(text)
                    }
                    ContentBlock::Thinking {
                        thinking,
                        signature,
                    } => {
                        if !thinking.is_empty() {
                            events.push(NormalizedEvent::thinking(thinking.clone()));
                        }
                        Block::Thinking {
                            thinking,
                            signature,
                        }
                    }
                    ContentBlock::RedactedThinking { data } => Block::RedactedThinking(data),
                    ContentBlock::ToolUse { id, name, input } => Block::ToolUse {
                        id,
                        name,
                        input,
                        partial_json: String::new(),
                    },
                    ContentBlock::Other => return Ok(events),
                };
                self.blocks.insert(index, block);
            }
            ClaudeEvent::ContentBlockDelta { index, delta } => {
                match (self.blocks.get_mut(&index), delta) {
                    (Some(Block::Text(text)), Delta::TextDelta { text: chunk }) => {
                        text.push_str(&chunk);
                        diffs.push_text(&chunk);
                        events.push(NormalizedEvent::message(chunk));
                    }
                    (Some(Block::Thinking { thinking, .. }), Delta::ThinkingDelta { thinking: chunk }) => {
                        thinking.push_str(&chunk);
                        events.push(NormalizedEvent::thinking(chunk));
                    }
                    (Some(Block::Thinking { signature, .. }), Delta::SignatureDelta { signature: sig }) => {
                        signature.push_str(&sig);
                    }
                    (Some(Block::ToolUse { partial_json, .. }), Delta::InputJsonDelta { partial_json: chunk }) => {
                        partial_json.push_str(&chunk);
                    }
                    _ => debug!(index, "ignoring delta for unknown block"),
                }
            }
            ClaudeEvent::ContentBlockStop { index } => {
                if let Some(Block::ToolUse {
                    name,
                    input,
                    partial_json,
                    ..
                }) = self.blocks.get(&index)
                    && name == PROPOSE_DIFF
                    && let Some(patch) = structured_patch(&tool_input(input, partial_json))
                {
                    events.extend(diffs.structured(&patch));
                }
            }
            ClaudeEvent::MessageDelta { delta } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
            }
            ClaudeEvent::MessageStop {} => self.stopped = true,
            ClaudeEvent::Error { error } => {
                return Err(ProviderError::rejected(
                    BACKEND,
                    error_message(&json!({ "error": error }), "Claude stream error"),
                ));
            }
        }
        Ok(events)
    }

    /// Assistant content to replay in the next request.
    pub fn assistant_content(&self) -> Vec<Value> {
        self.blocks
            .values()
            .filter_map(|block| match block {
                Block::Text(text) if text.is_empty() => None,
                Block::Text(text) => Some(json!({ "type": "text", "text": text })),
                Block::Thinking {
                    thinking,
                    signature,
                } => Some(json!({ "type": "thinking", "thinking": thinking, "signature": signature })),
                Block::RedactedThinking(data) => {
                    Some(json!({ "type": "redacted_thinking", "data": data }))
                }
                Block::ToolUse {
                    id,
                    name,
                    input,
                    partial_json,
                } => {
                    let input = match tool_input(input, partial_json) {
                        Value::Object(map) => Value::Object(map),
                        _ => json!({}),
                    };
                    Some(json!({ "type": "tool_use", "id": id, "name": name, "input": input }))
                }
            })
            .collect()
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.blocks
            .values()
            .filter_map(|block| match block {
                Block::ToolUse {
                    id,
                    name,
                    input,
                    partial_json,
                } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: tool_input(input, partial_json),
                }),
                _ => None,
            })
            .collect()
    }
}

struct ActiveCommand {
    call_id: String,
    command: RunningCommand,
    stdout: OutputTail,
    stderr: OutputTail,
}

struct ToolExecution {
    queue: VecDeque<ToolCall>,
    results: Vec<Value>,
    active: Option<ActiveCommand>,
}

enum Phase {
    AwaitingNativeStream(NativeStream),
    AwaitingToolExecution(ToolExecution),
    Resubmitting,
    Finished,
}

fn tool_result(call_id: &str, content: impl Into<String>, is_error: bool) -> Value {
    json!({
        "type": "tool_result",
        "tool_use_id": call_id,
        "content": content.into(),
        "is_error": is_error,
    })
}

/// State machine for one Claude run.
pub(crate) struct ClaudeRun {
    source: Arc<dyn MessageSource>,
    runner: CommandRunner,
    template: RequestTemplate,
    messages: Vec<Value>,
    phase: Phase,
    turn: TurnAssembler,
    diffs: TurnDiffs,
    tools: ToolOutputTracker,
    turns: usize,
    max_turns: usize,
}

impl ClaudeRun {
    /// Opens the first request. Connection and HTTP failures surface here.
    pub async fn start(
        source: Arc<dyn MessageSource>,
        runner: CommandRunner,
        template: RequestTemplate,
        prompt: &str,
        max_turns: usize,
    ) -> Result<Self, ProviderError> {
        let mut run = Self {
            source,
            runner,
            template,
            messages: vec![json!({ "role": "user", "content": prompt })],
            phase: Phase::Resubmitting,
            turn: TurnAssembler::default(),
            diffs: TurnDiffs::new(),
            tools: ToolOutputTracker::new(),
            turns: 0,
            max_turns: max_turns.max(1),
        };
        let native = run.open_turn().await?;
        run.phase = Phase::AwaitingNativeStream(native);
        Ok(run)
    }

    async fn open_turn(&mut self) -> Result<NativeStream, ProviderError> {
        self.turns += 1;
        debug!(turn = self.turns, "claude request");
        let body = self.template.body(&self.messages);
        self.source.open(&body).await
    }

    /// Advances the machine. `None` once the run is over.
    pub async fn step(&mut self) -> Result<Option<Vec<NormalizedEvent>>, ProviderError> {
        match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Finished => Ok(None),
            Phase::Resubmitting => {
                if self.turns >= self.max_turns {
                    info!(turns = self.turns, "claude run hit the turn limit");
                    return Ok(Some(vec![NormalizedEvent::status(format!(
                        "Stopped after {} turns",
                        self.turns
                    ))]));
                }
                let native = self.open_turn().await?;
                self.phase = Phase::AwaitingNativeStream(native);
                Ok(Some(Vec::new()))
            }
            Phase::AwaitingNativeStream(mut native) => match native.next().await {
                Some(Ok(value)) => {
                    let events = self.turn.apply(value, &mut self.diffs)?;
                    self.phase = Phase::AwaitingNativeStream(native);
                    Ok(Some(events))
                }
                Some(Err(err)) => Err(err),
                None => self.end_turn().map(Some),
            },
            Phase::AwaitingToolExecution(mut execution) => {
                let events = self.execute(&mut execution).await;
                self.phase = if execution.active.is_none() && execution.queue.is_empty() {
                    self.messages.push(json!({ "role": "user", "content": execution.results }));
                    Phase::Resubmitting
                } else {
                    Phase::AwaitingToolExecution(execution)
                };
                Ok(Some(events))
            }
        }
    }

    fn end_turn(&mut self) -> Result<Vec<NormalizedEvent>, ProviderError> {
        let turn = std::mem::take(&mut self.turn);
        if !turn.stopped {
            return Err(ProviderError::transport(
                BACKEND,
                "Claude stream ended before message_stop",
            ));
        }
        // Diffs are de-duplicated across every request of the run.
        let mut events = self.diffs.flush_text();
        let content = turn.assistant_content();
        if !content.is_empty() {
            self.messages
                .push(json!({ "role": "assistant", "content": content }));
        }
        let calls = turn.tool_calls();
        match turn.stop_reason.as_deref() {
            Some("tool_use") if !calls.is_empty() => {
                self.phase = Phase::AwaitingToolExecution(ToolExecution {
                    queue: calls.into(),
                    results: Vec::new(),
                    active: None,
                });
            }
            Some("max_tokens") => {
                events.push(NormalizedEvent::status("Stopped: output token limit reached"));
            }
            _ => {}
        }
        Ok(events)
    }

    async fn execute(&mut self, execution: &mut ToolExecution) -> Vec<NormalizedEvent> {
        if let Some(mut active) = execution.active.take() {
            return match active.command.next_update().await {
                Some(CommandUpdate::Stdout(chunk)) => {
                    active.stdout.push(&chunk);
                    let event = self.tools.append(&active.call_id, &chunk);
                    execution.active = Some(active);
                    event.into_iter().collect()
                }
                Some(CommandUpdate::Stderr(chunk)) => {
                    active.stderr.push(&chunk);
                    execution.active = Some(active);
                    vec![NormalizedEvent::ToolStderr { text: chunk }]
                }
                Some(CommandUpdate::Exited { code, timed_out }) => {
                    self.finish_command(execution, active, code, timed_out)
                }
                None => self.finish_command(execution, active, None, false),
            };
        }

        let Some(call) = execution.queue.pop_front() else {
            return Vec::new();
        };
        match call.name.as_str() {
            RUN_COMMAND => {
                let command = call
                    .input
                    .get("command")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default();
                if command.is_empty() {
                    execution
                        .results
                        .push(tool_result(&call.id, "missing `command` input", true));
                    return Vec::new();
                }
                let mut events: Vec<_> = self
                    .tools
                    .start(&call.id, ToolDescriptor::from_command_line(command))
                    .into_iter()
                    .collect();
                match self.runner.start(command) {
                    Ok(running) => {
                        execution.active = Some(ActiveCommand {
                            call_id: call.id,
                            command: running,
                            stdout: OutputTail::new(STDOUT_TAIL_BYTES),
                            stderr: OutputTail::new(STDERR_TAIL_BYTES),
                        });
                    }
                    Err(e) => {
                        let message = format!("failed to start command: {e}");
                        events.push(NormalizedEvent::ToolStderr {
                            text: message.clone(),
                        });
                        events.extend(self.tools.finish(&call.id, None, Some("failed".into())));
                        execution.results.push(tool_result(&call.id, message, true));
                    }
                }
                events
            }
            PROPOSE_DIFF => {
                let result = match structured_patch(&call.input) {
                    Some(_) => tool_result(&call.id, "Patch recorded for review.", false),
                    None => tool_result(&call.id, "`patch` was empty", true),
                };
                execution.results.push(result);
                Vec::new()
            }
            other => {
                debug!(tool = other, "model called an undeclared tool");
                execution
                    .results
                    .push(tool_result(&call.id, format!("unknown tool `{other}`"), true));
                Vec::new()
            }
        }
    }

    fn finish_command(
        &mut self,
        execution: &mut ToolExecution,
        active: ActiveCommand,
        code: Option<i32>,
        timed_out: bool,
    ) -> Vec<NormalizedEvent> {
        let (content, is_error) = command_result(
            active.stdout.as_str(),
            active.stderr.as_str(),
            code,
            timed_out,
        );
        execution
            .results
            .push(tool_result(&active.call_id, content, is_error));
        self.tools
            .finish(
                &active.call_id,
                code,
                Some(end_status(code, timed_out).to_string()),
            )
            .into_iter()
            .collect()
    }

    /// Drives the machine as an event stream that stops when released.
    pub fn into_stream(self, abort: AbortSignal) -> EventStream {
        struct State {
            run: ClaudeRun,
            abort: AbortSignal,
            pending: VecDeque<NormalizedEvent>,
        }

        enum Next {
            Released,
            Step(Result<Option<Vec<NormalizedEvent>>, ProviderError>),
        }

        let events = stream::try_unfold(
            State {
                run: self,
                abort,
                pending: VecDeque::new(),
            },
            |mut state| async move {
                loop {
                    if let Some(event) = state.pending.pop_front() {
                        return Ok(Some((event, state)));
                    }
                    let next = tokio::select! {
                        biased;
                        _ = state.abort.aborted() => Next::Released,
                        step = state.run.step() => Next::Step(step),
                    };
                    match next {
                        Next::Released => {
                            debug!("claude run released");
                            return Ok(None);
                        }
                        Next::Step(step) => match step? {
                            Some(events) => state.pending.extend(events),
                            None => return Ok(None),
                        },
                    }
                }
            },
        );
        Box::pin(events)
    }
}
