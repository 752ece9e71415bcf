use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::ProviderError;
use crate::event::{NormalizedEvent, ToolDescriptor};
use crate::model::BackendKind;
use crate::translate::{ToolOutputTracker, TurnDiffs, error_message, structured_patch};
use crate::vendors::Translator;

use super::client::CodexOutput;

const BACKEND: BackendKind = BackendKind::Codex;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ThreadEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted {
        #[serde(default)]
        thread_id: Option<String>,
    },
    #[serde(rename = "turn.started")]
    TurnStarted {},
    #[serde(rename = "turn.completed")]
    TurnCompleted {},
    #[serde(rename = "turn.failed")]
    TurnFailed {
        #[serde(default)]
        error: Value,
    },
    #[serde(rename = "item.started")]
    ItemStarted { item: ThreadItem },
    #[serde(rename = "item.updated")]
    ItemUpdated { item: ThreadItem },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: ThreadItem },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ThreadItem {
    id: String,
    #[serde(flatten)]
    details: ItemDetails,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ItemDetails {
    AgentMessage {
        #[serde(default)]
        text: String,
    },
    Reasoning {
        #[serde(default)]
        text: String,
    },
    CommandExecution {
        #[serde(default)]
        command: String,
        #[serde(default)]
        aggregated_output: String,
        #[serde(default)]
        exit_code: Option<i32>,
        #[serde(default)]
        status: Option<String>,
    },
    FileChange {
        #[serde(default)]
        changes: Vec<Value>,
    },
    McpToolCall {
        #[serde(default)]
        server: String,
        #[serde(default)]
        tool: String,
        #[serde(default)]
        status: Option<String>,
    },
    WebSearch {
        #[serde(default)]
        query: String,
    },
    TodoList {
        #[serde(default)]
        items: Vec<TodoItem>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TodoItem {
    #[serde(default)]
    completed: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Stage {
    Started,
    Updated,
    Completed,
}

/// Older CLI builds tag items with `item_type`.
fn normalize_item_tag(value: &mut Value) {
    let Some(item) = value.get_mut("item").and_then(Value::as_object_mut) else {
        return;
    };
    if !item.contains_key("type")
        && let Some(tag) = item.get("item_type").cloned()
    {
        item.insert("type".into(), tag);
    }
}

/// Translates `codex exec --json` thread events.
#[derive(Default)]
pub struct CodexTranslator {
    tools: ToolOutputTracker,
    diffs: TurnDiffs,
    turn_completed: bool,
}

impl CodexTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    fn translate_event(&mut self, mut value: Value) -> Result<Vec<NormalizedEvent>, ProviderError> {
        normalize_item_tag(&mut value);
        let event = match serde_json::from_value::<ThreadEvent>(value.clone()) {
            Ok(event) => event,
            Err(e) => {
                return Ok(match NormalizedEvent::passthrough(&value) {
                    Some(event) => vec![event],
                    None => {
                        debug!(error = %e, "skipping unrecognized codex event");
                        Vec::new()
                    }
                });
            }
        };

        let events = match event {
            ThreadEvent::ThreadStarted { thread_id } => {
                let text = match thread_id {
                    Some(id) => format!("Codex session {id} started"),
                    None => "Codex session started".to_string(),
                };
                vec![NormalizedEvent::status(text)]
            }
            ThreadEvent::TurnStarted {} => {
                self.turn_completed = false;
                vec![NormalizedEvent::status("Working")]
            }
            ThreadEvent::TurnCompleted {} => {
                self.turn_completed = true;
                self.diffs.finish_turn()
            }
            ThreadEvent::TurnFailed { error } => {
                return Err(ProviderError::rejected(
                    BACKEND,
                    error_message(&serde_json::json!({ "error": error }), "Codex turn failed"),
                ));
            }
            ThreadEvent::Error { message } => {
                let message = message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "Codex stream error".to_string());
                return Err(ProviderError::rejected(BACKEND, message));
            }
            ThreadEvent::ItemStarted { item } => self.item(item, Stage::Started),
            ThreadEvent::ItemUpdated { item } => self.item(item, Stage::Updated),
            ThreadEvent::ItemCompleted { item } => self.item(item, Stage::Completed),
        };
        Ok(events)
    }

    fn item(&mut self, item: ThreadItem, stage: Stage) -> Vec<NormalizedEvent> {
        let id = item.id;
        let completed = stage == Stage::Completed;
        let mut events = Vec::new();
        match item.details {
            ItemDetails::AgentMessage { text } => {
                if completed && !text.trim().is_empty() {
                    self.diffs.push_text(&text);
                    self.diffs.push_text("\n");
                    events.push(NormalizedEvent::message(text));
                }
            }
            ItemDetails::Reasoning { text } => {
                if completed && !text.trim().is_empty() {
                    events.push(NormalizedEvent::thinking(text));
                }
            }
            ItemDetails::CommandExecution {
                command,
                aggregated_output,
                exit_code,
                status,
            } => {
                events.extend(self.tools.start(&id, ToolDescriptor::from_command_line(&command)));
                events.extend(self.tools.stdout(&id, &aggregated_output));
                if completed {
                    events.extend(self.tools.finish(&id, exit_code, status));
                }
            }
            ItemDetails::FileChange { changes } => {
                if completed {
                    let paths: Vec<String> = changes
                        .iter()
                        .filter_map(|c| c.get("path").and_then(Value::as_str))
                        .map(ToOwned::to_owned)
                        .collect();
                    let payload = serde_json::json!({ "changes": changes });
                    if let Some(patch) = structured_patch(&payload) {
                        events.extend(self.diffs.structured(&patch));
                    }
                    if !paths.is_empty() {
                        events.push(NormalizedEvent::status(format!(
                            "Edited {}",
                            paths.join(", ")
                        )));
                    }
                }
            }
            ItemDetails::McpToolCall {
                server,
                tool,
                status,
            } => {
                let descriptor = ToolDescriptor::new(format!("{server}.{tool}"), Vec::new());
                events.extend(self.tools.start(&id, descriptor));
                if completed {
                    events.extend(self.tools.finish(&id, None, status));
                }
            }
            ItemDetails::WebSearch { query } => {
                if completed {
                    events.push(NormalizedEvent::status(format!("Searched the web: {query}")));
                }
            }
            ItemDetails::TodoList { items } => {
                let done = items.iter().filter(|item| item.completed).count();
                events.push(NormalizedEvent::status(format!(
                    "Plan: {done}/{} steps done",
                    items.len()
                )));
            }
            ItemDetails::Error { message } => {
                if !message.trim().is_empty() {
                    events.push(NormalizedEvent::status(message));
                }
            }
            ItemDetails::Other => {}
        }
        events
    }
}

impl Translator for CodexTranslator {
    type Native = CodexOutput;

    fn translate(&mut self, native: CodexOutput) -> Result<Vec<NormalizedEvent>, ProviderError> {
        match native {
            CodexOutput::Event(value) => self.translate_event(value),
            CodexOutput::Exited { code, stderr_tail } => {
                if self.turn_completed || code == Some(0) {
                    return Ok(Vec::new());
                }
                let code = code.map_or_else(|| "a signal".to_string(), |c| c.to_string());
                let mut message = format!("codex exited with {code}");
                if !stderr_tail.is_empty() {
                    message.push_str(": ");
                    message.push_str(&stderr_tail);
                }
                Err(ProviderError::rejected(BACKEND, message))
            }
        }
    }

    fn finish(&mut self) -> Result<Vec<NormalizedEvent>, ProviderError> {
        if self.turn_completed {
            Ok(Vec::new())
        } else {
            Ok(self.diffs.finish_turn())
        }
    }
}
