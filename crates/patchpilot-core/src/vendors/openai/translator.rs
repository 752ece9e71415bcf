use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::ProviderError;
use crate::event::{NormalizedEvent, ToolDescriptor};
use crate::translate::{ToolOutputTracker, TurnDiffs, error_message, structured_patch};
use crate::vendors::Translator;

use super::client::{BACKEND, PROPOSE_DIFF};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponsesEvent {
    #[serde(rename = "response.created")]
    Created {},
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: OutputItem },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: OutputItem },
    #[serde(rename = "response.completed")]
    Completed {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "response.incomplete")]
    Incomplete {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "response.failed")]
    Failed {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "error")]
    Error {},
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    CodeInterpreterCall {
        id: String,
        #[serde(default)]
        outputs: Option<Vec<Value>>,
        #[serde(default)]
        status: Option<String>,
    },
    WebSearchCall {
        id: String,
        #[serde(default)]
        action: Option<Value>,
        #[serde(default)]
        status: Option<String>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
        #[serde(default)]
        status: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Cumulative log text of a code interpreter call.
fn interpreter_logs(outputs: &[Value]) -> String {
    outputs
        .iter()
        .filter(|o| o.get("type").and_then(Value::as_str) == Some("logs"))
        .filter_map(|o| o.get("logs").and_then(Value::as_str))
        .collect()
}

fn search_query(action: Option<&Value>) -> Vec<String> {
    action
        .and_then(|a| a.get("query"))
        .and_then(Value::as_str)
        .map(|q| vec![q.to_string()])
        .unwrap_or_default()
}

/// Final assistant text of a completed response.
pub(crate) fn extract_output_text(response: &Value) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(items) = response.get("output").and_then(Value::as_array) {
        for item in items {
            if item.get("type").and_then(Value::as_str) != Some("message") {
                continue;
            }
            if let Some(content) = item.get("content").and_then(Value::as_array) {
                parts.extend(
                    content
                        .iter()
                        .filter_map(|c| c.get("text").and_then(Value::as_str)),
                );
            }
        }
    }
    if !parts.is_empty() {
        return Some(parts.concat());
    }
    response
        .get("output_text")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

/// Translates Responses API stream events.
#[derive(Default)]
pub struct OpenAiTranslator {
    tools: ToolOutputTracker,
    diffs: TurnDiffs,
    streamed_text: bool,
}

impl OpenAiTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    fn item_added(&mut self, item: OutputItem) -> Vec<NormalizedEvent> {
        let started = match item {
            OutputItem::CodeInterpreterCall { id, .. } => self
                .tools
                .start(&id, ToolDescriptor::new("code_interpreter", Vec::new())),
            OutputItem::WebSearchCall { id, action, .. } => self.tools.start(
                &id,
                ToolDescriptor::new("web_search", search_query(action.as_ref())),
            ),
            OutputItem::FunctionCall { call_id, name, .. } if name != PROPOSE_DIFF => {
                self.tools.start(&call_id, ToolDescriptor::new(name, Vec::new()))
            }
            OutputItem::FunctionCall { .. } | OutputItem::Other => None,
        };
        started.into_iter().collect()
    }

    fn item_done(&mut self, item: OutputItem) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        match item {
            OutputItem::CodeInterpreterCall {
                id,
                outputs,
                status,
            } => {
                events.extend(
                    self.tools
                        .start(&id, ToolDescriptor::new("code_interpreter", Vec::new())),
                );
                let logs = interpreter_logs(outputs.as_deref().unwrap_or_default());
                events.extend(self.tools.stdout(&id, &logs));
                events.extend(self.tools.finish(&id, None, status));
            }
            OutputItem::WebSearchCall { id, action, status } => {
                events.extend(self.tools.start(
                    &id,
                    ToolDescriptor::new("web_search", search_query(action.as_ref())),
                ));
                events.extend(self.tools.finish(&id, None, status));
            }
            OutputItem::FunctionCall {
                name, arguments, ..
            } if name == PROPOSE_DIFF => {
                let arguments: Value = serde_json::from_str(&arguments).unwrap_or_else(|e| {
                    debug!(error = %e, "unparseable propose_diff arguments");
                    Value::Null
                });
                if let Some(patch) = structured_patch(&arguments) {
                    events.extend(self.diffs.structured(&patch));
                }
            }
            OutputItem::FunctionCall {
                call_id, name, status, ..
            } => {
                events.extend(self.tools.start(&call_id, ToolDescriptor::new(name, Vec::new())));
                events.extend(self.tools.finish(&call_id, None, status));
            }
            OutputItem::Other => {}
        }
        events
    }

    fn end_of_response(&mut self, response: &Value) -> Vec<NormalizedEvent> {
        if !self.streamed_text
            && let Some(text) = extract_output_text(response)
        {
            self.diffs.push_text(&text);
        }
        self.diffs.finish_turn()
    }
}

impl Translator for OpenAiTranslator {
    type Native = Value;

    fn translate(&mut self, value: Value) -> Result<Vec<NormalizedEvent>, ProviderError> {
        let event = match serde_json::from_value::<ResponsesEvent>(value.clone()) {
            Ok(event) => event,
            Err(e) => {
                return Ok(match NormalizedEvent::passthrough(&value) {
                    Some(event) => vec![event],
                    None => {
                        debug!(error = %e, "skipping openai event");
                        Vec::new()
                    }
                });
            }
        };

        let events = match event {
            ResponsesEvent::Created {} => vec![NormalizedEvent::status("Response started")],
            ResponsesEvent::OutputTextDelta { delta } => {
                if delta.is_empty() {
                    Vec::new()
                } else {
                    self.streamed_text = true;
                    self.diffs.push_text(&delta);
                    vec![NormalizedEvent::message(delta)]
                }
            }
            ResponsesEvent::ReasoningSummaryDelta { delta } => {
                if delta.is_empty() {
                    Vec::new()
                } else {
                    vec![NormalizedEvent::thinking(delta)]
                }
            }
            ResponsesEvent::OutputItemAdded { item } => self.item_added(item),
            ResponsesEvent::OutputItemDone { item } => self.item_done(item),
            ResponsesEvent::Completed { response } => self.end_of_response(&response),
            ResponsesEvent::Incomplete { response } => {
                let reason = response
                    .pointer("/incomplete_details/reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown reason");
                let mut events = self.end_of_response(&response);
                events.push(NormalizedEvent::status(format!(
                    "Response incomplete: {reason}"
                )));
                events
            }
            ResponsesEvent::Failed { response } => {
                return Err(ProviderError::rejected(
                    BACKEND,
                    error_message(&response, "OpenAI response failed"),
                ));
            }
            ResponsesEvent::Error {} => {
                return Err(ProviderError::rejected(
                    BACKEND,
                    error_message(&value, "OpenAI stream error"),
                ));
            }
        };
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(values: Vec<Value>) -> Result<Vec<NormalizedEvent>, ProviderError> {
        let mut translator = OpenAiTranslator::new();
        let mut out = Vec::new();
        for value in values {
            out.extend(translator.translate(value)?);
        }
        Ok(out)
    }

    #[test]
    fn text_and_reasoning_deltas() {
        let events = run(vec![
            json!({"type":"response.created","response":{"id":"resp_1"}}),
            json!({"type":"response.in_progress","response":{}}),
            json!({"type":"response.reasoning_summary_text.delta","delta":"Reading"}),
            json!({"type":"response.output_text.delta","delta":"Hi"}),
            json!({"type":"response.completed","response":{"status":"completed"}}),
        ])
        .expect("translate");
        assert_eq!(
            events,
            vec![
                NormalizedEvent::status("Response started"),
                NormalizedEvent::thinking("Reading"),
                NormalizedEvent::message("Hi"),
            ]
        );
    }

    #[test]
    fn code_interpreter_logs_are_coalesced() {
        let events = run(vec![
            json!({"type":"response.output_item.added","item":{"type":"code_interpreter_call","id":"ci_1","status":"in_progress"}}),
            json!({"type":"response.output_item.done","item":{"type":"code_interpreter_call","id":"ci_1","status":"completed","outputs":[{"type":"logs","logs":"ab"},{"type":"image","url":"x"},{"type":"logs","logs":"c"}]}}),
        ])
        .expect("translate");
        let tool = ToolDescriptor::new("code_interpreter", vec![]);
        assert_eq!(
            events,
            vec![
                NormalizedEvent::ToolStart { tool: tool.clone() },
                NormalizedEvent::ToolStdout { text: "abc".into() },
                NormalizedEvent::ToolEnd {
                    tool,
                    exit_code: None,
                    status: Some("completed".into())
                },
            ]
        );
    }

    #[test]
    fn propose_diff_function_call_is_a_structured_diff() {
        let args = serde_json::to_string(&json!({"patch":"--- a/x\n+++ b/x\n"})).expect("json");
        let events = run(vec![
            json!({"type":"response.output_item.added","item":{"type":"function_call","call_id":"call_1","name":"propose_diff","arguments":""}}),
            json!({"type":"response.output_text.delta","delta":"```diff\n--- a/y\n+++ b/y\n```"}),
            json!({"type":"response.output_item.done","item":{"type":"function_call","call_id":"call_1","name":"propose_diff","arguments":args,"status":"completed"}}),
            json!({"type":"response.completed","response":{}}),
        ])
        .expect("translate");
        let diffs: Vec<_> = events
            .into_iter()
            .filter(|e| matches!(e, NormalizedEvent::Diff { .. }))
            .collect();
        assert_eq!(diffs, vec![NormalizedEvent::diff("--- a/x\n+++ b/x")]);
    }

    #[test]
    fn completed_output_feeds_the_fallback_when_nothing_streamed() {
        let events = run(vec![json!({
            "type":"response.completed",
            "response": {"output":[{"type":"message","content":[{"type":"output_text","text":"```patch\n+z\n```"}]}]}
        })])
        .expect("translate");
        assert_eq!(events, vec![NormalizedEvent::diff("+z")]);
    }

    #[test]
    fn failures_are_fatal() {
        let err = run(vec![json!({"type":"response.failed","response":{"error":{"code":"server_error","message":"backend exploded"}}})])
            .expect_err("fatal");
        assert_eq!(err.message(), "backend exploded");

        let err = run(vec![json!({"type":"error","code":"rate_limit","message":"slow down"})])
            .expect_err("fatal");
        assert_eq!(err.message(), "slow down");
    }

    #[test]
    fn incomplete_is_a_status() {
        let events = run(vec![json!({"type":"response.incomplete","response":{"incomplete_details":{"reason":"max_output_tokens"}}})])
            .expect("translate");
        assert_eq!(
            events,
            vec![NormalizedEvent::status("Response incomplete: max_output_tokens")]
        );
    }

    #[test]
    fn web_search_uses_query_as_args() {
        let events = run(vec![
            json!({"type":"response.output_item.added","item":{"type":"web_search_call","id":"ws_1","status":"in_progress"}}),
            json!({"type":"response.output_item.done","item":{"type":"web_search_call","id":"ws_1","status":"completed","action":{"type":"search","query":"tokio select"}}}),
        ])
        .expect("translate");
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            NormalizedEvent::ToolEnd {
                tool: ToolDescriptor::new("web_search", vec![]),
                exit_code: None,
                status: Some("completed".into())
            }
        );
    }
}
