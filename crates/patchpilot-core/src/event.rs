use serde::{Deserialize, Serialize};

/// Display descriptor of one tool invocation.
///
/// Names repeat across calls; the provider call id (kept by the translator)
/// is what identifies a single invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Display form of a shell command line: first word as the name.
    pub fn from_command_line(command: &str) -> Self {
        let mut words = command.split_whitespace().map(ToOwned::to_owned);
        let name = words.next().unwrap_or_else(|| "shell".to_string());
        Self::new(name, words.collect())
    }

    /// Transcript line written when the tool starts.
    pub fn start_marker(&self) -> String {
        if self.args.is_empty() {
            format!("$ {}", self.name)
        } else {
            format!("$ {} {}", self.name, self.args.join(" "))
        }
    }
}

/// The closed vocabulary every backend emits, whatever the provider.
///
/// Serialized as one JSON object per event with a `type` tag, which is the
/// exact frame format written to the event stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NormalizedEvent {
    #[serde(rename = "thinking")]
    Thinking { text: String },
    #[serde(rename = "message")]
    Message { text: String },
    #[serde(rename = "status")]
    Status { text: String },
    #[serde(rename = "diff")]
    Diff { patch: String },
    #[serde(rename = "tool.start")]
    ToolStart { tool: ToolDescriptor },
    #[serde(rename = "tool.stdout")]
    ToolStdout { text: String },
    #[serde(rename = "tool.stderr")]
    ToolStderr { text: String },
    #[serde(rename = "tool.end")]
    ToolEnd {
        tool: ToolDescriptor,
        #[serde(rename = "exitCode", default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "error")]
        message: String,
    },
}

/// Every `type` tag of [`NormalizedEvent`].
pub const EVENT_TAGS: &[&str] = &[
    "thinking",
    "message",
    "status",
    "diff",
    "tool.start",
    "tool.stdout",
    "tool.stderr",
    "tool.end",
    "done",
    "error",
];

impl NormalizedEvent {
    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::Message { text: text.into() }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::Status { text: text.into() }
    }

    pub fn diff(patch: impl Into<String>) -> Self {
        Self::Diff {
            patch: patch.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The wire `type` tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::Message { .. } => "message",
            Self::Status { .. } => "status",
            Self::Diff { .. } => "diff",
            Self::ToolStart { .. } => "tool.start",
            Self::ToolStdout { .. } => "tool.stdout",
            Self::ToolStderr { .. } => "tool.stderr",
            Self::ToolEnd { .. } => "tool.end",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    /// Compatibility escape hatch for evolving provider protocols: accepts a
    /// native value only if its `type` is already one of ours and it parses
    /// as that variant. Terminal tags are never passed through; termination
    /// belongs to the session controller.
    pub fn passthrough(value: &serde_json::Value) -> Option<Self> {
        let tag = value.get("type")?.as_str()?;
        if !EVENT_TAGS.contains(&tag) {
            return None;
        }
        serde_json::from_value::<Self>(value.clone())
            .ok()
            .filter(|event| !event.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_dotted_tags_and_camel_case_exit_code() {
        let event = NormalizedEvent::ToolEnd {
            tool: ToolDescriptor::new("shell", vec!["ls".into()]),
            exit_code: Some(0),
            status: None,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "type": "tool.end",
                "tool": {"name": "shell", "args": ["ls"]},
                "exitCode": 0
            })
        );
        assert_eq!(
            serde_json::to_value(NormalizedEvent::error("boom")).expect("serialize"),
            serde_json::json!({"type": "error", "error": "boom"})
        );
        assert_eq!(
            serde_json::to_value(NormalizedEvent::Done).expect("serialize"),
            serde_json::json!({"type": "done"})
        );
    }

    #[test]
    fn passthrough_accepts_only_known_non_terminal_tags() {
        let status = serde_json::json!({"type": "status", "text": "indexing"});
        assert_eq!(
            NormalizedEvent::passthrough(&status),
            Some(NormalizedEvent::status("indexing"))
        );
        assert_eq!(
            NormalizedEvent::passthrough(&serde_json::json!({"type": "done"})),
            None
        );
        assert_eq!(
            NormalizedEvent::passthrough(&serde_json::json!({"type": "status"})),
            None
        );
        assert_eq!(
            NormalizedEvent::passthrough(&serde_json::json!({"type": "session.configured"})),
            None
        );
    }

    #[test]
    fn start_marker_includes_args() {
        assert_eq!(
            ToolDescriptor::new("run_command", vec!["cargo test".into()]).start_marker(),
            "$ run_command cargo test"
        );
        assert_eq!(ToolDescriptor::new("web_search", vec![]).start_marker(), "$ web_search");
    }
}
