//! Algorithms shared by the provider translators: tool-output coalescing,
//! diff discovery, and provider error messages.

use std::collections::HashMap;

use crate::event::{NormalizedEvent, ToolDescriptor};

/// Per-call output bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolOutputState {
    pub bytes_flushed: usize,
}

struct OpenCall {
    tool: ToolDescriptor,
    output: ToolOutputState,
}

/// Coalesces cumulative tool output into unseen suffixes.
///
/// State lives only while a call is open: `finish` drops it.
#[derive(Default)]
pub struct ToolOutputTracker {
    calls: HashMap<String, OpenCall>,
}

impl ToolOutputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn open_calls(&self) -> usize {
        self.calls.len()
    }

    /// Emits `tool.start` on first sight of `call_id`, nothing afterwards.
    pub fn start(&mut self, call_id: &str, tool: ToolDescriptor) -> Option<NormalizedEvent> {
        if self.calls.contains_key(call_id) {
            return None;
        }
        self.calls.insert(
            call_id.to_string(),
            OpenCall {
                tool: tool.clone(),
                output: ToolOutputState::default(),
            },
        );
        Some(NormalizedEvent::ToolStart { tool })
    }

    /// Returns the part of `cumulative` not yet flushed for `call_id`.
    ///
    /// `bytes_flushed` never decreases. A cumulative string that shrank, or
    /// whose split point is not a char boundary, yields nothing.
    pub fn take_suffix(&mut self, call_id: &str, cumulative: &str) -> Option<String> {
        let call = self.calls.get_mut(call_id)?;
        let flushed = call.output.bytes_flushed;
        if cumulative.len() <= flushed {
            return None;
        }
        let suffix = cumulative.get(flushed..)?;
        call.output.bytes_flushed = cumulative.len();
        Some(suffix.to_string())
    }

    /// `tool.stdout` for the unseen suffix, if any.
    pub fn stdout(&mut self, call_id: &str, cumulative: &str) -> Option<NormalizedEvent> {
        self.take_suffix(call_id, cumulative)
            .map(|text| NormalizedEvent::ToolStdout { text })
    }

    /// `tool.stdout` for an incremental chunk of an open call.
    pub fn append(&mut self, call_id: &str, chunk: &str) -> Option<NormalizedEvent> {
        let call = self.calls.get_mut(call_id)?;
        if chunk.is_empty() {
            return None;
        }
        call.output.bytes_flushed += chunk.len();
        Some(NormalizedEvent::ToolStdout {
            text: chunk.to_string(),
        })
    }

    pub fn bytes_flushed(&self, call_id: &str) -> Option<usize> {
        self.calls.get(call_id).map(|c| c.output.bytes_flushed)
    }

    /// Emits `tool.end` and discards the call state. Unknown calls yield nothing.
    pub fn finish(
        &mut self,
        call_id: &str,
        exit_code: Option<i32>,
        status: Option<String>,
    ) -> Option<NormalizedEvent> {
        let call = self.calls.remove(call_id)?;
        Some(NormalizedEvent::ToolEnd {
            tool: call.tool,
            exit_code,
            status,
        })
    }
}

/// Tracks diffs reported during one turn.
///
/// Once a structured diff fires, the textual fallback is suppressed for the
/// rest of the turn. The same patch is never reported twice in a turn.
#[derive(Default)]
pub struct TurnDiffs {
    emitted: Vec<String>,
    structured_seen: bool,
    visible_text: String,
}

impl TurnDiffs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates assistant-visible text for the fallback scan.
    pub fn push_text(&mut self, text: &str) {
        self.visible_text.push_str(text);
    }

    pub fn structured(&mut self, patch: &str) -> Option<NormalizedEvent> {
        let patch = patch.trim();
        if patch.is_empty() {
            return None;
        }
        self.structured_seen = true;
        self.emit(patch)
    }

    /// Runs the textual fallback over the text seen so far, keeping what was
    /// already reported. For turns that span several provider requests.
    pub fn flush_text(&mut self) -> Vec<NormalizedEvent> {
        let text = std::mem::take(&mut self.visible_text);
        if self.structured_seen {
            return Vec::new();
        }
        fenced_patches(&text)
            .iter()
            .filter_map(|patch| self.emit(patch))
            .collect()
    }

    /// Ends the turn: runs the textual fallback and resets for the next turn.
    pub fn finish_turn(&mut self) -> Vec<NormalizedEvent> {
        let events = self.flush_text();
        self.emitted.clear();
        self.structured_seen = false;
        events
    }

    fn emit(&mut self, patch: &str) -> Option<NormalizedEvent> {
        if self.emitted.iter().any(|p| p == patch) {
            return None;
        }
        self.emitted.push(patch.to_string());
        Some(NormalizedEvent::diff(patch))
    }
}

/// Trimmed bodies of every fenced code block labeled `diff` or `patch`.
///
/// An unterminated trailing block is ignored.
pub fn fenced_patches(text: &str) -> Vec<String> {
    enum Fence<'a> {
        Outside,
        Patch(Vec<&'a str>),
        Other,
    }

    let mut patches = Vec::new();
    let mut fence = Fence::Outside;
    for line in text.lines() {
        let trimmed = line.trim();
        let closing = trimmed == "```";
        fence = match fence {
            Fence::Outside => match trimmed.strip_prefix("```") {
                Some(info) => {
                    let label = info.split_whitespace().next().unwrap_or("");
                    if label.eq_ignore_ascii_case("diff") || label.eq_ignore_ascii_case("patch") {
                        Fence::Patch(Vec::new())
                    } else {
                        Fence::Other
                    }
                }
                None => Fence::Outside,
            },
            Fence::Other if closing => Fence::Outside,
            Fence::Other => Fence::Other,
            Fence::Patch(body) if closing => {
                let patch = body.join("\n").trim().to_string();
                if !patch.is_empty() {
                    patches.push(patch);
                }
                Fence::Outside
            }
            Fence::Patch(mut body) => {
                body.push(line);
                Fence::Patch(body)
            }
        };
    }
    patches
}

const PATCH_KEYS: &[&str] = &["patch", "diff", "unified_diff"];

/// Structured patch payload: a direct `patch`/`diff` field, the same field
/// nested one level (e.g. under `item` or `input`), or the first entry of a
/// `changes` list that carries one.
pub fn structured_patch(value: &serde_json::Value) -> Option<String> {
    direct_patch(value)
        .or_else(|| {
            ["item", "input", "arguments", "result"]
                .iter()
                .filter_map(|key| value.get(*key))
                .find_map(direct_patch)
        })
        .or_else(|| {
            value
                .get("changes")
                .and_then(|v| v.as_array())
                .and_then(|changes| changes.iter().find_map(direct_patch))
        })
}

fn direct_patch(value: &serde_json::Value) -> Option<String> {
    PATCH_KEYS
        .iter()
        .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Message from a provider error payload, with a generic fallback.
pub fn error_message(value: &serde_json::Value, fallback: &str) -> String {
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .or_else(|| value.get("error").and_then(|v| v.as_str()))
        .or_else(|| value.get("message").and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> ToolDescriptor {
        ToolDescriptor::new("shell", vec!["ls".into()])
    }

    #[test]
    fn stdout_chunks_concatenate_to_final_output() {
        let updates = ["", "a", "ab", "ab", "abc\n", "abc\ndéf", "abc\ndéf\n"];
        let mut tracker = ToolOutputTracker::new();
        assert!(tracker.start("c1", shell()).is_some());
        let mut seen = String::new();
        for update in updates {
            if let Some(NormalizedEvent::ToolStdout { text }) = tracker.stdout("c1", update) {
                assert!(!text.is_empty());
                seen.push_str(&text);
            }
            assert_eq!(tracker.bytes_flushed("c1"), Some(seen.len()));
        }
        assert_eq!(seen, "abc\ndéf\n");
    }

    #[test]
    fn appended_chunks_advance_the_counter() {
        let mut tracker = ToolOutputTracker::new();
        assert!(tracker.append("c1", "early").is_none());
        tracker.start("c1", shell());
        assert_eq!(
            tracker.append("c1", "a\n"),
            Some(NormalizedEvent::ToolStdout { text: "a\n".into() })
        );
        assert!(tracker.append("c1", "").is_none());
        tracker.append("c1", "é");
        assert_eq!(tracker.bytes_flushed("c1"), Some(4));
    }

    #[test]
    fn start_is_emitted_once_per_call_id() {
        let mut tracker = ToolOutputTracker::new();
        assert!(tracker.start("c1", shell()).is_some());
        assert!(tracker.start("c1", shell()).is_none());
        assert!(tracker.start("c2", shell()).is_some());
        assert_eq!(tracker.open_calls(), 2);
    }

    #[test]
    fn shrinking_output_is_ignored_and_counter_never_decreases() {
        let mut tracker = ToolOutputTracker::new();
        tracker.start("c1", shell());
        assert_eq!(tracker.take_suffix("c1", "hello"), Some("hello".into()));
        assert_eq!(tracker.take_suffix("c1", "he"), None);
        assert_eq!(tracker.bytes_flushed("c1"), Some(5));
        assert_eq!(tracker.take_suffix("c1", "hello!"), Some("!".into()));
    }

    #[test]
    fn finish_discards_state() {
        let mut tracker = ToolOutputTracker::new();
        tracker.start("c1", shell());
        let end = tracker.finish("c1", Some(2), Some("failed".into()));
        assert_eq!(
            end,
            Some(NormalizedEvent::ToolEnd {
                tool: shell(),
                exit_code: Some(2),
                status: Some("failed".into())
            })
        );
        assert!(!tracker.is_open("c1"));
        assert!(tracker.finish("c1", None, None).is_none());
        assert!(tracker.stdout("c1", "late").is_none());
    }

    #[test]
    fn single_fenced_diff_block_yields_one_patch() {
        let text = "Here is the change:\n\n```diff\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n```\nDone.";
        assert_eq!(
            fenced_patches(text),
            vec!["--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b".to_string()]
        );
    }

    #[test]
    fn other_fences_and_unterminated_blocks_are_ignored() {
        let text = "```rust\nfn main() {}\n```\n```patch\n+x\n```\n```diff\n+unterminated";
        assert_eq!(fenced_patches(text), vec!["+x".to_string()]);
    }

    #[test]
    fn textual_fallback_is_suppressed_after_structured_diff() {
        let mut diffs = TurnDiffs::new();
        assert!(diffs.structured("+a").is_some());
        diffs.push_text("```diff\n+b\n```");
        assert!(diffs.finish_turn().is_empty());

        diffs.push_text("```diff\n+b\n```\n```diff\n+b\n```");
        assert_eq!(diffs.finish_turn(), vec![NormalizedEvent::diff("+b")]);
    }

    #[test]
    fn identical_structured_patches_are_reported_once_per_turn() {
        let mut diffs = TurnDiffs::new();
        assert!(diffs.structured("+a\n").is_some());
        assert!(diffs.structured("+a").is_none());
        assert!(diffs.structured("   ").is_none());
        diffs.finish_turn();
        assert!(diffs.structured("+a").is_some());
    }

    #[test]
    fn flushing_text_keeps_state_across_requests() {
        let mut diffs = TurnDiffs::new();
        assert!(diffs.structured("+a").is_some());
        assert!(diffs.flush_text().is_empty());
        diffs.push_text("Summary:\n```diff\n+a\n```\n");
        assert!(diffs.flush_text().is_empty());

        let mut diffs = TurnDiffs::new();
        diffs.push_text("```diff\n+b\n```");
        assert_eq!(diffs.flush_text(), vec![NormalizedEvent::diff("+b")]);
        diffs.push_text("again:\n```diff\n+b\n```");
        assert!(diffs.flush_text().is_empty());
        assert!(diffs.structured("+b").is_none());
    }

    #[test]
    fn structured_patch_looks_at_direct_nested_and_change_lists() {
        assert_eq!(
            structured_patch(&serde_json::json!({"patch": " +a "})),
            Some("+a".into())
        );
        assert_eq!(
            structured_patch(&serde_json::json!({"item": {"diff": "+b"}})),
            Some("+b".into())
        );
        assert_eq!(
            structured_patch(&serde_json::json!({"changes": [
                {"path": "a.rs", "kind": "update"},
                {"path": "b.rs", "unified_diff": "+c"},
                {"path": "c.rs", "diff": "+d"}
            ]})),
            Some("+c".into())
        );
        assert_eq!(structured_patch(&serde_json::json!({"changes": []})), None);
    }

    #[test]
    fn error_message_falls_back_when_absent() {
        assert_eq!(
            error_message(&serde_json::json!({"error": {"message": "quota"}}), "x"),
            "quota"
        );
        assert_eq!(error_message(&serde_json::json!({"message": "bad"}), "x"), "bad");
        assert_eq!(error_message(&serde_json::json!({"error": {}}), "generic"), "generic");
    }
}
