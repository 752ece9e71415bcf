use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

pub type RunId = Uuid;

/// One prompt submission and its replayable side effects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Run {
    pub id: RunId,
    pub prompt: Arc<str>,
    /// Most recent patch reported by the backend (last write wins).
    pub last_diff: Option<String>,
    /// Append-only command transcript.
    pub commands: Vec<String>,
}

/// Ephemeral run table. Entries live for the lifetime of the process.
#[derive(Default)]
pub struct RunStore {
    runs: DashMap<RunId, Run>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, prompt: impl Into<Arc<str>>) -> RunId {
        let id = Uuid::new_v4();
        self.runs.insert(
            id,
            Run {
                id,
                prompt: prompt.into(),
                last_diff: None,
                commands: Vec::new(),
            },
        );
        tracing::debug!(run_id = %id, "run created");
        id
    }

    pub fn get(&self, id: &RunId) -> Option<Run> {
        self.runs.get(id).map(|run| run.clone())
    }

    pub fn contains(&self, id: &RunId) -> bool {
        self.runs.contains_key(id)
    }

    pub fn last_diff(&self, id: &RunId) -> Option<Option<String>> {
        self.runs.get(id).map(|run| run.last_diff.clone())
    }

    pub fn commands(&self, id: &RunId) -> Option<Vec<String>> {
        self.runs.get(id).map(|run| run.commands.clone())
    }

    /// Returns false when the run does not exist.
    pub fn set_diff(&self, id: &RunId, patch: impl Into<String>) -> bool {
        match self.runs.get_mut(id) {
            Some(mut run) => {
                run.last_diff = Some(patch.into());
                true
            }
            None => false,
        }
    }

    pub fn append_command(&self, id: &RunId, line: impl Into<String>) -> bool {
        match self.runs.get_mut(id) {
            Some(mut run) => {
                run.commands.push(line.into());
                true
            }
            None => false,
        }
    }

    /// Resets the diff and transcript, keeping the prompt.
    pub fn clear(&self, id: &RunId) -> bool {
        match self.runs.get_mut(id) {
            Some(mut run) => {
                run.last_diff = None;
                run.commands.clear();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
