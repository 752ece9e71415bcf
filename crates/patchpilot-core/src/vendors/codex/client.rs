use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use futures::stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::model::{BackendKind, ReasoningEffort};

use super::auth::CodexCredential;

const STDERR_TAIL_LINES: usize = 20;

/// One item of the child's output.
#[derive(Clone, Debug, PartialEq)]
pub enum CodexOutput {
    /// A JSON thread event from one stdout line.
    Event(serde_json::Value),
    /// The child exited; always the last item.
    Exited {
        code: Option<i32>,
        stderr_tail: String,
    },
}

/// Invocation of `codex exec` for one run.
#[derive(Clone, Debug)]
pub struct CodexExec {
    pub bin: String,
    pub home: PathBuf,
    pub workspace: PathBuf,
    pub model: Option<String>,
    pub effort: Option<ReasoningEffort>,
    pub network_access: bool,
    pub openai_base_url: Option<String>,
}

impl CodexExec {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--json".to_string(),
            "--skip-git-repo-check".to_string(),
            "--cd".to_string(),
            self.workspace.display().to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        if let Some(effort) = self.effort {
            args.push("-c".into());
            args.push(format!("model_reasoning_effort=\"{}\"", effort.as_str()));
        }
        if self.network_access {
            args.push("-c".into());
            args.push("sandbox_workspace_write.network_access=true".into());
        }
        args.push("-".into());
        args
    }

    /// Spawns the CLI and writes `prompt` to its stdin.
    ///
    /// The child is killed when the returned stream is dropped.
    pub fn spawn(
        &self,
        prompt: &str,
        credential: &CodexCredential,
    ) -> Result<CodexProcess, ProviderError> {
        let backend = BackendKind::Codex;
        let mut command = Command::new(&self.bin);
        command
            .args(self.args())
            .current_dir(&self.workspace)
            .env("CODEX_HOME", &self.home)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let CodexCredential::ApiKey(key) = credential {
            command.env("CODEX_API_KEY", key);
        }
        if let Some(base_url) = &self.openai_base_url {
            command.env("OPENAI_BASE_URL", base_url);
        }
        debug!(bin = %self.bin, args = ?self.args(), "spawning codex");

        let mut child = command.spawn().map_err(|e| {
            ProviderError::transport(backend, format!("failed to spawn {}: {e}", self.bin))
        })?;
        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ProviderError::transport(backend, "codex stdio was not captured"));
        };

        let prompt = prompt.to_string();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                warn!(error = %e, "failed to write prompt to codex");
            }
            let _ = stdin.shutdown().await;
        });

        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut stderr = BufReader::new(stderr);
            loop {
                let line = match read_line_lossy(&mut stderr).await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "codex stderr closed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.trim_end().to_string());
            }
            Vec::from(tail).join("\n")
        });

        Ok(CodexProcess {
            child,
            stdout: BufReader::new(stdout),
            stderr_task: Some(stderr_task),
        })
    }
}

/// A running `codex exec` child.
pub struct CodexProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<String>>,
}

impl CodexProcess {
    /// Native output: one [`CodexOutput::Event`] per JSON line, then
    /// [`CodexOutput::Exited`]. Blank and malformed lines are skipped.
    pub fn into_stream(
        self,
    ) -> impl futures::Stream<Item = Result<CodexOutput, ProviderError>> + Send + 'static {
        stream::try_unfold(Some(self), |state| async move {
            let Some(mut process) = state else {
                return Ok(None);
            };
            loop {
                let line = read_line_lossy(&mut process.stdout).await.map_err(|e| {
                    ProviderError::transport(BackendKind::Codex, format!("failed to read codex output: {e}"))
                })?;
                match line {
                    Some(line) => {
                        if let Some(value) = parse_line(&line) {
                            return Ok(Some((CodexOutput::Event(value), Some(process))));
                        }
                    }
                    None => {
                        let status = process.child.wait().await.map_err(|e| {
                            ProviderError::transport(BackendKind::Codex, format!("failed to wait for codex: {e}"))
                        })?;
                        let stderr_tail = match process.stderr_task.take() {
                            Some(task) => task.await.unwrap_or_default(),
                            None => String::new(),
                        };
                        debug!(code = ?status.code(), "codex exited");
                        let exited = CodexOutput::Exited {
                            code: status.code(),
                            stderr_tail,
                        };
                        return Ok(Some((exited, None)));
                    }
                }
            }
        })
    }
}

/// One line, newline included, with invalid UTF-8 replaced. `None` at EOF.
async fn read_line_lossy<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

pub(crate) fn parse_line(line: &str) -> Option<serde_json::Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "skipping malformed codex line");
            None
        }
    }
}
