//! Client-side tools declared to Claude and their out-of-band execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

pub(crate) const RUN_COMMAND: &str = "run_command";
pub(crate) const PROPOSE_DIFF: &str = "propose_diff";

/// Bytes of stdout sent back to the model.
pub(crate) const STDOUT_TAIL_BYTES: usize = 16 * 1024;
/// Bytes of stderr sent back to the model.
pub(crate) const STDERR_TAIL_BYTES: usize = STDOUT_TAIL_BYTES / 4;

pub(crate) fn tool_definitions() -> Value {
    json!([
        {
            "name": RUN_COMMAND,
            "description": "Run a shell command in the repository root and return its output. \
                Use it to inspect files, search the code and run tests. Commands run with sh -c.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command line to run."}
                },
                "required": ["command"]
            }
        },
        {
            "name": PROPOSE_DIFF,
            "description": "Propose a change as a unified diff (git apply format) relative to the \
                repository root. The user reviews and applies it; files are not modified by you.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "patch": {"type": "string", "description": "Unified diff with a/ and b/ prefixes."}
                },
                "required": ["patch"]
            }
        }
    ])
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CommandUpdate {
    Stdout(String),
    Stderr(String),
    Exited { code: Option<i32>, timed_out: bool },
}

/// Spawns `sh -c` commands inside the workspace.
#[derive(Clone, Debug)]
pub(crate) struct CommandRunner {
    pub workspace: PathBuf,
    pub timeout: Duration,
}

impl CommandRunner {
    pub fn start(&self, command: &str) -> std::io::Result<RunningCommand> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child.stdout.take().map(|s| BufReader::new(Box::new(s) as Pipe));
        let stderr = child.stderr.take().map(|s| BufReader::new(Box::new(s) as Pipe));
        Ok(RunningCommand {
            child,
            stdout,
            stderr,
            deadline: Instant::now() + self.timeout,
            exited: false,
        })
    }
}

type Pipe = Box<dyn AsyncRead + Send + Unpin>;

/// A command in flight. Dropping it kills the process.
pub(crate) struct RunningCommand {
    child: Child,
    stdout: Option<BufReader<Pipe>>,
    stderr: Option<BufReader<Pipe>>,
    deadline: Instant,
    exited: bool,
}

enum Read {
    Stdout(Option<String>),
    Stderr(Option<String>),
    TimedOut,
}

/// Next raw line, newline included. Invalid UTF-8 is replaced, never fatal.
async fn next_line(reader: &mut Option<BufReader<Pipe>>) -> Option<String> {
    let Some(reader) = reader else {
        return std::future::pending().await;
    };
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf).await {
        Ok(0) => None,
        Ok(_) => Some(String::from_utf8_lossy(&buf).into_owned()),
        Err(e) => {
            tracing::debug!(error = %e, "command pipe closed");
            None
        }
    }
}

impl RunningCommand {
    /// Output lines as they arrive, then exactly one `Exited`.
    pub async fn next_update(&mut self) -> Option<CommandUpdate> {
        if self.exited {
            return None;
        }
        loop {
            if self.stdout.is_none() && self.stderr.is_none() {
                self.exited = true;
                let status = tokio::time::timeout_at(self.deadline, self.child.wait()).await;
                return Some(match status {
                    Ok(Ok(status)) => CommandUpdate::Exited {
                        code: status.code(),
                        timed_out: false,
                    },
                    Ok(Err(_)) => CommandUpdate::Exited {
                        code: None,
                        timed_out: false,
                    },
                    Err(_) => self.kill().await,
                });
            }
            let deadline = self.deadline;
            let read = tokio::select! {
                line = next_line(&mut self.stdout) => Read::Stdout(line),
                line = next_line(&mut self.stderr) => Read::Stderr(line),
                _ = tokio::time::sleep_until(deadline) => Read::TimedOut,
            };
            match read {
                Read::Stdout(Some(line)) => return Some(CommandUpdate::Stdout(line)),
                Read::Stderr(Some(line)) => return Some(CommandUpdate::Stderr(line)),
                Read::Stdout(None) => self.stdout = None,
                Read::Stderr(None) => self.stderr = None,
                Read::TimedOut => {
                    self.exited = true;
                    return Some(self.kill().await);
                }
            }
        }
    }

    async fn kill(&mut self) -> CommandUpdate {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(error = %e, "failed to kill timed out command");
        }
        CommandUpdate::Exited {
            code: None,
            timed_out: true,
        }
    }
}

/// Keeps the last `max` bytes, cut on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// The last `cap` bytes written to one command stream.
#[derive(Debug)]
pub(crate) struct OutputTail {
    text: String,
    cap: usize,
}

impl OutputTail {
    pub fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            cap,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() > self.cap {
            let keep = tail(&self.text, self.cap).len();
            self.text.drain(..self.text.len() - keep);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// `tool_result` text for a finished command, and whether it failed.
pub(crate) fn command_result(
    stdout: &str,
    stderr: &str,
    code: Option<i32>,
    timed_out: bool,
) -> (String, bool) {
    let mut text = String::new();
    if timed_out {
        text.push_str("command timed out and was killed\n");
    } else {
        match code {
            Some(code) => text.push_str(&format!("exit code: {code}\n")),
            None => text.push_str("terminated by signal\n"),
        }
    }
    if !stdout.is_empty() {
        text.push_str("stdout:\n");
        text.push_str(tail(stdout, STDOUT_TAIL_BYTES));
    }
    if !stderr.is_empty() {
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("stderr:\n");
        text.push_str(tail(stderr, STDERR_TAIL_BYTES));
    }
    (text, timed_out || code != Some(0))
}

pub(crate) fn end_status(code: Option<i32>, timed_out: bool) -> &'static str {
    match (code, timed_out) {
        (_, true) => "timed_out",
        (Some(0), false) => "completed",
        _ => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(timeout: Duration) -> (tempfile::TempDir, CommandRunner) {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = CommandRunner {
            workspace: dir.path().to_path_buf(),
            timeout,
        };
        (dir, runner)
    }

    async fn collect(mut command: RunningCommand) -> Vec<CommandUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = command.next_update().await {
            updates.push(update);
        }
        updates
    }

    #[tokio::test]
    async fn streams_output_then_exit_code() {
        let (_dir, runner) = runner(Duration::from_secs(10));
        let updates = collect(runner.start("echo one; echo two; echo oops >&2; exit 4").expect("spawn")).await;
        let stdout: String = updates
            .iter()
            .filter_map(|u| match u {
                CommandUpdate::Stdout(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stdout, "one\ntwo\n");
        assert!(updates.contains(&CommandUpdate::Stderr("oops\n".into())));
        assert_eq!(
            updates.last(),
            Some(&CommandUpdate::Exited {
                code: Some(4),
                timed_out: false
            })
        );
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_cut_the_output() {
        let (_dir, runner) = runner(Duration::from_secs(10));
        let updates = collect(runner.start("printf 'a\\n\\377\\nb\\n'; echo after").expect("spawn")).await;
        assert_eq!(
            updates,
            vec![
                CommandUpdate::Stdout("a\n".into()),
                CommandUpdate::Stdout("\u{FFFD}\n".into()),
                CommandUpdate::Stdout("b\n".into()),
                CommandUpdate::Stdout("after\n".into()),
                CommandUpdate::Exited {
                    code: Some(0),
                    timed_out: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn unterminated_last_line_is_kept_verbatim() {
        let (_dir, runner) = runner(Duration::from_secs(10));
        let updates = collect(runner.start("printf 'no newline'").expect("spawn")).await;
        assert_eq!(updates[0], CommandUpdate::Stdout("no newline".into()));
    }

    #[tokio::test]
    async fn runs_inside_the_workspace() {
        let (dir, runner) = runner(Duration::from_secs(10));
        std::fs::write(dir.path().join("marker.txt"), "x").expect("write");
        let updates = collect(runner.start("ls").expect("spawn")).await;
        assert!(updates.contains(&CommandUpdate::Stdout("marker.txt\n".into())));
    }

    #[tokio::test]
    async fn slow_commands_are_killed() {
        let (_dir, runner) = runner(Duration::from_millis(200));
        let updates = collect(runner.start("sleep 5").expect("spawn")).await;
        assert_eq!(
            updates,
            vec![CommandUpdate::Exited {
                code: None,
                timed_out: true
            }]
        );
    }

    #[test]
    fn result_text_and_status() {
        let (text, is_error) = command_result("a\n", "", Some(0), false);
        assert_eq!(text, "exit code: 0\nstdout:\na\n");
        assert!(!is_error);

        let (text, is_error) = command_result("", "bad\n", Some(2), false);
        assert_eq!(text, "exit code: 2\nstderr:\nbad\n");
        assert!(is_error);

        assert_eq!(end_status(Some(0), false), "completed");
        assert_eq!(end_status(Some(1), false), "failed");
        assert_eq!(end_status(None, true), "timed_out");
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("héllo", 4), "llo");
        assert_eq!(tail("abc", 10), "abc");
    }

    #[test]
    fn output_tail_is_bounded() {
        let mut out = OutputTail::new(8);
        for _ in 0..1000 {
            out.push("0123456789\n");
        }
        out.push("héllo");
        assert_eq!(out.as_str(), "9\nhéllo");
        out.push("é");
        assert_eq!(out.as_str(), "hélloé");
    }

    #[test]
    fn both_tools_are_declared() {
        let tools = tool_definitions();
        let names: Vec<_> = tools
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(names, vec![RUN_COMMAND, PROPOSE_DIFF]);
    }
}
