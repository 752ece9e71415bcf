use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// `git apply` refused the patch; carries its stderr.
    #[error("{0}")]
    Rejected(String),
    #[error("failed to run git apply: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Applies `patch` to the working tree with `git apply`.
pub async fn apply_patch(workspace: &Path, patch: &str) -> Result<(), ApplyError> {
    let mut child = Command::new("git")
        .args(["apply", "--whitespace=nowarn", "-"])
        .current_dir(workspace)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        let mut body = patch.to_string();
        if !body.ends_with('\n') {
            body.push('\n');
        }
        stdin.write_all(body.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if output.status.success() {
        info!(workspace = %workspace.display(), "patch applied");
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(code = ?output.status.code(), %stderr, "git apply rejected patch");
        Err(ApplyError::Rejected(if stderr.is_empty() {
            "git apply failed".to_string()
        } else {
            stderr
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn applies_and_rejects_patches() {
        if !git_available() {
            eprintln!("git not installed; skipping");
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("notes.txt"), "one\n").expect("write");
        let patch = "--- a/notes.txt\n+++ b/notes.txt\n@@ -1 +1,2 @@\n one\n+two";

        apply_patch(dir.path(), patch).await.expect("apply");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).expect("read"),
            "one\ntwo\n"
        );

        let err = apply_patch(dir.path(), patch).await.expect_err("already applied");
        assert!(matches!(err, ApplyError::Rejected(ref msg) if !msg.is_empty()));
    }
}
