//! Workspace file browser. Every path is resolved against the workspace
//! root and refused when it escapes it.

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("path escapes the workspace: {0}")]
    OutsideWorkspace(String),
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("not a UTF-8 text file: {0}")]
    NotText(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl From<FileError> for ApiError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::OutsideWorkspace(_) => Self::Forbidden(err.to_string()),
            FileError::NotFound(_) => Self::NotFound(err.to_string()),
            FileError::NotADirectory(_) | FileError::NotText(_) | FileError::InvalidPath(_) => {
                Self::BadRequest(err.to_string())
            }
            FileError::Io { .. } => Self::Internal(err.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

/// Canonical workspace root.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

async fn canonicalize(path: &Path, display: &str) -> Result<PathBuf, FileError> {
    match tokio::fs::canonicalize(path).await {
        Ok(path) => Ok(dunce::simplified(&path).to_path_buf()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FileError::NotFound(display.into())),
        Err(source) => Err(FileError::Io {
            path: display.into(),
            source,
        }),
    }
}

fn io_error(display: &str) -> impl FnOnce(io::Error) -> FileError + '_ {
    move |source| match source.kind() {
        io::ErrorKind::NotFound => FileError::NotFound(display.into()),
        _ => FileError::Io {
            path: display.into(),
            source,
        },
    }
}

impl Workspace {
    pub async fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = tokio::fs::canonicalize(root.as_ref()).await?;
        Ok(Self {
            root: dunce::simplified(&root).to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn join(&self, relative: &str) -> PathBuf {
        let relative = relative.trim().trim_start_matches(['/', '\\']);
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    fn contain(&self, resolved: PathBuf, shown: &str) -> Result<PathBuf, FileError> {
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            warn!(path = %shown, "refusing path outside the workspace");
            Err(FileError::OutsideWorkspace(shown.into()))
        }
    }

    /// Resolves an existing path, following symlinks.
    pub async fn resolve(&self, relative: &str) -> Result<PathBuf, FileError> {
        let resolved = canonicalize(&self.join(relative), relative).await?;
        self.contain(resolved, relative)
    }

    /// Resolves a path whose final component may not exist yet. The parent
    /// directory must exist.
    pub async fn resolve_for_write(&self, relative: &str) -> Result<PathBuf, FileError> {
        let joined = self.join(relative);
        let name = match joined.components().next_back() {
            Some(Component::Normal(name)) => name.to_owned(),
            _ => return Err(FileError::InvalidPath(relative.into())),
        };
        let parent = joined
            .parent()
            .ok_or_else(|| FileError::InvalidPath(relative.into()))?;
        let parent = canonicalize(parent, relative).await?;
        self.contain(parent.join(name), relative)
    }

    /// Directory listing, directories first, `.git` omitted.
    pub async fn list(&self, relative: &str) -> Result<Vec<DirEntry>, FileError> {
        let dir = self.resolve(relative).await?;
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
                return Err(FileError::NotADirectory(relative.into()));
            }
            Err(e) => return Err(io_error(relative)(e)),
        };
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(io_error(relative))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".git" {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!(entry = %name, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let kind = if metadata.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name,
                kind,
                size: if kind == EntryKind::File { metadata.len() } else { 0 },
            });
        }
        entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    pub async fn read(&self, relative: &str) -> Result<String, FileError> {
        let path = self.resolve(relative).await?;
        let bytes = tokio::fs::read(&path).await.map_err(io_error(relative))?;
        String::from_utf8(bytes).map_err(|_| FileError::NotText(relative.into()))
    }

    pub async fn write(&self, relative: &str, content: &str) -> Result<(), FileError> {
        let path = self.resolve_for_write(relative).await?;
        tokio::fs::write(&path, content)
            .await
            .map_err(io_error(relative))?;
        debug!(path = %path.display(), bytes = content.len(), "file saved");
        Ok(())
    }
}
