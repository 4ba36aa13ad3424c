use std::path::PathBuf;
use thiserror::Error;

/// Every way a patch run can fail. None of them are retried: the first error
/// aborts the run and nothing is published.
#[derive(Debug, Error)]
pub enum PatchError {
    /// An input root could not be walked (missing, not a directory, unreadable).
    #[error("failed to list tree {}: {source}", .root.display())]
    Listing {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A listing reported the same relative path twice.
    #[error("duplicate path {path:?} in tree {}", .root.display())]
    DuplicatePath { root: PathBuf, path: String },

    /// A path the manifest grammar cannot carry (non-UTF8).
    #[error("unsupported path {}: {reason}", .path.display())]
    UnsupportedPath { path: PathBuf, reason: &'static str },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The delta capability failed for a probe or a final encode.
    #[error(
        "delta computation failed for {} -> {}: {reason}",
        .source_path.display(),
        .target_path.display()
    )]
    Delta {
        source_path: PathBuf,
        target_path: PathBuf,
        reason: String,
    },

    /// The output directory could not be cleared or created.
    #[error("cannot prepare output location {}: {source}", .path.display())]
    OutputLocation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed manifest text.
    #[error("manifest line {line}: {reason}")]
    Manifest { line: usize, reason: String },

    /// A blocking worker panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PatchError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = PatchError> = std::result::Result<T, E>;
