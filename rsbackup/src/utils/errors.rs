//! Custom error types for rsbackup.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No backup configuration found: {0}")]
    DefinitionNotFound(String),

    #[error("rsync returned unexpected exit code {code}")]
    SyncFailed { code: i32 },

    #[error("Malformed rsync progress line {line:?}: {reason}")]
    Protocol { line: String, reason: String },

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backup cancelled")]
    Cancelled,
}

impl BackupError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Exit code reported by rsync, if this is a synchronization failure.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            BackupError::SyncFailed { code } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
