//! Setup-level error types for the coordination core
//!
//! Attempt failures never show up here: those are carried as
//! [`Failure`](crate::feedback::Failure) data inside the run history. These
//! errors cover everything *around* a run (task validation, working
//! directories, persisted outputs, schema and corpus files).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Errors raised while preparing or persisting a run
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Invalid task specification: {0}")]
    InvalidTask(String),

    #[error("Working directory {path} is not usable: {source}")]
    Workdir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Working directory {0} is claimed by more than one run")]
    DuplicateWorkdir(PathBuf),

    #[error("Failed to write {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schema: {0}")]
    Schema(String),

    #[error("Reference corpus error: {0}")]
    Corpus(String),

    #[error("SLURM command failed: {0}")]
    Slurm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CoordinationError {
    /// Wrap an I/O error raised while touching a working directory
    pub fn workdir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workdir {
            path: path.into(),
            source,
        }
    }

    /// Wrap an I/O error raised while persisting an output file
    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persist {
            path: path.into(),
            source,
        }
    }
}
