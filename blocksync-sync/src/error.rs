//! Error types for blocksync-sync.

use std::path::PathBuf;

use thiserror::Error;

use blocksync_core::StoreError;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the tree store (missing block, second owner).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A scenario step could not be executed.
    #[error("scenario step {step}: {message}")]
    Scenario { step: usize, message: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML scenario parse error.
    #[error("scenario YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON scenario parse error.
    #[error("scenario JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Scenario`].
pub(crate) fn scenario_err(step: usize, message: impl Into<String>) -> SyncError {
    SyncError::Scenario {
        step,
        message: message.into(),
    }
}
