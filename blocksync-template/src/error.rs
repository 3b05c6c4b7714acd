//! Error types for blocksync-template.

use std::path::PathBuf;

use thiserror::Error;

use blocksync_core::StoreError;

/// All errors that can arise from template and block type operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Applying a reconciled list to the store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem error while loading a template or block type file.
    #[error("template io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("template JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> TemplateError {
    TemplateError::Io {
        path: path.into(),
        source,
    }
}
