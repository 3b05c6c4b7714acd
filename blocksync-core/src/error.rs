//! Error types for blocksync-core.

use thiserror::Error;

use crate::types::{BlockId, SubtreeId};

/// All errors that can arise from tree store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The addressed block does not exist in the current document.
    #[error("block not found: {id}")]
    BlockNotFound { id: BlockId },

    /// A second controller tried to take ownership of a subtree that is
    /// already bound.
    #[error("subtree {subtree} is already owned by another controller")]
    AlreadyOwned { subtree: SubtreeId },
}
