//! blocksync core library: block tree model, shared tree store, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes and the immutable block tree
//! - [`error`]: [`StoreError`]
//! - [`store`]: [`TreeStore`], the subscribable working store

pub mod error;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use store::{ReplaceOptions, SubtreeClaim, Subscription, TreeStore};
pub use types::{
    Attributes, Block, BlockId, BlockList, ListSettings, SelectionAnchor, SelectionRange,
    SubtreeId, TemplateLock,
};
