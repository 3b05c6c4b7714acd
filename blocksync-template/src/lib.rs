//! # blocksync-template
//!
//! Template reconciliation and block context for nested block lists.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use blocksync_core::{TemplateLock, TreeStore};
//! use blocksync_template::{TemplateEntry, TemplateSync, TemplateSynchronizer};
//!
//! fn lock_to_template(store: &TreeStore) {
//!     let template = vec![TemplateEntry::new("core/heading"), TemplateEntry::new("core/paragraph")];
//!     let mut sync = TemplateSync::new("group-1", TemplateSynchronizer::default())
//!         .update_selection_on_insert(true);
//!     if let Ok(outcome) = sync.apply(store, &template, Some(TemplateLock::All)) {
//!         println!("{outcome:?}");
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod policy;

pub use context::{BlockContext, BlockType, BlockTypeRegistry, ContextCache};
pub use engine::{load_blocks, load_template, BlockIdGenerator, TemplateEntry, TemplateReconciler, TemplateSynchronizer};
pub use error::TemplateError;
pub use policy::{LockSetting, NestedSettings, TemplateOutcome, TemplateSync};
