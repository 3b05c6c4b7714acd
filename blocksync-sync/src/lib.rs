//! # blocksync-sync
//!
//! Echo-free synchronization between an externally owned block list and a
//! subtree of a [`blocksync_core::TreeStore`].
//!
//! Bind a [`SyncController`] to a subtree, feed it the host's value with
//! [`SyncController::set_value`], and receive local edits through the
//! `on_input` / `on_change` handlers. [`scenario::run`] replays a scripted
//! sequence of host and editor actions against a fresh store.

pub mod controller;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod scenario;

pub use controller::{SyncConfig, SyncController, SyncHandle, SyncHandler, SyncOptions, SyncStats, ValueOutcome};
pub use error::SyncError;
pub use fingerprint::Fingerprint;
pub use ledger::{EchoPolicy, PendingLedger};
