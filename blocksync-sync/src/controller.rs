//! Sync controller: binds one subtree of a [`TreeStore`] to a host value.
//!
//! ## Store change protocol
//!
//! 1. Read the subtree's children and the store's persistence flag.
//! 2. Compare with the last known children: identity, or a shallow
//!    structural comparison once any nested region is controlled.
//! 3. A difference caused by our own reset (or flagged as ignored by the
//!    store) is absorbed silently.
//! 4. A provisional edit followed by a content-free commit is a
//!    persistence transition.
//! 5. Differences and transitions are pushed onto the ledger and reported
//!    through `on_change` (persistent) or `on_input` (provisional).
//!
//! ## Host value protocol
//!
//! 1. Same reference as last time: no reset; a matching tail is acknowledged.
//! 2. Matches the ledger tail: our own output coming back; the ledger is cleared.
//! 3. Anything else: clear the ledger and reset the subtree.
//!
//! Handlers are called after every internal borrow is released, so a host
//! may hand the value straight back (or edit the store) from inside one.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use blocksync_core::{
    BlockList, ReplaceOptions, SelectionRange, SubtreeClaim, SubtreeId, Subscription, TreeStore,
};

use crate::error::SyncError;
use crate::ledger::{EchoPolicy, PendingLedger, DEFAULT_CAPACITY};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Callback receiving the subtree's new children and the current selection.
pub type SyncHandler = Rc<dyn Fn(&BlockList, Option<&SelectionRange>)>;

/// Tunables, loadable from scenario files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub echo_policy: EchoPolicy,
    pub ledger_capacity: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            echo_policy: EchoPolicy::default(),
            ledger_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Everything [`SyncController::bind`] needs.
#[derive(Clone, Default)]
pub struct SyncConfig {
    pub subtree: SubtreeId,
    pub value: Option<BlockList>,
    pub on_change: Option<SyncHandler>,
    pub on_input: Option<SyncHandler>,
    pub selection: Option<SelectionRange>,
    pub options: SyncOptions,
}

impl SyncConfig {
    pub fn new(subtree: impl Into<SubtreeId>) -> Self {
        Self {
            subtree: subtree.into(),
            ..Self::default()
        }
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn value(mut self, value: BlockList) -> Self {
        self.value = Some(value);
        self
    }

    pub fn on_change(mut self, handler: impl Fn(&BlockList, Option<&SelectionRange>) + 'static) -> Self {
        self.on_change = Some(Rc::new(handler));
        self
    }

    pub fn on_input(mut self, handler: impl Fn(&BlockList, Option<&SelectionRange>) + 'static) -> Self {
        self.on_input = Some(Rc::new(handler));
        self
    }

    pub fn selection(mut self, selection: SelectionRange) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("subtree", &self.subtree)
            .field("value", &self.value.as_ref().map(|v| v.len()))
            .field("on_change", &self.on_change.is_some())
            .field("on_input", &self.on_input.is_some())
            .field("selection", &self.selection)
            .field("options", &self.options)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Outcomes and counters
// ---------------------------------------------------------------------------

/// What [`SyncController::set_value`] did with a host value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueOutcome {
    /// Same reference as the previously supplied value.
    Unchanged,
    /// No value: the store is the source of truth.
    Uncontrolled,
    /// The host handed back our own output.
    Echo,
    /// Genuine external change; the subtree was reset.
    Reset,
}

/// Running counters for one controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub inputs: u64,
    pub changes: u64,
    pub echoes: u64,
    pub resets: u64,
    /// Store changes absorbed because they were our own reset or ignored.
    pub suppressed: u64,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct SyncState {
    last_known_children: BlockList,
    last_known_persistent: bool,
    previous_was_different: bool,
    incoming_in_flight: bool,
    last_supplied: Option<BlockList>,
    ledger: PendingLedger,
    stats: SyncStats,
}

struct Shared {
    store: TreeStore,
    subtree: SubtreeId,
    on_change: Option<SyncHandler>,
    on_input: Option<SyncHandler>,
    state: RefCell<SyncState>,
}

/// Owner of one subtree's synchronization. Dropping it tears it down.
pub struct SyncController {
    shared: Rc<Shared>,
    // Declared before the claim so delivery stops before ownership is released.
    _subscription: Subscription,
    _claim: SubtreeClaim,
}

/// Weak handle for calling back into a controller from a handler.
#[derive(Clone)]
pub struct SyncHandle {
    shared: Weak<Shared>,
}

impl SyncController {
    /// Claim `config.subtree`, align it with `config.value` and subscribe.
    ///
    /// Fails with [`blocksync_core::StoreError::AlreadyOwned`] when another
    /// controller is bound to the same subtree.
    pub fn bind(store: &TreeStore, config: SyncConfig) -> Result<Self, SyncError> {
        let claim = store.claim(&config.subtree)?;

        if let Some(value) = &config.value {
            reset_subtree(store, &config.subtree, value.clone())?;
            if let Some(selection) = &config.selection {
                store.set_selection(selection.start.clone(), selection.end.clone());
            }
        }

        let state = SyncState {
            last_known_children: store.children(&config.subtree),
            last_known_persistent: store.is_last_change_persistent(),
            previous_was_different: false,
            incoming_in_flight: false,
            last_supplied: config.value.clone(),
            ledger: PendingLedger::new(config.options.ledger_capacity, config.options.echo_policy),
            stats: SyncStats::default(),
        };
        let shared = Rc::new(Shared {
            store: store.clone(),
            subtree: config.subtree.clone(),
            on_change: config.on_change,
            on_input: config.on_input,
            state: RefCell::new(state),
        });

        let weak = Rc::downgrade(&shared);
        let subscription = store.subscribe(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_store_change();
            }
        });

        tracing::debug!(
            subtree = %config.subtree,
            controlled = config.value.is_some(),
            "bound sync controller"
        );
        Ok(Self {
            shared,
            _subscription: subscription,
            _claim: claim,
        })
    }

    /// Feed the host's current value.
    pub fn set_value(
        &self,
        value: Option<BlockList>,
        selection: Option<SelectionRange>,
    ) -> Result<ValueOutcome, SyncError> {
        self.shared.set_value(value, selection)
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn subtree(&self) -> &SubtreeId {
        &self.shared.subtree
    }

    /// Outgoing values not yet echoed back.
    pub fn pending_len(&self) -> usize {
        self.shared.state.borrow().ledger.len()
    }

    pub fn stats(&self) -> SyncStats {
        self.shared.state.borrow().stats
    }

    /// Unsubscribe and release the subtree.
    pub fn teardown(self) {
        tracing::debug!(subtree = %self.shared.subtree, "tearing down sync controller");
    }
}

impl SyncHandle {
    /// Same as [`SyncController::set_value`]. A handle whose controller is
    /// gone reports [`ValueOutcome::Uncontrolled`].
    pub fn set_value(
        &self,
        value: Option<BlockList>,
        selection: Option<SelectionRange>,
    ) -> Result<ValueOutcome, SyncError> {
        match self.shared.upgrade() {
            Some(shared) => shared.set_value(value, selection),
            None => Ok(ValueOutcome::Uncontrolled),
        }
    }
}

impl Shared {
    fn on_store_change(&self) {
        let new_children = self.store.children(&self.subtree);
        let new_persistent = self.store.is_last_change_persistent();

        let report = {
            let mut state = self.state.borrow_mut();

            let are_different = if self.store.any_controlled() {
                !new_children.shallow_eq_masked(&state.last_known_children, &|id| {
                    self.store.is_controlled(id)
                })
            } else {
                !new_children.ptr_eq(&state.last_known_children)
            };

            if are_different && (state.incoming_in_flight || self.store.is_last_change_ignored()) {
                state.incoming_in_flight = false;
                state.last_known_children = new_children;
                state.last_known_persistent = new_persistent;
                state.stats.suppressed += 1;
                tracing::trace!(subtree = %self.subtree, "absorbed incoming or ignored change");
                return;
            }

            let persistence_transition = state.previous_was_different
                && !are_different
                && new_persistent
                && !state.last_known_persistent;

            state.last_known_children = new_children.clone();
            let report = if are_different || persistence_transition {
                state.ledger.push(new_children.clone());
                state.last_known_persistent = new_persistent;
                if new_persistent {
                    state.stats.changes += 1;
                } else {
                    state.stats.inputs += 1;
                }
                tracing::debug!(
                    subtree = %self.subtree,
                    persistent = new_persistent,
                    transition = persistence_transition,
                    pending = state.ledger.len(),
                    "exporting local change"
                );
                Some(new_persistent)
            } else {
                None
            };
            state.previous_was_different = are_different;
            report
        };

        if let Some(persistent) = report {
            let selection = self.store.selection();
            let handler = if persistent { &self.on_change } else { &self.on_input };
            if let Some(handler) = handler {
                handler(&new_children, selection.as_ref());
            }
        }
    }

    fn set_value(
        &self,
        value: Option<BlockList>,
        selection: Option<SelectionRange>,
    ) -> Result<ValueOutcome, SyncError> {
        let Some(value) = value else {
            self.state.borrow_mut().last_supplied = None;
            return Ok(ValueOutcome::Uncontrolled);
        };

        {
            let mut state = self.state.borrow_mut();
            if state.last_supplied.as_ref().is_some_and(|prev| prev.ptr_eq(&value)) {
                // The host already holds our latest output.
                if state.ledger.matches_tail(&value) {
                    state.ledger.clear();
                }
                return Ok(ValueOutcome::Unchanged);
            }
            state.last_supplied = Some(value.clone());

            // Acknowledging the tail supersedes every older push.
            if state.ledger.matches_tail(&value) {
                let acknowledged = state.ledger.clear();
                state.stats.echoes += 1;
                tracing::debug!(subtree = %self.subtree, acknowledged, "host value is our own echo");
                return Ok(ValueOutcome::Echo);
            }

            let discarded = state.ledger.clear();
            state.incoming_in_flight = true;
            state.stats.resets += 1;
            tracing::debug!(
                subtree = %self.subtree,
                discarded,
                blocks = value.len(),
                "resetting subtree to host value"
            );
        }

        let result = reset_subtree(&self.store, &self.subtree, value);
        // The reset notified synchronously; nothing later belongs to it.
        self.state.borrow_mut().incoming_in_flight = false;
        result?;

        if let Some(selection) = selection {
            self.store.set_selection(selection.start, selection.end);
        }
        Ok(ValueOutcome::Reset)
    }
}

/// Replace the subtree without creating a persistent change.
fn reset_subtree(store: &TreeStore, subtree: &SubtreeId, value: BlockList) -> Result<(), SyncError> {
    if let SubtreeId::Block(id) = subtree {
        if store.block(id).is_none() {
            tracing::warn!(subtree = %subtree, "cannot reset a subtree whose block is missing");
            return Err(blocksync_core::StoreError::BlockNotFound { id: id.clone() }.into());
        }
        store.set_controlled(id, true);
    }
    store.mark_next_change_non_persistent();
    store.replace_children(subtree, value, ReplaceOptions::persistent())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_core::{Block, BlockId, SelectionAnchor, StoreError};
    use std::cell::RefCell;

    /// Records every handler call as (persistent, children).
    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<(bool, BlockList)>>,
    }

    fn recording(rec: &Rc<Recorder>, subtree: SubtreeId) -> SyncConfig {
        let on_change = Rc::clone(rec);
        let on_input = Rc::clone(rec);
        SyncConfig::new(subtree)
            .on_change(move |blocks, _| on_change.calls.borrow_mut().push((true, blocks.clone())))
            .on_input(move |blocks, _| on_input.calls.borrow_mut().push((false, blocks.clone())))
    }

    impl Recorder {
        fn last(&self) -> Option<(bool, BlockList)> {
            self.calls.borrow().last().cloned()
        }

        fn count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    fn para(id: &str) -> Block {
        Block::new(id, "core/paragraph")
    }

    #[test]
    fn bind_with_value_mirrors_it() {
        let store = TreeStore::new();
        let value = BlockList::new(vec![para("a")]);
        let rec = Rc::new(Recorder::default());
        let _ctl = SyncController::bind(&store, recording(&rec, SubtreeId::Root).value(value.clone()))
            .expect("bind");
        assert_eq!(store.document(), value);
        assert!(!store.is_last_change_persistent(), "reset must not be a persistent change");
        assert_eq!(rec.count(), 0);
    }

    #[test]
    fn persistent_edit_reports_change() {
        let store = TreeStore::new();
        let rec = Rc::new(Recorder::default());
        let _ctl = SyncController::bind(&store, recording(&rec, SubtreeId::Root)).expect("bind");

        store.reset_document(BlockList::new(vec![para("a")]));
        let (persistent, blocks) = rec.last().expect("call");
        assert!(persistent);
        assert_eq!(blocks[0].id, BlockId::from("a"));
    }

    #[test]
    fn provisional_edit_reports_input() {
        let store = TreeStore::new();
        let rec = Rc::new(Recorder::default());
        let _ctl = SyncController::bind(&store, recording(&rec, SubtreeId::Root)).expect("bind");

        store
            .replace_children(&SubtreeId::Root, BlockList::new(vec![para("a")]), ReplaceOptions::provisional())
            .expect("replace");
        assert_eq!(rec.last().map(|(p, _)| p), Some(false));
    }

    #[test]
    fn unchanged_content_reports_nothing() {
        let store = TreeStore::with_document(BlockList::new(vec![para("a")]));
        let rec = Rc::new(Recorder::default());
        let _ctl = SyncController::bind(&store, recording(&rec, SubtreeId::Root)).expect("bind");
        store.set_selection(SelectionAnchor::block("a"), SelectionAnchor::block("a"));
        store.mark_last_change_persistent();
        assert_eq!(rec.count(), 0);
    }

    #[test]
    fn echo_is_acknowledged_without_reset() {
        let store = TreeStore::new();
        let rec = Rc::new(Recorder::default());
        let ctl = SyncController::bind(&store, recording(&rec, SubtreeId::Root)).expect("bind");

        store.reset_document(BlockList::new(vec![para("a")]));
        let (_, out) = rec.last().expect("call");
        assert_eq!(ctl.pending_len(), 1);
        let revision = store.revision();

        assert_eq!(ctl.set_value(Some(out), None).expect("set"), ValueOutcome::Echo);
        assert_eq!(store.revision(), revision);
        assert_eq!(ctl.pending_len(), 0);
    }

    #[test]
    fn external_change_resets_and_is_not_reported() {
        let store = TreeStore::new();
        let rec = Rc::new(Recorder::default());
        let ctl = SyncController::bind(&store, recording(&rec, SubtreeId::Root)).expect("bind");

        store.reset_document(BlockList::new(vec![para("a")]));
        let external = BlockList::new(vec![para("x"), para("y")]);
        let selection = SelectionRange::caret(SelectionAnchor::block("y"));
        let outcome = ctl.set_value(Some(external.clone()), Some(selection.clone())).expect("set");

        assert_eq!(outcome, ValueOutcome::Reset);
        assert_eq!(store.document(), external);
        assert_eq!(store.selection(), Some(selection));
        assert_eq!(ctl.pending_len(), 0, "stale outgoing values must be dropped");
        assert_eq!(rec.count(), 1, "our own reset must not be reported");
        assert_eq!(ctl.stats().suppressed, 1);
    }

    #[test]
    fn same_reference_twice_is_unchanged() {
        let store = TreeStore::new();
        let value = BlockList::new(vec![para("a")]);
        let ctl = SyncController::bind(&store, SyncConfig::root().value(value.clone())).expect("bind");
        let revision = store.revision();
        assert_eq!(ctl.set_value(Some(value), None).expect("set"), ValueOutcome::Unchanged);
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn none_value_leaves_store_alone() {
        let store = TreeStore::with_document(BlockList::new(vec![para("a")]));
        let ctl = SyncController::bind(&store, SyncConfig::root()).expect("bind");
        assert_eq!(ctl.set_value(None, None).expect("set"), ValueOutcome::Uncontrolled);
        assert_eq!(store.document().len(), 1);
    }

    #[test]
    fn persistence_transition_flushes_change() {
        let store = TreeStore::new();
        let rec = Rc::new(Recorder::default());
        let _ctl = SyncController::bind(&store, recording(&rec, SubtreeId::Root)).expect("bind");

        let typed = BlockList::new(vec![para("a")]);
        store
            .replace_children(&SubtreeId::Root, typed.clone(), ReplaceOptions::provisional())
            .expect("replace");
        store.mark_last_change_persistent();

        let calls = rec.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].0);
        assert!(calls[1].0);
        assert!(calls[1].1.ptr_eq(&typed));
    }

    #[test]
    fn resupplied_latest_output_is_acknowledged() {
        let store = TreeStore::new();
        let rec = Rc::new(Recorder::default());
        let ctl = SyncController::bind(&store, recording(&rec, SubtreeId::Root)).expect("bind");

        store
            .replace_children(&SubtreeId::Root, BlockList::new(vec![para("a")]), ReplaceOptions::provisional())
            .expect("replace");
        let (_, typed) = rec.last().expect("input");
        assert_eq!(ctl.set_value(Some(typed.clone()), None).expect("echo"), ValueOutcome::Echo);

        store.mark_last_change_persistent();
        assert_eq!(ctl.pending_len(), 1);
        assert_eq!(ctl.set_value(Some(typed), None).expect("again"), ValueOutcome::Unchanged);
        assert_eq!(ctl.pending_len(), 0);
    }

    #[test]
    fn second_controller_on_same_subtree_fails() {
        let store = TreeStore::new();
        let _first = SyncController::bind(&store, SyncConfig::root()).expect("bind");
        let err = SyncController::bind(&store, SyncConfig::root()).err().expect("second bind");
        assert!(matches!(err, SyncError::Store(StoreError::AlreadyOwned { .. })));
    }

    #[test]
    fn teardown_stops_delivery_and_releases_claim() {
        let store = TreeStore::new();
        let rec = Rc::new(Recorder::default());
        let ctl = SyncController::bind(&store, recording(&rec, SubtreeId::Root)).expect("bind");
        let handle = ctl.handle();
        ctl.teardown();

        store.reset_document(BlockList::new(vec![para("a")]));
        assert_eq!(rec.count(), 0);
        assert_eq!(
            handle.set_value(Some(BlockList::empty()), None).expect("set"),
            ValueOutcome::Uncontrolled
        );
        assert!(SyncController::bind(&store, SyncConfig::root()).is_ok());
    }

    #[test]
    fn reset_of_missing_nested_block_fails() {
        let store = TreeStore::new();
        let rec = Rc::new(Recorder::default());
        let ctl = SyncController::bind(&store, recording(&rec, SubtreeId::from("ghost"))).expect("bind");
        let err = ctl.set_value(Some(BlockList::new(vec![para("a")])), None).unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::BlockNotFound { .. })));
    }

    #[test]
    fn handlers_are_optional() {
        let store = TreeStore::new();
        let ctl = SyncController::bind(&store, SyncConfig::root()).expect("bind");
        store.reset_document(BlockList::new(vec![para("a")]));
        assert_eq!(ctl.pending_len(), 1, "ledger still tracks outgoing values");
        assert_eq!(ctl.stats().changes, 1);
    }
}
