//! Shared tree store.
//!
//! # Model
//!
//! ```text
//! TreeStore (Rc handle, cloneable)
//!   ├─ root: BlockList          immutable snapshot, path-copied on write
//!   ├─ selection                optional start/end anchors
//!   ├─ persistent / ignored     flags describing the last content change
//!   ├─ controlled / owners      nested-region bookkeeping
//!   └─ listeners                called synchronously after every mutation
//! ```
//!
//! # Reentrancy
//!
//! Listeners run after the internal state borrow has been released, so a
//! listener may read the store or trigger a new mutation. Nested mutations
//! notify in-line before the outer notification loop continues.
//!
//! The store is single-threaded (`Rc`/`RefCell`) by construction.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::mem;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::error::StoreError;
use crate::types::{Block, BlockId, BlockList, ListSettings, SelectionAnchor, SelectionRange, SubtreeId};

// ---------------------------------------------------------------------------
// 1. Handle and state
// ---------------------------------------------------------------------------

/// Cloneable handle to one document session's working store.
#[derive(Clone)]
pub struct TreeStore {
    inner: Rc<StoreInner>,
}

struct StoreInner {
    state: RefCell<StoreState>,
    listeners: RefCell<Vec<Rc<Listener>>>,
    next_listener_id: Cell<u64>,
}

struct Listener {
    id: u64,
    active: Cell<bool>,
    callback: Box<dyn Fn()>,
}

struct StoreState {
    root: BlockList,
    /// Returned for missing subtrees so their identity stays stable.
    empty: BlockList,
    selection: Option<SelectionRange>,
    persistent: bool,
    ignored: bool,
    next_not_persistent: bool,
    /// Block and sorted keys of the last content change, when it was an
    /// attribute update. Repeating it is treated as typing.
    last_attribute_update: Option<(BlockId, Vec<String>)>,
    controlled: HashSet<BlockId>,
    owners: HashSet<SubtreeId>,
    list_settings: HashMap<BlockId, ListSettings>,
    revision: u64,
}

/// Flags for [`TreeStore::replace_children`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOptions {
    /// `false` records the change as provisional.
    pub persistent: bool,
    /// `true` tells sync controllers not to export this change.
    pub ignored: bool,
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            ignored: false,
        }
    }
}

impl ReplaceOptions {
    /// A committed edit.
    pub fn persistent() -> Self {
        Self::default()
    }

    /// An in-progress edit.
    pub fn provisional() -> Self {
        Self {
            persistent: false,
            ignored: false,
        }
    }

    /// A change controllers should not export.
    pub fn ignored() -> Self {
        Self {
            persistent: true,
            ignored: true,
        }
    }
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeStore {
    /// Empty document.
    pub fn new() -> Self {
        Self::with_document(BlockList::empty())
    }

    /// Document seeded with `root`. Seeding does not notify anyone.
    pub fn with_document(root: BlockList) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                state: RefCell::new(StoreState {
                    root,
                    empty: BlockList::empty(),
                    selection: None,
                    persistent: true,
                    ignored: false,
                    next_not_persistent: false,
                    last_attribute_update: None,
                    controlled: HashSet::new(),
                    owners: HashSet::new(),
                    list_settings: HashMap::new(),
                    revision: 0,
                }),
                listeners: RefCell::new(Vec::new()),
                next_listener_id: Cell::new(0),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // 2. Reads
    // -----------------------------------------------------------------------

    /// Current children of `subtree`. A missing block reads as empty.
    pub fn children(&self, subtree: &SubtreeId) -> BlockList {
        let state = self.inner.state.borrow();
        match subtree {
            SubtreeId::Root => state.root.clone(),
            SubtreeId::Block(id) => state
                .root
                .find(id)
                .map(|block| block.children.clone())
                .unwrap_or_else(|| state.empty.clone()),
        }
    }

    /// The whole document.
    pub fn document(&self) -> BlockList {
        self.inner.state.borrow().root.clone()
    }

    pub fn block(&self, id: &BlockId) -> Option<Block> {
        self.inner.state.borrow().root.find(id).cloned()
    }

    /// Subtree that contains `id` as a direct child.
    pub fn parent_of(&self, id: &BlockId) -> Option<SubtreeId> {
        let state = self.inner.state.borrow();
        find_parent(&state.root, id, &SubtreeId::Root)
    }

    pub fn selection(&self) -> Option<SelectionRange> {
        self.inner.state.borrow().selection.clone()
    }

    pub fn is_last_change_persistent(&self) -> bool {
        self.inner.state.borrow().persistent
    }

    pub fn is_last_change_ignored(&self) -> bool {
        self.inner.state.borrow().ignored
    }

    pub fn is_controlled(&self, id: &BlockId) -> bool {
        self.inner.state.borrow().controlled.contains(id)
    }

    pub fn any_controlled(&self) -> bool {
        !self.inner.state.borrow().controlled.is_empty()
    }

    pub fn list_settings(&self, id: &BlockId) -> Option<ListSettings> {
        self.inner.state.borrow().list_settings.get(id).cloned()
    }

    /// Number of content and persistence changes applied so far.
    pub fn revision(&self) -> u64 {
        self.inner.state.borrow().revision
    }

    // -----------------------------------------------------------------------
    // 3. Content mutations
    // -----------------------------------------------------------------------

    /// Replace the children of `subtree`.
    ///
    /// Only the lists on the path from the root to `subtree` are rebuilt;
    /// every other list keeps its identity.
    pub fn replace_children(
        &self,
        subtree: &SubtreeId,
        children: BlockList,
        options: ReplaceOptions,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.inner.state.borrow_mut();
            let next_root = match subtree {
                SubtreeId::Root => children,
                SubtreeId::Block(id) => rewrite(&state.root, id, &mut |block: &Block| Block {
                    children: children.clone(),
                    ..block.clone()
                })
                .ok_or_else(|| StoreError::BlockNotFound { id: id.clone() })?,
            };
            state.root = next_root;
            state.last_attribute_update = None;
            state.commit(options.persistent, options.ignored);
            tracing::debug!(
                subtree = %subtree,
                revision = state.revision,
                persistent = state.persistent,
                ignored = state.ignored,
                "replaced children"
            );
        }
        self.notify();
        Ok(())
    }

    /// Replace the whole document.
    pub fn reset_document(&self, children: BlockList) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.root = children;
            state.last_attribute_update = None;
            state.commit(true, false);
            tracing::debug!(revision = state.revision, "reset document");
        }
        self.notify();
    }

    /// Merge `patch` into a new attributes object for block `id`.
    ///
    /// Updating the same block and the same set of keys as the immediately
    /// preceding attribute update is recorded as provisional (typing).
    pub fn update_block_attributes<I>(&self, id: &BlockId, patch: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let patch: Vec<(String, Value)> = patch.into_iter().collect();
        let mut keys: Vec<String> = patch.iter().map(|(k, _)| k.clone()).collect();
        keys.sort();
        keys.dedup();

        {
            let mut state = self.inner.state.borrow_mut();
            let next_root = rewrite(&state.root, id, &mut |block: &Block| Block {
                attributes: block.attributes.with_patch(patch.iter().cloned()),
                ..block.clone()
            })
            .ok_or_else(|| StoreError::BlockNotFound { id: id.clone() })?;

            let key = (id.clone(), keys);
            let same_as_last = state.last_attribute_update.as_ref() == Some(&key);
            state.root = next_root;
            state.last_attribute_update = Some(key);
            state.commit(!same_as_last, false);
            tracing::debug!(
                block = %id,
                revision = state.revision,
                persistent = state.persistent,
                "updated attributes"
            );
        }
        self.notify();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 4. Flag mutations
    // -----------------------------------------------------------------------

    /// Record the next content change as non-persistent. Does not notify.
    pub fn mark_next_change_non_persistent(&self) {
        self.inner.state.borrow_mut().next_not_persistent = true;
    }

    /// Flip the last change to persistent without touching content.
    ///
    /// A pending [`mark_next_change_non_persistent`](Self::mark_next_change_non_persistent)
    /// hint is left for the next content change.
    pub fn mark_last_change_persistent(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.persistent = true;
            state.ignored = false;
            state.last_attribute_update = None;
            state.revision += 1;
            tracing::debug!(revision = state.revision, "marked last change persistent");
        }
        self.notify();
    }

    pub fn set_selection(&self, start: SelectionAnchor, end: SelectionAnchor) {
        self.inner.state.borrow_mut().selection = Some(SelectionRange { start, end });
        self.notify();
    }

    pub fn clear_selection(&self) {
        self.inner.state.borrow_mut().selection = None;
        self.notify();
    }

    /// Mark or unmark `id` as the root of an externally controlled region.
    pub fn set_controlled(&self, id: &BlockId, controlled: bool) {
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            if controlled {
                state.controlled.insert(id.clone())
            } else {
                state.controlled.remove(id)
            }
        };
        if changed {
            self.notify();
        }
    }

    /// Store nested list settings for `id`. Notifies only on change.
    pub fn set_list_settings(&self, id: &BlockId, settings: ListSettings) {
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            if state.list_settings.get(id) == Some(&settings) {
                false
            } else {
                state.list_settings.insert(id.clone(), settings);
                true
            }
        };
        if changed {
            self.notify();
        }
    }

    // -----------------------------------------------------------------------
    // 5. Subscriptions and ownership
    // -----------------------------------------------------------------------

    /// Register `callback` to run after every mutation.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id + 1);
        let listener = Rc::new(Listener {
            id,
            active: Cell::new(true),
            callback: Box::new(callback),
        });
        self.inner.listeners.borrow_mut().push(Rc::clone(&listener));
        Subscription {
            store: Rc::downgrade(&self.inner),
            listener,
        }
    }

    /// Register single ownership of `subtree`.
    pub fn claim(&self, subtree: &SubtreeId) -> Result<SubtreeClaim, StoreError> {
        let mut state = self.inner.state.borrow_mut();
        if !state.owners.insert(subtree.clone()) {
            tracing::warn!(subtree = %subtree, "rejected second owner");
            return Err(StoreError::AlreadyOwned {
                subtree: subtree.clone(),
            });
        }
        Ok(SubtreeClaim {
            store: Rc::downgrade(&self.inner),
            subtree: subtree.clone(),
        })
    }

    pub fn is_owned(&self, subtree: &SubtreeId) -> bool {
        self.inner.state.borrow().owners.contains(subtree)
    }

    fn notify(&self) {
        let listeners: Vec<Rc<Listener>> = self.inner.listeners.borrow().clone();
        tracing::trace!(listeners = listeners.len(), "notifying store subscribers");
        for listener in listeners {
            if listener.active.get() {
                (listener.callback)();
            }
        }
    }
}

impl StoreState {
    fn commit(&mut self, persistent: bool, ignored: bool) {
        let forced_transient = mem::take(&mut self.next_not_persistent);
        self.persistent = persistent && !forced_transient;
        self.ignored = ignored;
        self.revision += 1;
    }
}

// ---------------------------------------------------------------------------
// 6. RAII guards
// ---------------------------------------------------------------------------

/// Live store subscription. Dropping it unsubscribes.
pub struct Subscription {
    store: Weak<StoreInner>,
    listener: Rc<Listener>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.listener.active.set(false);
        if let Some(inner) = self.store.upgrade() {
            let id = self.listener.id;
            inner.listeners.borrow_mut().retain(|l| l.id != id);
        }
    }
}

/// Single-owner registration for a subtree. Dropping it releases ownership
/// and clears the controlled mark without notifying.
pub struct SubtreeClaim {
    store: Weak<StoreInner>,
    subtree: SubtreeId,
}

impl SubtreeClaim {
    pub fn subtree(&self) -> &SubtreeId {
        &self.subtree
    }
}

impl Drop for SubtreeClaim {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            let mut state = inner.state.borrow_mut();
            state.owners.remove(&self.subtree);
            if let SubtreeId::Block(id) = &self.subtree {
                state.controlled.remove(id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Rebuild `list` with block `target` replaced by `f(block)`.
/// Returns `None` when `target` is not in the tree.
fn rewrite(
    list: &BlockList,
    target: &BlockId,
    f: &mut dyn FnMut(&Block) -> Block,
) -> Option<BlockList> {
    for (index, block) in list.iter().enumerate() {
        let replacement = if &block.id == target {
            Some(f(block))
        } else {
            rewrite(&block.children, target, f).map(|children| Block {
                children,
                ..block.clone()
            })
        };
        if let Some(replacement) = replacement {
            let mut blocks = list.to_vec();
            blocks[index] = replacement;
            return Some(BlockList::new(blocks));
        }
    }
    None
}

fn find_parent(list: &BlockList, target: &BlockId, here: &SubtreeId) -> Option<SubtreeId> {
    for block in list.iter() {
        if &block.id == target {
            return Some(here.clone());
        }
        let nested = SubtreeId::Block(block.id.clone());
        if let Some(found) = find_parent(&block.children, target, &nested) {
            return Some(found);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
