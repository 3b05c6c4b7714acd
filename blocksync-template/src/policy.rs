//! When to apply a template, and the list settings a subtree publishes.

use serde::Serialize;

use blocksync_core::{BlockId, ListSettings, ReplaceOptions, SelectionAnchor, SubtreeId, TemplateLock, TreeStore};

use crate::engine::{TemplateEntry, TemplateReconciler};
use crate::error::TemplateError;

// ---------------------------------------------------------------------------
// Nested settings
// ---------------------------------------------------------------------------

/// Lock requested by a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockSetting {
    /// Use the parent subtree's lock.
    #[default]
    Inherit,
    Unlocked,
    Locked(TemplateLock),
}

impl From<Option<TemplateLock>> for LockSetting {
    fn from(lock: Option<TemplateLock>) -> Self {
        match lock {
            Some(lock) => LockSetting::Locked(lock),
            None => LockSetting::Unlocked,
        }
    }
}

/// Settings a block declares for its own children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedSettings {
    pub allowed_types: Option<Vec<String>>,
    pub template_lock: LockSetting,
    pub capture_toolbars: bool,
}

impl NestedSettings {
    /// Lock of the subtree that contains block `id`.
    pub fn parent_lock(store: &TreeStore, id: &BlockId) -> Option<TemplateLock> {
        match store.parent_of(id)? {
            SubtreeId::Root => None,
            SubtreeId::Block(parent) => store.list_settings(&parent)?.template_lock,
        }
    }

    /// Resolve against the parent lock and publish for `id`.
    ///
    /// The store is only written, and subscribers only notified, when the
    /// resolved settings differ from what is already stored.
    pub fn apply(&self, store: &TreeStore, id: &BlockId) -> ListSettings {
        let template_lock = match self.template_lock {
            LockSetting::Inherit => Self::parent_lock(store, id),
            LockSetting::Unlocked => None,
            LockSetting::Locked(lock) => Some(lock),
        };
        let settings = ListSettings {
            allowed_types: self.allowed_types.clone(),
            template_lock,
            capture_toolbars: self.capture_toolbars,
        };
        if store.list_settings(id).as_ref() != Some(&settings) {
            tracing::debug!(block = %id, lock = ?settings.template_lock, "publishing list settings");
            store.set_list_settings(id, settings.clone());
        }
        settings
    }
}

// ---------------------------------------------------------------------------
// Template invocation
// ---------------------------------------------------------------------------

/// Result of [`TemplateSync::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateOutcome {
    /// Subtree has content and is not locked to its template.
    NotApplicable,
    /// Template is deep-equal to the one applied last time.
    TemplateUnchanged,
    /// Reconciled children already equal the current children.
    UpToDate,
    /// Children were replaced.
    Replaced,
}

/// Applies a template to one subtree under the lock and change-detection
/// rules, owning its reconciler and the last template seen.
pub struct TemplateSync<R> {
    subtree: SubtreeId,
    reconciler: R,
    last_template: Option<Vec<TemplateEntry>>,
    update_selection_on_insert: bool,
}

impl<R: TemplateReconciler> TemplateSync<R> {
    pub fn new(subtree: impl Into<SubtreeId>, reconciler: R) -> Self {
        Self {
            subtree: subtree.into(),
            reconciler,
            last_template: None,
            update_selection_on_insert: false,
        }
    }

    /// Select the first inserted block when filling an empty subtree.
    pub fn update_selection_on_insert(mut self, enabled: bool) -> Self {
        self.update_selection_on_insert = enabled;
        self
    }

    pub fn subtree(&self) -> &SubtreeId {
        &self.subtree
    }

    /// Reconcile the subtree against `template` if the policy allows it.
    ///
    /// `lock` is the subtree's effective lock.
    pub fn apply(
        &mut self,
        store: &TreeStore,
        template: &[TemplateEntry],
        lock: Option<TemplateLock>,
    ) -> Result<TemplateOutcome, TemplateError> {
        let current = store.children(&self.subtree);
        if !current.is_empty() && lock != Some(TemplateLock::All) {
            return Ok(TemplateOutcome::NotApplicable);
        }
        if self.last_template.as_deref() == Some(template) {
            return Ok(TemplateOutcome::TemplateUnchanged);
        }
        self.last_template = Some(template.to_vec());

        let next = self.reconciler.reconcile(&current, template);
        if next == current {
            tracing::trace!(subtree = %self.subtree, "template already satisfied");
            return Ok(TemplateOutcome::UpToDate);
        }

        let select_first = current.is_empty() && self.update_selection_on_insert;
        let first = next.first().map(|block| block.id.clone());
        tracing::debug!(
            subtree = %self.subtree,
            before = current.len(),
            after = next.len(),
            "applying template"
        );
        store.replace_children(&self.subtree, next, ReplaceOptions::persistent())?;
        if let (true, Some(first)) = (select_first, first) {
            store.set_selection(SelectionAnchor::block(first.clone()), SelectionAnchor::block(first));
        }
        Ok(TemplateOutcome::Replaced)
    }
}
