//! Template reconciliation: [`TemplateReconciler`] and the position-wise
//! [`TemplateSynchronizer`].
//!
//! # Matching rules
//!
//! | Current block at index `i`     | Result                                            |
//! |--------------------------------|---------------------------------------------------|
//! | same type as template entry    | kept: id, attributes, children (reconciled if the |
//! |                                | entry has a child template)                       |
//! | different type, or missing     | new block built from the entry                    |
//! | past the end of the template   | dropped                                           |
//!
//! An empty template leaves the current children alone.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use blocksync_core::{Attributes, Block, BlockId, BlockList};

use crate::error::{io_err, TemplateError};

// ---------------------------------------------------------------------------
// Template entries and file loading
// ---------------------------------------------------------------------------

/// One declarative template entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateEntry {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TemplateEntry>>,
}

impl TemplateEntry {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes: Attributes::default(),
            children: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_children(mut self, children: Vec<TemplateEntry>) -> Self {
        self.children = Some(children);
        self
    }
}

/// Read a YAML or JSON file, chosen by extension.
pub(crate) fn read_structured<T: DeserializeOwned>(path: &Path) -> Result<T, TemplateError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let is_json = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(&text)?)
    } else {
        Ok(serde_yaml::from_str(&text)?)
    }
}

pub fn load_template(path: &Path) -> Result<Vec<TemplateEntry>, TemplateError> {
    read_structured(path)
}

/// Load a block tree (a document or one subtree's children).
pub fn load_blocks(path: &Path) -> Result<BlockList, TemplateError> {
    read_structured(path)
}

// ---------------------------------------------------------------------------
// Id generation
// ---------------------------------------------------------------------------

/// Sequential ids of the form `<seed>-<n>`.
#[derive(Debug, Clone)]
pub struct BlockIdGenerator {
    seed: String,
    count: u32,
}

impl BlockIdGenerator {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            count: 0,
        }
    }

    pub fn new_id(&mut self) -> BlockId {
        self.count += 1;
        BlockId(format!("{}-{}", self.seed, self.count))
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }
}

impl Default for BlockIdGenerator {
    fn default() -> Self {
        Self::new("tpl")
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Turns current children plus a template into canonical children.
pub trait TemplateReconciler {
    fn reconcile(&mut self, current: &BlockList, template: &[TemplateEntry]) -> BlockList;
}

/// Position-wise reference reconciler.
#[derive(Debug, Default)]
pub struct TemplateSynchronizer {
    ids: BlockIdGenerator,
}

impl TemplateSynchronizer {
    pub fn new(ids: BlockIdGenerator) -> Self {
        Self { ids }
    }

    fn create(&mut self, entry: &TemplateEntry) -> Block {
        let children: BlockList = entry
            .children
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|child| self.create(child))
            .collect();
        Block::new(self.ids.new_id(), entry.type_name.clone())
            .with_attributes(entry.attributes.clone())
            .with_children(children)
    }
}

impl TemplateReconciler for TemplateSynchronizer {
    fn reconcile(&mut self, current: &BlockList, template: &[TemplateEntry]) -> BlockList {
        if template.is_empty() {
            return current.clone();
        }

        let next: BlockList = template
            .iter()
            .enumerate()
            .map(|(index, entry)| match current.get(index) {
                Some(existing) if existing.type_name == entry.type_name => {
                    let children = match &entry.children {
                        Some(child_template) => self.reconcile(&existing.children, child_template),
                        None => existing.children.clone(),
                    };
                    Block {
                        children,
                        ..existing.clone()
                    }
                }
                _ => self.create(entry),
            })
            .collect();

        if next == *current {
            current.clone()
        } else {
            tracing::trace!(before = current.len(), after = next.len(), "reconciled against template");
            next
        }
    }
}
