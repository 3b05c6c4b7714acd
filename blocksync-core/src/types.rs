//! Domain types for the block tree.
//!
//! Every value here is immutable once built. `Attributes` and `BlockList`
//! wrap an `Arc`, so cloning is cheap and identity (`ptr_eq`) can be used as
//! a change signal: the store only allocates new lists along the path it
//! rewrites.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed block identifier, unique within a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub String);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BlockId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Address of a subtree: the whole document, or the children of one block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<BlockId>", into = "Option<BlockId>")]
pub enum SubtreeId {
    #[default]
    Root,
    Block(BlockId),
}

impl SubtreeId {
    /// The block id for a nested subtree, `None` for the root.
    pub fn block_id(&self) -> Option<&BlockId> {
        match self {
            SubtreeId::Root => None,
            SubtreeId::Block(id) => Some(id),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, SubtreeId::Root)
    }
}

impl fmt::Display for SubtreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubtreeId::Root => write!(f, "root"),
            SubtreeId::Block(id) => id.fmt(f),
        }
    }
}

impl From<Option<BlockId>> for SubtreeId {
    fn from(id: Option<BlockId>) -> Self {
        id.map_or(SubtreeId::Root, SubtreeId::Block)
    }
}

impl From<SubtreeId> for Option<BlockId> {
    fn from(id: SubtreeId) -> Self {
        match id {
            SubtreeId::Root => None,
            SubtreeId::Block(id) => Some(id),
        }
    }
}

impl From<BlockId> for SubtreeId {
    fn from(id: BlockId) -> Self {
        SubtreeId::Block(id)
    }
}

impl From<&str> for SubtreeId {
    fn from(id: &str) -> Self {
        SubtreeId::Block(BlockId::from(id))
    }
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Immutable, shared attribute mapping.
///
/// Attributes are replaced, never mutated: [`Attributes::with_patch`] builds
/// a new object. Caches keyed on attribute identity rely on this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(Arc<BTreeMap<String, Value>>);

impl Attributes {
    pub fn new(map: BTreeMap<String, Value>) -> Self {
        Self(Arc::new(map))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    /// Identity comparison: true only for clones of the same object.
    pub fn ptr_eq(a: &Attributes, b: &Attributes) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Address of the shared map, usable as an identity key.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Weak handle to the shared map.
    pub fn downgrade(&self) -> std::sync::Weak<BTreeMap<String, Value>> {
        Arc::downgrade(&self.0)
    }

    /// New attributes object with `patch` merged over the current values.
    pub fn with_patch<I>(&self, patch: I) -> Attributes
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut map = (*self.0).clone();
        map.extend(patch);
        Attributes::new(map)
    }
}

impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        Attributes::ptr_eq(self, other) || self.0 == other.0
    }
}

impl FromIterator<(String, Value)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Attributes::new(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for Attributes {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Attributes::new(map)
    }
}

// ---------------------------------------------------------------------------
// Block / BlockList
// ---------------------------------------------------------------------------

/// A node of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "BlockList::is_empty")]
    pub children: BlockList,
}

impl Block {
    pub fn new(id: impl Into<BlockId>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            attributes: Attributes::default(),
            children: BlockList::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_children(mut self, children: impl Into<BlockList>) -> Self {
        self.children = children.into();
        self
    }
}

/// Immutable, shared, ordered sequence of blocks.
///
/// `PartialEq` is structural; [`BlockList::ptr_eq`] is the identity fast path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockList(Arc<[Block]>);

impl BlockList {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self(Arc::from(blocks))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ptr_eq(&self, other: &BlockList) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_slice(&self) -> &[Block] {
        &self.0
    }

    /// Shallow structural equality.
    ///
    /// Elements match when id and type name are equal and attributes are the
    /// same object. Children lists that are not the same object are compared
    /// the same way, except below blocks for which `is_masked` returns true:
    /// their content is owned elsewhere and is ignored here.
    pub fn shallow_eq_masked<F>(&self, other: &BlockList, is_masked: &F) -> bool
    where
        F: Fn(&BlockId) -> bool,
    {
        if self.ptr_eq(other) {
            return true;
        }
        self.len() == other.len()
            && self.iter().zip(other.iter()).all(|(a, b)| {
                a.id == b.id
                    && a.type_name == b.type_name
                    && Attributes::ptr_eq(&a.attributes, &b.attributes)
                    && (is_masked(&a.id) || a.children.shallow_eq_masked(&b.children, is_masked))
            })
    }

    /// Depth-first search for a block by id.
    pub fn find(&self, id: &BlockId) -> Option<&Block> {
        self.iter().find_map(|block| {
            if &block.id == id {
                Some(block)
            } else {
                block.children.find(id)
            }
        })
    }

    /// Ids of every block in the tree, depth-first.
    pub fn ids(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        collect_ids(self, &mut out);
        out
    }
}

fn collect_ids(list: &BlockList, out: &mut Vec<BlockId>) {
    for block in list.iter() {
        out.push(block.id.clone());
        collect_ids(&block.children, out);
    }
}

impl Default for BlockList {
    fn default() -> Self {
        Self::empty()
    }
}

impl Deref for BlockList {
    type Target = [Block];

    fn deref(&self) -> &[Block] {
        &self.0
    }
}

impl PartialEq for BlockList {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0[..] == other.0[..]
    }
}

impl From<Vec<Block>> for BlockList {
    fn from(blocks: Vec<Block>) -> Self {
        Self::new(blocks)
    }
}

impl FromIterator<Block> for BlockList {
    fn from_iter<T: IntoIterator<Item = Block>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// One end of a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionAnchor {
    pub block_id: BlockId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl SelectionAnchor {
    pub fn block(id: impl Into<BlockId>) -> Self {
        Self {
            block_id: id.into(),
            attribute_key: None,
            offset: None,
        }
    }

    pub fn at(id: impl Into<BlockId>, attribute_key: impl Into<String>, offset: usize) -> Self {
        Self {
            block_id: id.into(),
            attribute_key: Some(attribute_key.into()),
            offset: Some(offset),
        }
    }
}

/// Logical selection between two anchors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub start: SelectionAnchor,
    pub end: SelectionAnchor,
}

impl SelectionRange {
    pub fn new(start: SelectionAnchor, end: SelectionAnchor) -> Self {
        Self { start, end }
    }

    /// A collapsed selection on a single anchor.
    pub fn caret(anchor: SelectionAnchor) -> Self {
        Self {
            start: anchor.clone(),
            end: anchor,
        }
    }
}

// ---------------------------------------------------------------------------
// Nested list settings
// ---------------------------------------------------------------------------

/// How strictly a subtree is held to its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateLock {
    /// Blocks can be moved but not inserted or removed.
    Insert,
    /// The subtree always mirrors its template.
    All,
}

impl fmt::Display for TemplateLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateLock::Insert => write!(f, "insert"),
            TemplateLock::All => write!(f, "all"),
        }
    }
}

/// Resolved settings for one nested block list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_lock: Option<TemplateLock>,
    #[serde(default)]
    pub capture_toolbars: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
