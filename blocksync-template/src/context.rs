//! Block context: values a block type exposes to its descendants.
//!
//! A [`BlockType`] declares `provides_context: { context key → attribute }`.
//! [`ContextCache`] memoizes the derived mapping per (block type, attributes
//! object). The key is identity, not content: a new attributes object with
//! the same content is a miss. Entries hold only weak references.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use blocksync_core::{Attributes, Block};

use crate::engine::read_structured;
use crate::error::TemplateError;

/// Derived context: context key → attribute value.
pub type BlockContext = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Block types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockType {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provides_context: BTreeMap<String, String>,
}

impl BlockType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provides_context: BTreeMap::new(),
        }
    }

    pub fn provides(mut self, context_key: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.provides_context.insert(context_key.into(), attribute.into());
        self
    }
}

/// Block types by name. Each registered type has a stable `Arc` identity.
#[derive(Debug, Default)]
pub struct BlockTypeRegistry {
    types: HashMap<String, Arc<BlockType>>,
}

impl BlockTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML or JSON list of block types.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let types: Vec<BlockType> = read_structured(path)?;
        let mut registry = Self::new();
        for block_type in types {
            registry.register(block_type);
        }
        Ok(registry)
    }

    /// Register `block_type`, replacing any type with the same name.
    pub fn register(&mut self, block_type: BlockType) -> Arc<BlockType> {
        let block_type = Arc::new(block_type);
        self.types.insert(block_type.name.clone(), Arc::clone(&block_type));
        block_type
    }

    pub fn get(&self, name: &str) -> Option<Arc<BlockType>> {
        self.types.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    block_type: Weak<BlockType>,
    attributes: Weak<BTreeMap<String, Value>>,
    context: Arc<BlockContext>,
}

impl CacheEntry {
    // A live weak reference pins the allocation, so the address key cannot
    // be reused by another object while the entry exists.
    fn is_live(&self) -> bool {
        self.block_type.strong_count() > 0 && self.attributes.strong_count() > 0
    }
}

/// Entry count below which the cache never sweeps on insert.
const MIN_SWEEP_THRESHOLD: usize = 64;

pub struct ContextCache {
    entries: HashMap<(usize, usize), CacheEntry>,
    /// Insert-time sweep triggers once `entries` reaches this size.
    sweep_at: usize,
    hits: u64,
    misses: u64,
}

impl Default for ContextCache {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            sweep_at: MIN_SWEEP_THRESHOLD,
            hits: 0,
            misses: 0,
        }
    }
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for `attributes` under `block_type`, computed at most once per
    /// live attributes object.
    pub fn context(&mut self, block_type: &Arc<BlockType>, attributes: &Attributes) -> Arc<BlockContext> {
        let key = (Arc::as_ptr(block_type) as usize, attributes.identity());
        if let Some(entry) = self.entries.get(&key) {
            if entry.is_live() {
                self.hits += 1;
                return Arc::clone(&entry.context);
            }
        }

        self.misses += 1;
        let context: BlockContext = block_type
            .provides_context
            .iter()
            .filter_map(|(name, attribute)| attributes.get(attribute).map(|value| (name.clone(), value.clone())))
            .collect();
        let context = Arc::new(context);
        if self.entries.len() >= self.sweep_at {
            self.prune();
            self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_THRESHOLD);
        }
        self.entries.insert(
            key,
            CacheEntry {
                block_type: Arc::downgrade(block_type),
                attributes: attributes.downgrade(),
                context: Arc::clone(&context),
            },
        );
        tracing::trace!(block_type = %block_type.name, keys = context.len(), "computed block context");
        context
    }

    /// Context `block` provides to its children, if its type provides any.
    pub fn context_for(&mut self, registry: &BlockTypeRegistry, block: &Block) -> Option<Arc<BlockContext>> {
        let block_type = registry.get(&block.type_name)?;
        if block_type.provides_context.is_empty() {
            return None;
        }
        Some(self.context(&block_type, &block.attributes))
    }

    /// Drop entries whose block type or attributes object is gone.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live());
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "pruned block context cache");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since construction.
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_type() -> Arc<BlockType> {
        Arc::new(BlockType::new("core/group").provides("group/tag", "tagName"))
    }

    fn attrs(tag: &str) -> Attributes {
        [("tagName".to_string(), json!(tag)), ("align".to_string(), json!("wide"))]
            .into_iter()
            .collect()
    }

    #[test]
    fn only_declared_attributes_are_exposed() {
        let mut cache = ContextCache::new();
        let ctx = cache.context(&group_type(), &attrs("section"));
        assert_eq!(ctx.get("group/tag"), Some(&json!("section")));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn same_attributes_object_hits() {
        let mut cache = ContextCache::new();
        let ty = group_type();
        let a = attrs("section");
        let first = cache.context(&ty, &a);
        let second = cache.context(&ty, &a.clone());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.counters(), (1, 1));
    }

    #[test]
    fn equal_content_in_new_object_misses() {
        let mut cache = ContextCache::new();
        let ty = group_type();
        let first = cache.context(&ty, &attrs("section"));
        let kept = attrs("section");
        let second = cache.context(&ty, &kept);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[test]
    fn prune_drops_entries_for_released_attributes() {
        let mut cache = ContextCache::new();
        let ty = group_type();
        let kept = attrs("main");
        cache.context(&ty, &kept);
        {
            let transient = attrs("aside");
            cache.context(&ty, &transient);
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.prune(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn released_attributes_are_swept_on_insert() {
        let mut cache = ContextCache::new();
        let ty = group_type();
        let kept = attrs("main");
        let kept_ctx = cache.context(&ty, &kept);

        for i in 0..1_000 {
            let keystroke = attrs(&format!("section-{i}"));
            cache.context(&ty, &keystroke);
            assert!(cache.len() <= MIN_SWEEP_THRESHOLD, "cache grew to {}", cache.len());
        }
        assert!(Arc::ptr_eq(&kept_ctx, &cache.context(&ty, &kept)));
    }

    #[test]
    fn context_for_skips_types_without_context() {
        let mut registry = BlockTypeRegistry::new();
        registry.register(BlockType::new("core/paragraph"));
        registry.register(BlockType::new("core/group").provides("group/tag", "tagName"));
        let mut cache = ContextCache::new();

        let para = Block::new("p", "core/paragraph");
        let unknown = Block::new("u", "acme/widget");
        let group = Block::new("g", "core/group").with_attributes(attrs("section"));
        assert!(cache.context_for(&registry, &para).is_none());
        assert!(cache.context_for(&registry, &unknown).is_none());
        assert!(cache.context_for(&registry, &group).is_some());
    }
}
