//! Content fingerprints: SHA-256 digests of a block list's structure.
//!
//! Two lists with the same ids, type names, attributes and children (in
//! order) share a fingerprint regardless of identity. Attribute maps are
//! ordered, so the digest is deterministic.

use std::fmt;

use sha2::{Digest, Sha256};

use blocksync_core::BlockList;

/// Hex-encoded SHA-256 digest of a block list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest `blocks`.
    pub fn of(blocks: &BlockList) -> Self {
        let mut hasher = Sha256::new();
        feed(&mut hasher, blocks);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn feed(hasher: &mut Sha256, blocks: &BlockList) {
    hasher.update((blocks.len() as u64).to_le_bytes());
    for block in blocks.iter() {
        field(hasher, &block.id.0);
        field(hasher, &block.type_name);
        hasher.update((block.attributes.len() as u64).to_le_bytes());
        for (key, value) in block.attributes.iter() {
            field(hasher, key);
            field(hasher, &value.to_string());
        }
        feed(hasher, &block.children);
    }
}

/// Length-prefixed, so no byte inside a field can shift a boundary.
fn field(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_core::{Attributes, Block};
    use serde_json::json;

    fn list(content: &str) -> BlockList {
        let attrs: Attributes = [("content".to_string(), json!(content))].into_iter().collect();
        BlockList::new(vec![
            Block::new("a", "core/paragraph").with_attributes(attrs),
            Block::new("g", "core/group").with_children(vec![Block::new("g1", "core/paragraph")]),
        ])
    }

    #[test]
    fn equal_content_shares_fingerprint() {
        let a = list("hello");
        let b = list("hello");
        assert!(!a.ptr_eq(&b));
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn attribute_change_changes_fingerprint() {
        assert_ne!(Fingerprint::of(&list("hello")), Fingerprint::of(&list("hello!")));
    }

    #[test]
    fn nesting_is_part_of_the_digest() {
        let flat = BlockList::new(vec![Block::new("g", "core/group"), Block::new("g1", "core/paragraph")]);
        let nested = BlockList::new(vec![
            Block::new("g", "core/group").with_children(vec![Block::new("g1", "core/paragraph")]),
        ]);
        assert_ne!(Fingerprint::of(&flat), Fingerprint::of(&nested));
    }

    #[test]
    fn field_boundaries_cannot_be_shifted() {
        let left = BlockList::new(vec![Block::new("a\0p", "x")]);
        let right = BlockList::new(vec![Block::new("a", "p\0x")]);
        assert_ne!(Fingerprint::of(&left), Fingerprint::of(&right));

        let key_split: Attributes = [("k=v".to_string(), json!("w"))].into_iter().collect();
        let value_split: Attributes = [("k".to_string(), json!("v=w"))].into_iter().collect();
        assert_ne!(
            Fingerprint::of(&BlockList::new(vec![Block::new("a", "t").with_attributes(key_split)])),
            Fingerprint::of(&BlockList::new(vec![Block::new("a", "t").with_attributes(value_split)]))
        );
    }

    #[test]
    fn digest_is_hex_sha256() {
        let fp = Fingerprint::of(&BlockList::empty());
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
