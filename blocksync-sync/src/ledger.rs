//! Pending-change ledger: outgoing values awaiting their echo.
//!
//! Only the most recent push can be recognized as an echo. Older entries
//! are superseded; they are evicted once the ledger is at capacity and
//! dropped wholesale when the tail is acknowledged or a genuine external
//! change arrives.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use blocksync_core::BlockList;

use crate::fingerprint::Fingerprint;

/// Default number of outgoing values retained.
pub const DEFAULT_CAPACITY: usize = 32;

/// How an incoming value is matched against the ledger tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoPolicy {
    /// Same `Arc` only.
    #[default]
    Reference,
    /// Same `Arc`, or same content fingerprint. For hosts that clone or
    /// round-trip values before handing them back.
    Fingerprint,
}

#[derive(Debug)]
struct Entry {
    value: BlockList,
    fingerprint: Option<Fingerprint>,
}

/// FIFO of outgoing values.
#[derive(Debug)]
pub struct PendingLedger {
    entries: VecDeque<Entry>,
    capacity: usize,
    policy: EchoPolicy,
}

impl Default for PendingLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, EchoPolicy::default())
    }
}

impl PendingLedger {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize, policy: EchoPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            policy,
        }
    }

    /// Append `value`, evicting the oldest entry when full.
    pub fn push(&mut self, value: BlockList) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let fingerprint = match self.policy {
            EchoPolicy::Reference => None,
            EchoPolicy::Fingerprint => Some(Fingerprint::of(&value)),
        };
        self.entries.push_back(Entry { value, fingerprint });
    }

    /// True when `value` is the echo of the last push.
    pub fn matches_tail(&self, value: &BlockList) -> bool {
        let Some(tail) = self.entries.back() else {
            return false;
        };
        if tail.value.ptr_eq(value) {
            return true;
        }
        match (&self.policy, &tail.fingerprint) {
            (EchoPolicy::Fingerprint, Some(expected)) => *expected == Fingerprint::of(value),
            _ => false,
        }
    }

    /// Drop every entry, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.entries.len();
        self.entries.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EchoPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_core::Block;

    fn value(id: &str) -> BlockList {
        BlockList::new(vec![Block::new(id, "core/paragraph")])
    }

    #[test]
    fn only_tail_is_an_echo() {
        let mut ledger = PendingLedger::default();
        let first = value("a");
        let second = value("b");
        ledger.push(first.clone());
        ledger.push(second.clone());
        assert!(ledger.matches_tail(&second));
        assert!(!ledger.matches_tail(&first));
    }

    #[test]
    fn reference_policy_rejects_equal_clone() {
        let mut ledger = PendingLedger::new(4, EchoPolicy::Reference);
        ledger.push(value("a"));
        assert!(!ledger.matches_tail(&value("a")));
    }

    #[test]
    fn fingerprint_policy_accepts_equal_clone() {
        let mut ledger = PendingLedger::new(4, EchoPolicy::Fingerprint);
        ledger.push(value("a"));
        assert!(ledger.matches_tail(&value("a")));
        assert!(!ledger.matches_tail(&value("b")));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut ledger = PendingLedger::new(3, EchoPolicy::Reference);
        for i in 0..10 {
            ledger.push(value(&format!("v{i}")));
        }
        assert_eq!(ledger.len(), 3);
        let newest = value("v9");
        ledger.push(newest.clone());
        assert_eq!(ledger.len(), 3);
        assert!(ledger.matches_tail(&newest));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut ledger = PendingLedger::new(0, EchoPolicy::Reference);
        let v = value("a");
        ledger.push(v.clone());
        assert_eq!(ledger.capacity(), 1);
        assert!(ledger.matches_tail(&v));
    }

    #[test]
    fn clear_reports_discarded_entries() {
        let mut ledger = PendingLedger::default();
        ledger.push(value("a"));
        ledger.push(value("b"));
        assert_eq!(ledger.clear(), 2);
        assert!(ledger.is_empty());
        assert!(!ledger.matches_tail(&value("a")));
    }
}
