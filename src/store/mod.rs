// =============================================================================
// Decision Store — Keyed, atomically replaced decision records
// =============================================================================
//
// The store exclusively owns Decision records: the stability manager is the
// only writer, everything else reads.  `put` atomically replaces the active
// record per (instrument, horizon) key, and concurrent readers only ever see
// the last fully written value.
//
// Generation rule: an incoming decision with a *different* id than the
// stored one is a new generation — the replaced record is archived into the
// incoming record's bounded history.  Same-id puts are in-place refreshes
// (bumped `updated_at`, pending counters) and do not grow history.
// =============================================================================

mod file;

pub use file::FileDecisionStore;

use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::decision::Decision;
use crate::types::DecisionKey;

/// Logical contract for decision persistence.  Implementations must make
/// `put` atomic per key: a crash mid-write never corrupts the previously
/// committed value.
pub trait DecisionStore: Send + Sync {
    fn get(&self, key: &DecisionKey) -> Result<Option<Decision>>;

    /// Atomically replace the active record for the decision's key.
    fn put(&self, decision: Decision) -> Result<()>;

    /// All currently active decisions, one per key, in no particular order.
    fn all_active(&self) -> Result<Vec<Decision>>;
}

/// Apply the generation rule: graft the replaced record's history chain
/// (plus a snapshot of the record itself) onto the incoming decision,
/// bounded by `cap`.  No-op when the id is unchanged.
pub(crate) fn archive_replaced(incoming: &mut Decision, previous: &Decision, cap: usize) {
    if previous.id == incoming.id {
        return;
    }
    let mut history = previous.history.clone();
    history.push(previous.snapshot(incoming.created_at));
    while history.len() > cap {
        history.remove(0);
    }
    incoming.history = history;
}

// =============================================================================
// In-memory store
// =============================================================================

/// Process-local store backed by a locked map.  Used in tests and as the
/// cache layer semantics reference for the file-backed store.
pub struct MemoryDecisionStore {
    inner: RwLock<HashMap<DecisionKey, Decision>>,
    history_cap: usize,
}

impl MemoryDecisionStore {
    pub fn new(history_cap: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            history_cap,
        }
    }
}

impl DecisionStore for MemoryDecisionStore {
    fn get(&self, key: &DecisionKey) -> Result<Option<Decision>> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn put(&self, mut decision: Decision) -> Result<()> {
        let key = decision.key();
        let mut map = self.inner.write();
        if let Some(previous) = map.get(&key) {
            archive_replaced(&mut decision, previous, self.history_cap);
        }
        map.insert(key, decision);
        Ok(())
    }

    fn all_active(&self) -> Result<Vec<Decision>> {
        Ok(self.inner.read().values().cloned().collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
