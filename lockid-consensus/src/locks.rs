//! Striped locks serialising transitions that touch the same state
//!
//! Each outpoint, identity and first-key hash hashes to one of a fixed set
//! of mutex shards. A transition locks the shards of all its keys in
//! ascending shard order, so overlapping transitions are linearised while
//! disjoint ones proceed in parallel.

use lockid_core::{IdentityId, OutPoint, PublicKeyHash};
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

/// State a transition reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    Outpoint(OutPoint),
    Identity(IdentityId),
    FirstKey(PublicKeyHash),
}

#[derive(Debug)]
pub struct LockTable {
    shards: Vec<Mutex<()>>,
    hasher: RandomState,
}

/// Holds the shards locked for one transition until dropped
#[must_use]
pub struct LockGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl LockTable {
    /// Create a table with `shard_count` shards (at least one)
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(Mutex::new(()));
        }
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard_index(&self, key: &LockKey) -> usize {
        let mut h = self.hasher.build_hasher();
        key.hash(&mut h);
        (h.finish() as usize) % self.shards.len()
    }

    /// Lock every shard covering `keys`, blocking until all are held
    pub fn lock(&self, keys: &[LockKey]) -> LockGuard<'_> {
        let mut indices: Vec<usize> = keys.iter().map(|key| self.shard_index(key)).collect();
        indices.sort_unstable();
        indices.dedup();

        LockGuard {
            _guards: indices.into_iter().map(|i| self.shards[i].lock()).collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}
