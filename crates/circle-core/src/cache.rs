//! Query cache - snapshot results keyed by query shape
//!
//! One generation of entries exists per observed block height. Observing a
//! newer block swaps in an empty generation; there is no per-entry
//! invalidation.

use circle_types::{Address, BlockHeight, CircleId};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shape of a cached query
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// `nextCircleId`
    CircleCount,
    /// Batched info + details + members for these identifiers
    Circles(Vec<CircleId>),
    /// Caller-specific detail view of one circle
    View { circle_id: CircleId, caller: Address },
}

struct Generation<V> {
    block: BlockHeight,
    entries: DashMap<QueryKey, V>,
}

impl<V> Generation<V> {
    fn new(block: BlockHeight) -> Self {
        Self {
            block,
            entries: DashMap::new(),
        }
    }
}

/// Block-scoped cache of query results
pub struct QueryCache<V> {
    current: RwLock<Arc<Generation<V>>>,
}

impl<V: Clone> QueryCache<V> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Generation::new(0))),
        }
    }

    /// Block height the live generation belongs to
    pub fn block(&self) -> BlockHeight {
        self.current.read().block
    }

    /// Drop everything if `block` is newer than the live generation
    ///
    /// Returns true when the cache was invalidated.
    pub fn observe_block(&self, block: BlockHeight) -> bool {
        let mut current = self.current.write();
        if block <= current.block {
            return false;
        }
        let dropped = current.entries.len();
        *current = Arc::new(Generation::new(block));
        tracing::debug!("Query cache moved to block {} ({} entries dropped)", block, dropped);
        true
    }

    /// Cached value for `key` at `block`, if any
    pub fn get(&self, key: &QueryKey, block: BlockHeight) -> Option<V> {
        let generation = self.current.read().clone();
        if generation.block != block {
            return None;
        }
        generation.entries.get(key).map(|v| v.value().clone())
    }

    /// Store a value fetched at `block`; results from an older block are discarded
    pub fn insert(&self, key: QueryKey, block: BlockHeight, value: V) {
        let generation = self.current.read().clone();
        if generation.block == block {
            generation.entries.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.current.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
