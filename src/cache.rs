// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! In-memory cache of decoded node bytes, keyed by file and node offset.
//!
//! Root and near-root internal nodes are read on every lookup; caching their
//! bytes avoids repeatedly faulting the same mmap pages in on cold caches,
//! and gives callers a stable [`Slice`] to hand a node view over without
//! re-touching the mapped region. Leaves are far more numerous and far less
//! frequently revisited, so they get a much smaller budget.

use crate::Slice;
use quick_cache::{sync::Cache as QuickCache, UnitWeighter};

/// Default number of cached internal-node byte ranges.
pub const DEFAULT_INTERNAL_CAPACITY: usize = 64;
/// Default number of cached leaf-node byte ranges.
pub const DEFAULT_LEAF_CAPACITY: usize = 8;

#[derive(Eq, std::hash::Hash, PartialEq)]
struct CacheKey(u64, u64);

type Item = Slice;

/// Caches decoded node byte ranges for the PBT files a database has open.
///
/// `file_id` disambiguates nodes across files, so a single pair of caches
/// can be shared across every reader a [`crate::db::Database`] holds.
pub struct NodeCache {
    internal: QuickCache<CacheKey, Item, UnitWeighter, rustc_hash::FxBuildHasher>,
    leaf: QuickCache<CacheKey, Item, UnitWeighter, rustc_hash::FxBuildHasher>,
}

impl NodeCache {
    #[must_use]
    pub fn new(internal_capacity: usize, leaf_capacity: usize) -> Self {
        Self {
            internal: new_cache(internal_capacity),
            leaf: new_cache(leaf_capacity),
        }
    }

    #[must_use]
    pub fn get_internal(&self, file_id: u64, offset: u64) -> Option<Slice> {
        self.internal.get(&CacheKey(file_id, offset))
    }

    pub fn insert_internal(&self, file_id: u64, offset: u64, bytes: Slice) {
        self.internal.insert(CacheKey(file_id, offset), bytes);
    }

    #[must_use]
    pub fn get_leaf(&self, file_id: u64, offset: u64) -> Option<Slice> {
        self.leaf.get(&CacheKey(file_id, offset))
    }

    pub fn insert_leaf(&self, file_id: u64, offset: u64, bytes: Slice) {
        self.leaf.insert(CacheKey(file_id, offset), bytes);
    }

    /// Drops every cached entry; called after a compaction replaces the set
    /// of open files, since cached offsets no longer refer to valid nodes.
    pub fn clear(&self) {
        self.internal.clear();
        self.leaf.clear();
    }
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new(DEFAULT_INTERNAL_CAPACITY, DEFAULT_LEAF_CAPACITY)
    }
}

fn new_cache(
    capacity: usize,
) -> QuickCache<CacheKey, Item, UnitWeighter, rustc_hash::FxBuildHasher> {
    use quick_cache::sync::DefaultLifecycle;

    #[allow(clippy::default_trait_access)]
    QuickCache::with(
        capacity.max(1),
        capacity.max(1) as u64,
        UnitWeighter,
        Default::default(),
        DefaultLifecycle::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn caches_and_evicts_by_capacity() {
        let cache = NodeCache::new(1, 1);
        cache.insert_internal(1, 0, Slice::new(b"a"));
        assert_eq!(Some(Slice::new(b"a")), cache.get_internal(1, 0));

        cache.insert_leaf(1, 0, Slice::new(b"leaf"));
        assert_eq!(Some(Slice::new(b"leaf")), cache.get_leaf(1, 0));

        // internal and leaf caches are independent
        assert_eq!(None, cache.get_leaf(1, 100));
    }

    #[test]
    fn clear_drops_everything() {
        let cache = NodeCache::default();
        cache.insert_internal(1, 0, Slice::new(b"a"));
        cache.clear();
        assert_eq!(None, cache.get_internal(1, 0));
    }
}
