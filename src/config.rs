// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Database configuration (§6 "Configuration").

use crate::cache::{DEFAULT_INTERNAL_CAPACITY, DEFAULT_LEAF_CAPACITY};
use crate::reduce::Reduce;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default byte threshold triggering a flush (4 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 1 << 22;
/// Default number of files per level before a cascaded merge triggers.
pub const DEFAULT_MAX_LEVEL_COUNT: u64 = 10;
/// Default PBT fan-out.
pub const DEFAULT_MAX_NODE_CHILDREN: u16 = 16;
/// Default starting size for a newly-created PBT file (8 MiB).
pub const DEFAULT_INITIAL_PBT_SIZE: u64 = 1 << 23;

/// Database configuration builder.
///
/// Consumed by [`Config::open`], which is the crate's single entry point
/// for turning a directory on disk into a [`crate::db::Database`].
pub struct Config {
    pub(crate) path: PathBuf,
    pub(crate) create_if_missing: bool,
    pub(crate) error_if_exists: bool,
    pub(crate) delete_if_exists: bool,
    pub(crate) max_buffer_size: u64,
    pub(crate) max_level_count: u64,
    pub(crate) max_node_children: u16,
    pub(crate) initial_pbt_size: u64,
    pub(crate) reduce: Option<Arc<dyn Reduce>>,
    pub(crate) internal_cache_capacity: usize,
    pub(crate) leaf_cache_capacity: usize,
}

impl Config {
    /// Initializes a new config pointed at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            create_if_missing: true,
            error_if_exists: false,
            delete_if_exists: false,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_level_count: DEFAULT_MAX_LEVEL_COUNT,
            max_node_children: DEFAULT_MAX_NODE_CHILDREN,
            initial_pbt_size: DEFAULT_INITIAL_PBT_SIZE,
            reduce: None,
            internal_cache_capacity: DEFAULT_INTERNAL_CAPACITY,
            leaf_cache_capacity: DEFAULT_LEAF_CAPACITY,
        }
    }

    /// Creates the database directory if it is missing. Defaults to `true`;
    /// `open` fails if this is `false` and the directory doesn't exist.
    #[must_use]
    pub fn create_if_missing(mut self, b: bool) -> Self {
        self.create_if_missing = b;
        self
    }

    /// Fails `open` if the directory already exists. Defaults to `false`.
    #[must_use]
    pub fn error_if_exists(mut self, b: bool) -> Self {
        self.error_if_exists = b;
        self
    }

    /// Removes the directory if present, then creates it fresh. Defaults to `false`.
    #[must_use]
    pub fn delete_if_exists(mut self, b: bool) -> Self {
        self.delete_if_exists = b;
        self
    }

    /// Byte threshold of buffered keys+values that triggers a flush.
    ///
    /// Defaults to 4 MiB.
    #[must_use]
    pub fn max_buffer_size(mut self, bytes: u64) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    /// Files per level that triggers a cascaded merge. Defaults to 10.
    #[must_use]
    pub fn max_level_count(mut self, n: u64) -> Self {
        self.max_level_count = n;
        self
    }

    /// Maximum fan-out of any PBT node.
    ///
    /// Defaults to 16. Bounded by the node layout's `u16` child-count field
    /// (§4.C), so this is narrower than spec.md's abstract `u64` knob -- see
    /// `DESIGN.md`.
    #[must_use]
    pub fn max_node_children(mut self, n: u16) -> Self {
        self.max_node_children = n;
        self
    }

    /// Starting size in bytes for a newly-created PBT file. Defaults to 8 MiB.
    #[must_use]
    pub fn initial_pbt_size(mut self, bytes: u64) -> Self {
        self.initial_pbt_size = bytes;
        self
    }

    /// Installs the per-subtree aggregation described in §3 "Reduced value".
    #[must_use]
    pub fn reduce(mut self, reduce: Option<Arc<dyn Reduce>>) -> Self {
        self.reduce = reduce;
        self
    }

    /// LRU capacity, in node byte-ranges, for cached internal nodes. Defaults to 64.
    #[must_use]
    pub fn internal_cache_capacity(mut self, capacity: usize) -> Self {
        self.internal_cache_capacity = capacity;
        self
    }

    /// LRU capacity, in node byte-ranges, for cached leaf nodes. Defaults to 8.
    #[must_use]
    pub fn leaf_cache_capacity(mut self, capacity: usize) -> Self {
        self.leaf_cache_capacity = capacity;
        self
    }

    /// Opens (or creates) the database directory described by this config.
    pub fn open(self) -> Result<crate::db::Database> {
        crate::db::Database::open(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn defaults_match_spec() {
        let config = Config::new("/tmp/does-not-matter");
        assert!(config.create_if_missing);
        assert!(!config.error_if_exists);
        assert!(!config.delete_if_exists);
        assert_eq!(DEFAULT_MAX_BUFFER_SIZE, config.max_buffer_size);
        assert_eq!(DEFAULT_MAX_LEVEL_COUNT, config.max_level_count);
        assert_eq!(DEFAULT_MAX_NODE_CHILDREN, config.max_node_children);
        assert_eq!(DEFAULT_INITIAL_PBT_SIZE, config.initial_pbt_size);
        assert!(config.reduce.is_none());
    }

    #[test]
    fn builder_chains_overrides() {
        let config = Config::new("/tmp/does-not-matter")
            .max_buffer_size(1024)
            .max_level_count(4)
            .max_node_children(8)
            .create_if_missing(false);

        assert_eq!(1024, config.max_buffer_size);
        assert_eq!(4, config.max_level_count);
        assert_eq!(8, config.max_node_children);
        assert!(!config.create_if_missing);
    }
}
