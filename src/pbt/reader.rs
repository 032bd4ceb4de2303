// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Point, positional, range, and traversal access over one PBT file (§4.E).

use crate::cache::NodeCache;
use crate::node::{Footer, InternalNode, LeafNode};
use crate::pbt::iterator::PbtIterator;
use crate::storage::ByteStorage;
use crate::{Error, Result, Slice};
use log::trace;
use std::path::Path;
use std::sync::Arc;

/// Finds the leftmost slot in `leaf` with `key(slot) >= key`, or `leaf.count()`
/// if every key is smaller.
///
/// [`LeafNode::find`] returns *a* matching index when `key` is present but
/// makes no promise about which one of a run of equal keys it lands on;
/// every caller here needs the stable leftmost occurrence (§3 "first
/// occurrence... wins"), so an exact hit is walked back over its equal
/// neighbors.
fn leaf_lower_bound(leaf: &LeafNode<'_>, key: &[u8]) -> usize {
    match leaf.find(key) {
        Ok(mut idx) => {
            while idx > 0 && leaf.key(idx - 1) == key {
                idx -= 1;
            }
            idx
        }
        Err(idx) => idx,
    }
}

/// A read-only view over one finished PBT file.
pub struct PbtReader {
    storage: Arc<ByteStorage>,
    footer: Footer,
    cache: Option<Arc<NodeCache>>,
    file_id: u64,
}

impl PbtReader {
    /// Opens `path` read-only and parses its footer.
    pub fn open(path: &Path) -> Result<Self> {
        let storage = ByteStorage::open(path, true)?;
        Self::from_storage(storage)
    }

    /// Wraps an already-open storage (used by [`crate::pbt::writer::PbtWriter::finish`],
    /// which hands off its write-mapped storage directly).
    pub(crate) fn from_storage(storage: ByteStorage) -> Result<Self> {
        let footer = Footer::parse(storage.as_slice())?;
        Ok(Self {
            storage: Arc::new(storage),
            footer,
            cache: None,
            file_id: 0,
        })
    }

    /// Attaches a shared node cache, keyed under `file_id`.
    ///
    /// Callers that open many readers against one [`NodeCache`] (the
    /// database façade) must give each reader a distinct `file_id`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<NodeCache>, file_id: u64) -> Self {
        self.cache = Some(cache);
        self.file_id = file_id;
        self
    }

    #[must_use]
    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Entries stored in this file; `global_end - global_start`.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.footer.count()
    }

    fn internal_at(&self, offset: u64) -> InternalNode<'_> {
        if let Some(cache) = &self.cache {
            if cache.get_internal(self.file_id, offset).is_some() {
                trace!("internal node cache hit at offset {offset}");
            } else {
                trace!("internal node cache miss at offset {offset}");
                let node = InternalNode::new(self.storage.as_slice(), offset as usize);
                let size = node.size_of() as usize;
                let start = offset as usize;
                let bytes = Slice::new(&self.storage.as_slice()[start..start + size]);
                cache.insert_internal(self.file_id, offset, bytes);
            }
        }
        InternalNode::new(self.storage.as_slice(), offset as usize)
    }

    fn leaf_at(&self, offset: u64) -> LeafNode<'_> {
        if let Some(cache) = &self.cache {
            if cache.get_leaf(self.file_id, offset).is_some() {
                trace!("leaf node cache hit at offset {offset}");
            } else {
                trace!("leaf node cache miss at offset {offset}");
                let node = LeafNode::new(self.storage.as_slice(), offset as usize);
                let size = node.size_of() as usize;
                let start = offset as usize;
                let bytes = Slice::new(&self.storage.as_slice()[start..start + size]);
                cache.insert_leaf(self.file_id, offset, bytes);
            }
        }
        LeafNode::new(self.storage.as_slice(), offset as usize)
    }

    /// Number of internal levels to cross before reaching a leaf.
    fn internal_levels(&self) -> u16 {
        self.footer.tree_height.saturating_sub(1)
    }

    /// Exact point lookup (§4.E `get`).
    pub fn get(&self, key: &[u8]) -> Result<Option<Slice>> {
        if self.footer.is_empty() {
            return Ok(None);
        }

        let mut offset = self.footer.root_offset;
        for _ in 0..self.internal_levels() {
            let node = self.internal_at(offset);
            if key < node.left_key() {
                return Ok(None);
            }
            let Some(idx) = node.find_child(key) else {
                return Ok(None);
            };
            offset = node.child_location(idx).0;
        }

        let leaf = self.leaf_at(offset);
        let idx = leaf_lower_bound(&leaf, key);
        if idx < leaf.count() && leaf.key(idx) == key {
            Ok(Some(Slice::new(leaf.value(idx))))
        } else {
            Ok(None)
        }
    }

    /// Positions an iterator at the leftmost entry with `key(entry) >= key`.
    #[must_use]
    pub fn seek_first(&self, key: &[u8]) -> PbtIterator {
        if self.footer.is_empty() {
            return PbtIterator::empty(self.storage.clone());
        }

        let mut offset = self.footer.root_offset;
        let mut entry_start = 0u64;
        for _ in 0..self.internal_levels() {
            let node = self.internal_at(offset);
            let Some(idx) = node.find_child(key) else {
                return PbtIterator::empty(self.storage.clone());
            };
            entry_start = node.child_entry_start(idx);
            offset = node.child_location(idx).0;
        }

        let leaf = self.leaf_at(offset);
        let slot = leaf_lower_bound(&leaf, key);
        debug_assert!(
            slot < leaf.count(),
            "seek_first's descent landed on a leaf with no entry >= key"
        );

        let global_index = entry_start + slot as u64;
        let remaining = self.footer.count() - global_index;
        PbtIterator::new(self.storage.clone(), offset, slot, remaining)
    }

    /// Positions an iterator at the rightmost entry equal to `key`, or
    /// wherever [`Self::seek_first`] landed if `key` isn't present.
    #[must_use]
    pub fn seek_last(&self, key: &[u8]) -> PbtIterator {
        let mut it = self.seek_first(key);
        if it.is_end() || it.key() != key {
            return it;
        }

        loop {
            let mut ahead = it.clone();
            ahead.next();
            if ahead.is_end() || ahead.key() != key {
                return it;
            }
            it = ahead;
        }
    }

    /// Positions an iterator at the leftmost entry strictly greater than `key`.
    #[must_use]
    pub fn seek_next(&self, key: &[u8]) -> PbtIterator {
        let mut it = self.seek_first(key);
        while !it.is_end() && it.key() == key {
            it.next();
        }
        it
    }

    /// Not implemented by this reader (§7's error table names it explicitly).
    pub fn seek_prev(&self, _key: &[u8]) -> Result<PbtIterator> {
        Err(Error::NotImplemented("seek_prev"))
    }

    /// Positions an iterator at global entry `index`, or [`Self::end`] if
    /// `index` is out of range.
    #[must_use]
    pub fn seek(&self, index: u64) -> PbtIterator {
        if index >= self.footer.count() {
            return PbtIterator::empty(self.storage.clone());
        }

        let mut offset = self.footer.root_offset;
        let mut entry_start = 0u64;
        for _ in 0..self.internal_levels() {
            let node = self.internal_at(offset);
            let idx = node
                .find_child_by_entry(index)
                .expect("index already checked to be within this file's range");
            entry_start = node.child_entry_start(idx);
            offset = node.child_location(idx).0;
        }

        let slot = (index - entry_start) as usize;
        let remaining = self.footer.count() - index;
        PbtIterator::new(self.storage.clone(), offset, slot, remaining)
    }

    /// Positional lookup (§4.E `at`).
    pub fn at(&self, index: u64) -> Result<Option<(Slice, Slice)>> {
        let it = self.seek(index);
        if it.is_end() {
            return Ok(None);
        }
        Ok(Some((Slice::new(it.key()), Slice::new(it.value()))))
    }

    /// Leaf-order iteration from the first entry.
    #[must_use]
    pub fn begin(&self) -> PbtIterator {
        if self.footer.is_empty() {
            return PbtIterator::empty(self.storage.clone());
        }
        PbtIterator::new(self.storage.clone(), 0, 0, self.footer.count())
    }

    /// An iterator positioned past the last entry.
    #[must_use]
    pub fn end(&self) -> PbtIterator {
        PbtIterator::empty(self.storage.clone())
    }

    /// Pre-order walk with pruning (§4.E `traverse`): at an internal node,
    /// descends into child `i` only if `predicate(reduced_value(i))` holds;
    /// at a leaf, appends every value for which `predicate(value)` holds.
    pub fn traverse<P>(&self, predicate: &P, out: &mut Vec<Slice>)
    where
        P: Fn(&[u8]) -> bool,
    {
        if self.footer.is_empty() {
            return;
        }
        self.traverse_node(self.footer.root_offset, self.footer.tree_height, predicate, out);
    }

    fn traverse_node<P>(&self, offset: u64, height: u16, predicate: &P, out: &mut Vec<Slice>)
    where
        P: Fn(&[u8]) -> bool,
    {
        if height <= 1 {
            let leaf = self.leaf_at(offset);
            for i in 0..leaf.count() {
                if predicate(leaf.value(i)) {
                    out.push(Slice::new(leaf.value(i)));
                }
            }
            return;
        }

        let node = self.internal_at(offset);
        for i in 0..node.num_children() {
            if predicate(node.reduced_value(i)) {
                let (child_offset, _) = node.child_location(i);
                self.traverse_node(child_offset, height - 1, predicate, out);
            }
        }
    }
}
