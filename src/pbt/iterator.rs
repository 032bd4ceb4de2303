// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Leaf-order iterator over the entries of one PBT file (§4.E).
//!
//! An iterator owns a clone of the file's [`Arc<ByteStorage>`], not a
//! borrow, so it is free to outlive the call that created it without
//! fighting the reader's lifetime -- the mapped region stays alive as long
//! as any clone of the `Arc` does.

use crate::node::LeafNode;
use crate::storage::ByteStorage;
use std::sync::Arc;

/// Walks the leaves of a PBT file in key order, one slot at a time.
///
/// Advancing past the last slot of a leaf moves to the next leaf in byte
/// order, exactly as leaves were written by the PBT writer.
#[derive(Clone)]
pub struct PbtIterator {
    storage: Arc<ByteStorage>,
    leaf_offset: u64,
    slot: usize,
    remaining: u64,
}

impl PbtIterator {
    /// An iterator that starts at the leaf at `leaf_offset`, slot `slot`,
    /// with `remaining` entries left to yield (itself included).
    pub(crate) fn new(storage: Arc<ByteStorage>, leaf_offset: u64, slot: usize, remaining: u64) -> Self {
        Self {
            storage,
            leaf_offset,
            slot,
            remaining,
        }
    }

    /// An iterator positioned at the end; yields nothing.
    pub(crate) fn empty(storage: Arc<ByteStorage>) -> Self {
        Self {
            storage,
            leaf_offset: 0,
            slot: 0,
            remaining: 0,
        }
    }

    fn leaf(&self) -> LeafNode<'_> {
        LeafNode::new(self.storage.as_slice(), self.leaf_offset as usize)
    }

    /// `true` once every entry has been yielded.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.remaining == 0
    }

    /// The key at the current position.
    ///
    /// # Panics
    /// Panics if called on an iterator for which [`Self::is_end`] is `true`.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        assert!(!self.is_end(), "key() called on an ended iterator");
        self.leaf().key(self.slot)
    }

    /// The value at the current position.
    ///
    /// # Panics
    /// Panics if called on an iterator for which [`Self::is_end`] is `true`.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        assert!(!self.is_end(), "value() called on an ended iterator");
        self.leaf().value(self.slot)
    }

    /// Advances to the next key-value pair.
    pub fn next(&mut self) {
        if self.is_end() {
            return;
        }

        self.slot += 1;
        self.remaining -= 1;

        if self.slot >= self.leaf().count() {
            self.slot = 0;
            if self.remaining >= 1 {
                self.leaf_offset += self.leaf().size_of();
            }
        }
    }
}

impl Iterator for PbtIterator {
    type Item = (crate::Slice, crate::Slice);

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        let key = crate::Slice::new(self.key());
        let value = crate::Slice::new(self.value());
        PbtIterator::next(self);
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::LeafBuilder;
    use test_log::test;

    fn storage_with_leaf(
        dir: &tempfile::TempDir,
        name: &str,
        entries: &[(&[u8], &[u8])],
    ) -> Arc<ByteStorage> {
        let path = dir.path().join(name);
        let mut builder = LeafBuilder::new();
        for (k, v) in entries {
            builder.push(k, v);
        }
        let mut buf = vec![];
        builder.serialize_into(&mut buf).expect("serialize");

        let mut storage = ByteStorage::create(&path, buf.len() as u64).expect("create");
        storage.as_mut_slice().copy_from_slice(&buf);
        Arc::new(storage)
    }

    #[test]
    fn walks_single_leaf() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage_with_leaf(&dir, "leaf.bin", &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let mut it = PbtIterator::new(storage, 0, 0, 3);

        assert_eq!(b"a", it.key());
        assert_eq!(b"1", it.value());
        it.next();
        assert_eq!(b"b", it.key());
        it.next();
        assert_eq!(b"c", it.key());
        it.next();
        assert!(it.is_end());
    }

    #[test]
    fn std_iterator_adapter_collects_pairs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage_with_leaf(&dir, "leaf.bin", &[(b"a", b"1"), (b"b", b"2")]);
        let it = PbtIterator::new(storage, 0, 0, 2);
        let pairs: Vec<_> = it.collect();
        assert_eq!(2, pairs.len());
        assert_eq!(b"a", &*pairs[0].0);
        assert_eq!(b"1", &*pairs[0].1);
    }
}
