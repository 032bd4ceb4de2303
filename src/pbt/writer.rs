// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Single-pass, bottom-up construction of one immutable PBT file (§4.D).

use crate::node::{ChildRef, InternalBuilder, LeafBuilder};
use crate::pbt::reader::PbtReader;
use crate::reduce::Reduce;
use crate::storage::ByteStorage;
use crate::{Error, Result};
use log::debug;
use std::path::Path;
use std::sync::Arc;

/// Writer-side knobs that affect the on-disk layout of the file being built.
#[derive(Clone)]
pub struct WriterConfig {
    /// Maximum fan-out of any node (§3 "Level").
    pub max_node_children: u16,
    /// Starting size of a newly-created file, grown geometrically thereafter.
    pub initial_pbt_size: u64,
    /// Optional per-subtree aggregation (§3 "Reduced value").
    pub reduce: Option<Arc<dyn Reduce>>,
}

/// One node already written to the file, as tracked while folding a level
/// into its parent level during [`PbtWriter::finish`].
struct NodeInfo {
    offset: u64,
    size: u64,
    entry_start: u64,
    count: u64,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
}

/// Builds one PBT file from an ordered stream of entries.
///
/// `add` must be called with weakly non-decreasing keys; `finish` folds the
/// written leaves into as many internal levels as needed and appends the
/// footer, consuming the writer and handing back a ready [`PbtReader`].
pub struct PbtWriter {
    storage: ByteStorage,
    config: WriterConfig,
    global_start: u64,
    write_offset: u64,
    num_entries: u64,
    leaf: LeafBuilder,
    last_key: Option<Vec<u8>>,
}

impl PbtWriter {
    /// Creates a new file at `path`, truncating any existing file.
    pub fn create(path: &Path, global_start: u64, config: WriterConfig) -> Result<Self> {
        let storage = ByteStorage::create(path, config.initial_pbt_size)?;
        Ok(Self {
            storage,
            config,
            global_start,
            write_offset: 0,
            num_entries: 0,
            leaf: LeafBuilder::new(),
            last_key: None,
        })
    }

    /// Appends one entry.
    ///
    /// # Panics
    /// Panics (a programming error per §7) if `key` is strictly less than
    /// the previously added key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(prev) = &self.last_key {
            assert!(
                prev.as_slice() <= key,
                "PbtWriter::add called with keys out of order"
            );
        }
        self.last_key = Some(key.to_vec());

        self.leaf.push(key, value);
        self.num_entries += 1;

        if self.leaf.len() >= self.config.max_node_children as usize {
            self.flush_leaf()?;
        }

        Ok(())
    }

    /// Drives `add` from a k-way merge of `readers`' leaf-order iterators.
    ///
    /// `readers` must already be in the order the caller wants tie-breaking
    /// to favor -- on equal keys, the earliest reader in the slice wins, so
    /// callers that want "newest duplicate survives" must pass readers
    /// newest-first (this is how [`crate::level_manager`] invokes it, see
    /// §4.F "Merge ordering").
    pub fn merge(&mut self, readers: &[Arc<PbtReader>]) -> Result<()> {
        let mut iters: Vec<_> = readers.iter().map(|r| r.begin()).collect();
        let total: u64 = readers.iter().map(|r| r.count()).sum();

        for _ in 0..total {
            let mut min_index = None;
            for (i, it) in iters.iter().enumerate() {
                if it.is_end() {
                    continue;
                }
                match min_index {
                    None => min_index = Some(i),
                    Some(cur) if it.key() < iters[cur].key() => min_index = Some(i),
                    Some(_) => {}
                }
            }

            let i = min_index.expect("merge: fewer live entries than total reported by readers");
            let key = iters[i].key().to_vec();
            let value = iters[i].value().to_vec();
            self.add(&key, &value)?;
            iters[i].next();
        }

        Ok(())
    }

    fn ensure_capacity(&mut self, needed: u64) -> Result<()> {
        if needed > self.storage.size() {
            let new_size = (self.storage.size() * 2).max(needed);
            self.storage.resize(new_size)?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.write_offset;
        self.ensure_capacity(offset + bytes.len() as u64)?;
        self.storage.as_mut_slice()[offset as usize..offset as usize + bytes.len()]
            .copy_from_slice(bytes);
        self.write_offset += bytes.len() as u64;
        Ok(offset)
    }

    fn flush_leaf(&mut self) -> Result<()> {
        if self.leaf.is_empty() {
            return Ok(());
        }

        let mut buf = vec![];
        self.leaf.serialize_into(&mut buf)?;
        self.write_bytes(&buf)?;
        self.leaf = LeafBuilder::new();

        Ok(())
    }

    /// Folds the written leaves into internal levels, writes the footer,
    /// and truncates the file to its exact final size.
    pub fn finish(mut self) -> Result<PbtReader> {
        self.flush_leaf()?;

        let level_0_end = self.write_offset;

        debug!(
            "finishing PBT with {} entries over {} bytes of leaves",
            self.num_entries, level_0_end
        );

        let (root_offset, root_size, tree_height) = if self.num_entries == 0 {
            (0, 0, 0)
        } else {
            self.build_internal_levels(level_0_end)?
        };

        let footer = crate::node::Footer {
            root_offset,
            root_size,
            level_0_end,
            tree_height,
            global_start: self.global_start,
            global_end: self.global_start + self.num_entries,
        };

        let mut footer_bytes = vec![];
        footer.encode_into(&mut footer_bytes)?;
        self.write_bytes(&footer_bytes)?;

        let final_size = self.write_offset;
        self.storage.resize(final_size)?;
        self.storage.flush()?;

        PbtReader::from_storage(self.storage)
    }

    /// Scans the just-written leaves and repeatedly folds the previous
    /// level's nodes into a new parent level until exactly one node --
    /// the root -- remains. Returns `(root_offset, root_size, tree_height)`.
    fn build_internal_levels(&mut self, level_0_end: u64) -> Result<(u64, u64, u16)> {
        let mut prev: Vec<NodeInfo> = self.scan_leaves(level_0_end)?;
        let mut tree_height: u16 = 1;
        let mut building_from_leaves = true;

        while prev.len() > 1 {
            let mut next = Vec::new();

            for chunk in prev.chunks(self.config.max_node_children as usize) {
                let node_offset = self.write_offset;

                let min_key = chunk[0].min_key.clone();
                let mut builder = InternalBuilder::new(min_key.clone());

                for child in chunk {
                    let reduced_value = self.reduce_child(child, building_from_leaves)?;
                    builder.push(ChildRef {
                        key: child.max_key.clone(),
                        reduced_value,
                        entry_start: child.entry_start,
                        offset: child.offset,
                        size: child.size,
                    });
                }

                let mut buf = vec![];
                builder.serialize_into(&mut buf)?;
                self.write_bytes(&buf)?;

                let max_key = chunk.last().expect("chunk is non-empty").max_key.clone();
                let entry_start = chunk[0].entry_start;
                let count: u64 = chunk.iter().map(|c| c.count).sum();

                next.push(NodeInfo {
                    offset: node_offset,
                    size: buf.len() as u64,
                    entry_start,
                    count,
                    min_key,
                    max_key,
                });
            }

            prev = next;
            building_from_leaves = false;
            tree_height += 1;
        }

        let root = prev.into_iter().next().expect("tree has at least one node");
        Ok((root.offset, root.size, tree_height))
    }

    /// Computes a single child's reduced value from either the leaf values
    /// in its subtree (first internal level) or the already-reduced values
    /// of its own children (every level after).
    fn reduce_child(&self, child: &NodeInfo, building_from_leaves: bool) -> Result<Vec<u8>> {
        let Some(reduce) = &self.config.reduce else {
            return Ok(vec![]);
        };

        let data = self.storage.as_slice();

        let values: Vec<&[u8]> = if building_from_leaves {
            let leaf = crate::node::LeafNode::new(data, child.offset as usize);
            (0..leaf.count()).map(|i| leaf.value(i)).collect()
        } else {
            let internal = crate::node::InternalNode::new(data, child.offset as usize);
            (0..internal.num_children())
                .map(|i| internal.reduced_value(i))
                .collect()
        };

        reduce.reduce(&values)
    }

    /// Walks the leaf nodes written at `[0, level_0_end)`, recording each
    /// one's location, key range, and cumulative entry-count offset.
    fn scan_leaves(&self, level_0_end: u64) -> Result<Vec<NodeInfo>> {
        let data = self.storage.as_slice();
        let mut infos = Vec::new();
        let mut offset = 0u64;
        let mut entry_start = 0u64;

        while offset < level_0_end {
            let leaf = crate::node::LeafNode::new(data, offset as usize);
            let count = leaf.count() as u64;
            if count == 0 {
                return Err(Error::Config("encountered an empty leaf while building levels"));
            }

            let size = leaf.size_of();
            infos.push(NodeInfo {
                offset,
                size,
                entry_start,
                count,
                min_key: leaf.key(0).to_vec(),
                max_key: leaf.key(leaf.count() - 1).to_vec(),
            });

            entry_start += count;
            offset += size;
        }

        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn config() -> WriterConfig {
        WriterConfig {
            max_node_children: 4,
            initial_pbt_size: 64,
            reduce: None,
        }
    }

    #[test]
    fn single_leaf_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = PbtWriter::create(&dir.path().join("0.pbt"), 0, config())?;
        writer.add(b"a", b"1")?;
        writer.add(b"b", b"2")?;
        let reader = writer.finish()?;

        assert_eq!(2, reader.count());
        assert_eq!(Some(crate::Slice::from("1")), reader.get(b"a")?);
        assert_eq!(None, reader.get(b"z")?);

        Ok(())
    }

    #[test]
    fn multi_level_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = PbtWriter::create(&dir.path().join("0.pbt"), 0, config())?;
        for i in 0..50u32 {
            let key = format!("{i:04}");
            writer.add(key.as_bytes(), b"v")?;
        }
        let reader = writer.finish()?;

        assert_eq!(50, reader.count());
        for i in 0..50u32 {
            let key = format!("{i:04}");
            assert_eq!(Some(crate::Slice::from("v")), reader.get(key.as_bytes())?);
        }

        Ok(())
    }

    #[test]
    fn rejects_out_of_order_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            PbtWriter::create(&dir.path().join("0.pbt"), 0, config()).expect("create");
        writer.add(b"b", b"1").expect("add");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            writer.add(b"a", b"2")
        }));
        assert!(result.is_err());
    }

    #[test]
    fn empty_file_has_zero_height() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = PbtWriter::create(&dir.path().join("0.pbt"), 0, config())?;
        let reader = writer.finish()?;

        assert_eq!(0, reader.count());
        assert!(reader.begin().is_end());

        Ok(())
    }
}
