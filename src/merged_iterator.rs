// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! k-way ordered merge over per-file [`PbtIterator`]s (§4.G).

use crate::pbt::PbtIterator;
use crate::Slice;

/// One of the sub-iterators being merged, together with its current key
/// cached so the minimum can be picked without re-reading every sub-iterator
/// on each step.
struct Lane {
    iter: PbtIterator,
    current_key: Option<Slice>,
}

impl Lane {
    fn new(iter: PbtIterator) -> Self {
        let current_key = (!iter.is_end()).then(|| Slice::new(iter.key()));
        Self { iter, current_key }
    }

    fn advance(&mut self) {
        self.iter.next();
        self.current_key = (!self.iter.is_end()).then(|| Slice::new(self.iter.key()));
    }
}

/// Merges entries from several [`PbtIterator`]s into non-decreasing key
/// order.
///
/// This is a plain k-way merge (§4.G): every entry from every lane is
/// yielded, once, in sorted order. Duplicate keys across lanes are **not**
/// suppressed -- a key present in three open files yields three entries, one
/// per occurrence -- only the *order* of a tie is decided, by lane index, so
/// callers construct lanes newest-file-first (§4.F, §4.H) to put the newest
/// duplicate first. Collapsing duplicates down to "the newest wins" is done
/// elsewhere: at point-lookup time ([`crate::pbt::PbtReader::get`],
/// [`crate::db::Database::get`]) and when two files are merged into one on
/// disk ([`crate::pbt::writer::PbtWriter::merge`]).
pub struct MergedIterator {
    lanes: Vec<Lane>,
}

impl MergedIterator {
    #[must_use]
    pub fn new(iters: Vec<PbtIterator>) -> Self {
        Self {
            lanes: iters.into_iter().map(Lane::new).collect(),
        }
    }

    /// `true` once every lane is exhausted.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.lanes.iter().all(|l| l.current_key.is_none())
    }

    fn min_lane(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, lane) in self.lanes.iter().enumerate() {
            let Some(key) = &lane.current_key else {
                continue;
            };
            best = match best {
                None => Some(i),
                Some(b) => {
                    let b_key = self.lanes[b].current_key.as_ref().expect("live lane has a key");
                    if key.as_ref() < b_key.as_ref() {
                        Some(i)
                    } else {
                        Some(b)
                    }
                }
            };
        }
        best
    }
}

impl Iterator for MergedIterator {
    type Item = (Slice, Slice);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.min_lane()?;
        let key = self.lanes[i].current_key.clone().expect("min_lane returns a live lane");
        let value = Slice::new(self.lanes[i].iter.value());
        self.lanes[i].advance();
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::LeafBuilder;
    use crate::storage::ByteStorage;
    use std::sync::Arc;
    use test_log::test;

    fn leaf_iter(dir: &tempfile::TempDir, name: &str, entries: &[(&[u8], &[u8])]) -> PbtIterator {
        let path = dir.path().join(name);
        let mut builder = LeafBuilder::new();
        for (k, v) in entries {
            builder.push(k, v);
        }
        let mut buf = vec![];
        builder.serialize_into(&mut buf).expect("serialize");

        let mut storage = ByteStorage::create(&path, buf.len() as u64).expect("create");
        storage.as_mut_slice().copy_from_slice(&buf);
        PbtIterator::new(Arc::new(storage), 0, 0, entries.len() as u64)
    }

    #[test]
    fn merges_disjoint_lanes_in_key_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = leaf_iter(&dir, "a.bin", &[(b"a", b"1"), (b"c", b"3")]);
        let b = leaf_iter(&dir, "b.bin", &[(b"b", b"2"), (b"d", b"4")]);

        let merged = MergedIterator::new(vec![a, b]);
        let out: Vec<_> = merged.collect();
        let keys: Vec<_> = out.iter().map(|(k, _)| k.to_vec()).collect();
        assert_eq!(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()], keys);
    }

    #[test]
    fn duplicate_key_across_lanes_is_not_suppressed_but_newest_lane_sorts_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        // lane 0 is the "newest" file by convention: ties put it first, but
        // both entries still come out -- the merge doesn't dedupe.
        let newest = leaf_iter(&dir, "newest.bin", &[(b"k", b"new")]);
        let oldest = leaf_iter(&dir, "oldest.bin", &[(b"k", b"old")]);

        let merged = MergedIterator::new(vec![newest, oldest]);
        let out: Vec<_> = merged.collect();
        assert_eq!(2, out.len());
        assert_eq!(b"new", &*out[0].1);
        assert_eq!(b"old", &*out[1].1);
    }

    #[test]
    fn empty_lane_list_is_immediately_end() {
        let merged = MergedIterator::new(vec![]);
        assert!(merged.is_end());
    }
}
