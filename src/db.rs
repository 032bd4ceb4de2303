// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The public key-value database façade (§4.H): insertion buffer, flush
//! policy, cascaded merges, compaction.

use crate::buffer::Buffer;
use crate::cache::NodeCache;
use crate::config::Config;
use crate::level_manager::{self, LevelManager, MergePlan};
use crate::merged_iterator::MergedIterator;
use crate::pbt::{PbtReader, PbtWriter, WriterConfig};
use crate::reduce::Reduce;
use crate::{Error, Result, Slice};
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// One currently-open PBT file, tracked in the order it was created.
///
/// The vector this lives in is kept sorted by creation order throughout the
/// database's lifetime: recovery seeds it sorted by ascending file index
/// (which is assigned in strict creation order and never reused), and every
/// later flush or merge appends its new file at the end. That single
/// invariant is what lets [`Database::get`] read the vector in reverse for
/// "newest file wins" (§3, §4.H) and [`Database::at`] read it forwards for
/// positional lookup (§4.H), without maintaining two separate orderings.
struct ReaderEntry {
    level: u64,
    index: u64,
    reader: Arc<PbtReader>,
}

/// An embedded key-value store backed by an LSM tree of immutable PBT files.
///
/// Constructed via [`Config::open`]. Dropping a `Database` performs a final
/// [`Database::flush`] (§6 "close()... implicit on drop").
pub struct Database {
    dir: PathBuf,
    max_buffer_size: u64,
    max_node_children: u16,
    initial_pbt_size: u64,
    reduce: Option<Arc<dyn Reduce>>,
    buffer: Buffer,
    level_manager: LevelManager,
    readers: Vec<ReaderEntry>,
    global_counter: u64,
    cache: Arc<NodeCache>,
}

impl Database {
    /// Opens (or creates) the database directory described by `config`.
    ///
    /// Recovers existing level state by scanning the directory (§4.F); any
    /// file that fails footer validation is treated as an orphan from a
    /// torn write, removed from disk, and dropped from level bookkeeping
    /// (§7), rather than failing the whole open.
    pub fn open(config: Config) -> Result<Self> {
        let dir = config.path.clone();

        if config.delete_if_exists && dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }

        if dir.exists() {
            if config.error_if_exists {
                return Err(Error::Config("error_if_exists: directory already exists"));
            }
        } else {
            if !config.create_if_missing {
                return Err(Error::Config(
                    "create_if_missing is false and the directory does not exist",
                ));
            }
            std::fs::create_dir_all(&dir)?;
        }

        debug!("opening database at {dir:?}");

        let mut recovered = LevelManager::recover(&dir, config.max_level_count)?;
        let cache = Arc::new(NodeCache::new(
            config.internal_cache_capacity,
            config.leaf_cache_capacity,
        ));

        let mut files = recovered.files.clone();
        files.sort_by_key(|&(_, index)| index);

        let mut readers = Vec::with_capacity(files.len());
        for (level, index) in files {
            let path = level_manager::file_path(&dir, index, level);
            match PbtReader::open(&path) {
                Ok(reader) => readers.push(ReaderEntry {
                    level,
                    index,
                    reader: Arc::new(reader.with_cache(cache.clone(), index)),
                }),
                Err(e) => {
                    warn!(
                        "{path:?} failed footer validation during recovery ({e}); \
                         treating it as an orphaned torn write and removing it"
                    );
                    recovered.manager.forget(level, index);
                    if let Err(remove_err) = std::fs::remove_file(&path) {
                        warn!("failed to remove orphaned file {path:?}: {remove_err}");
                    }
                }
            }
        }

        Ok(Self {
            dir,
            max_buffer_size: config.max_buffer_size,
            max_node_children: config.max_node_children,
            initial_pbt_size: config.initial_pbt_size,
            reduce: config.reduce,
            buffer: Buffer::new(),
            level_manager: recovered.manager,
            readers,
            global_counter: recovered.global_counter,
            cache,
        })
    }

    fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_node_children: self.max_node_children,
            initial_pbt_size: self.initial_pbt_size,
            reduce: self.reduce.clone(),
        }
    }

    fn find_reader(&self, level: u64, index: u64) -> Option<&Arc<PbtReader>> {
        self.readers
            .iter()
            .find(|e| e.level == level && e.index == index)
            .map(|e| &e.reader)
    }

    /// Inserts `(key, value)` into the in-memory buffer, running [`Self::flush`]
    /// if the buffer now exceeds `max_buffer_size` (§4.H).
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.buffer.push(key, value);
        if self.buffer.byte_size() > self.max_buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the buffer to a new level-0 file, without considering a merge.
    fn flush_buffer_only(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let path = self.level_manager.next_level_0_path(&self.dir);
        let index = self.level_manager.next_index();
        let entries = self.buffer.drain_sorted();
        let count = entries.len() as u64;

        debug!("flushing {count} entries to {path:?}");

        let mut writer = PbtWriter::create(&path, self.global_counter, self.writer_config())?;
        for (key, value) in &entries {
            writer.add(key, value)?;
        }
        let reader = writer.finish()?.with_cache(self.cache.clone(), index);

        self.readers.push(ReaderEntry {
            level: 0,
            index,
            reader: Arc::new(reader),
        });
        self.level_manager.advance_level_0();
        self.global_counter += count;

        Ok(())
    }

    /// Flushes the buffer (if non-empty) to a new level-0 file, then runs a
    /// cascaded merge if level 0 has reached `max_level_count` (§4.H).
    pub fn flush(&mut self) -> Result<()> {
        self.flush_buffer_only()?;
        if let Some(plan) = self.level_manager.cascaded_merge() {
            self.execute_merge(&plan)?;
        }
        Ok(())
    }

    /// Like [`Self::flush`], but collapses every open file into one
    /// regardless of level counts (§4.H).
    pub fn compact(&mut self) -> Result<()> {
        self.flush_buffer_only()?;
        if let Some(plan) = self.level_manager.full_merge() {
            self.execute_merge(&plan)?;
        }
        Ok(())
    }

    fn execute_merge(&mut self, plan: &MergePlan) -> Result<()> {
        debug!(
            "merging {:?} into level {} index {}",
            plan.src_levels_and_indices, plan.dst_level, plan.dst_index
        );

        let newest_first = plan.newest_first();
        let source_readers: Vec<Arc<PbtReader>> = newest_first
            .iter()
            .map(|&(level, index)| self.find_reader(level, index).cloned().ok_or(Error::Unrecoverable))
            .collect::<Result<_>>()?;

        let global_start = source_readers
            .iter()
            .map(|r| r.footer().global_start)
            .min()
            .unwrap_or(0);

        let dst_path = level_manager::file_path(&self.dir, plan.dst_index, plan.dst_level);
        let mut writer = PbtWriter::create(&dst_path, global_start, self.writer_config())?;
        writer.merge(&source_readers)?;
        let reader = writer.finish()?.with_cache(self.cache.clone(), plan.dst_index);

        // drop the local Arc clones before removing the source files -- the
        // writer and database map are the only other holders of storage
        // references, and the retain below drops the map's clones next.
        drop(source_readers);

        self.readers
            .retain(|e| !plan.src_levels_and_indices.contains(&(e.level, e.index)));
        self.readers.push(ReaderEntry {
            level: plan.dst_level,
            index: plan.dst_index,
            reader: Arc::new(reader),
        });

        self.level_manager.apply(plan);
        self.cache.clear();

        for &(level, index) in &plan.src_levels_and_indices {
            let path = level_manager::file_path(&self.dir, index, level);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("failed to remove merged-away source file {path:?}: {e}");
            }
        }

        Ok(())
    }

    /// Exact point lookup (§4.H). The in-memory buffer is **not** consulted
    /// (§9 "Open question -- buffer visibility"): only flushed entries are
    /// observable.
    pub fn get(&self, key: &[u8]) -> Result<Option<Slice>> {
        for entry in self.readers.iter().rev() {
            if let Some(value) = entry.reader.get(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Positional lookup by global index (§4.H). Subtracts each reader's
    /// `count()` from `index`, in creation order, until `index` falls
    /// within one reader's range.
    ///
    /// This matches overall sorted-key order exactly once there is at most
    /// one open file (i.e. after [`Self::compact`]); with several open
    /// files whose key ranges overlap, the position is relative to each
    /// file's own sort order rather than a fully merged one -- see
    /// `DESIGN.md`.
    pub fn at(&self, index: u64) -> Result<Option<(Slice, Slice)>> {
        let mut remaining = index;
        for entry in &self.readers {
            let count = entry.reader.count();
            if remaining < count {
                return entry.reader.at(remaining);
            }
            remaining -= count;
        }
        Ok(None)
    }

    /// Leaf-order iteration over every open file, merged into non-decreasing
    /// key order (§4.H, §4.G).
    #[must_use]
    pub fn begin(&self) -> MergedIterator {
        MergedIterator::new(self.readers.iter().rev().map(|e| e.reader.begin()).collect())
    }

    /// A merged iterator positioned at the leftmost entry with key `>= key`.
    #[must_use]
    pub fn seek(&self, key: &[u8]) -> MergedIterator {
        MergedIterator::new(self.readers.iter().rev().map(|e| e.reader.seek_first(key)).collect())
    }

    /// A merged iterator positioned at global index `index`, found via
    /// [`Self::at`] and re-seeked by key across every open file so the
    /// resulting iteration is correctly merged regardless of which file
    /// holds that position.
    pub fn seek_index(&self, index: u64) -> Result<MergedIterator> {
        match self.at(index)? {
            Some((key, _)) => Ok(self.seek(&key)),
            None => Ok(MergedIterator::new(vec![])),
        }
    }

    /// Pre-order traversal with `reduce`-driven pruning, across every open
    /// file (§4.H, §4.E).
    pub fn traverse<P>(&self, predicate: P, out: &mut Vec<Slice>) -> Result<()>
    where
        P: Fn(&[u8]) -> bool,
    {
        for entry in &self.readers {
            entry.reader.traverse(&predicate, out);
        }
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("final flush on drop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn open(dir: &tempfile::TempDir) -> Result<Database> {
        Config::new(dir.path()).open()
    }

    #[test]
    fn s1_small_kv() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut db = open(&dir)?;

        db.add(b"apple", b"1")?;
        db.add(b"banana", b"2")?;
        db.add(b"cherry", b"3")?;
        db.flush()?;

        assert_eq!(Some(Slice::from("2")), db.get(b"banana")?);
        assert_eq!(Some((Slice::from("apple"), Slice::from("1"))), db.at(0)?);
        assert_eq!(None, db.get(b"date")?);

        let all: Vec<_> = db.begin().collect();
        assert_eq!(3, all.len());
        assert_eq!(Slice::from("apple"), all[0].0);
        assert_eq!(Slice::from("banana"), all[1].0);
        assert_eq!(Slice::from("cherry"), all[2].0);

        Ok(())
    }

    #[test]
    fn s2_duplicates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut db = open(&dir)?;

        db.add(b"k", b"a")?;
        db.add(b"k", b"b")?;
        db.add(b"k", b"c")?;
        db.flush()?;

        assert_eq!(Some(Slice::from("a")), db.get(b"k")?);

        let all: Vec<_> = db.begin().collect();
        assert_eq!(3, all.len());
        assert_eq!(Slice::from("a"), all[0].1);
        assert_eq!(Slice::from("b"), all[1].1);
        assert_eq!(Slice::from("c"), all[2].1);

        Ok(())
    }

    #[test]
    fn s3_cascaded_merge_leaves_one_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut db = Config::new(dir.path())
            .max_buffer_size(16)
            .max_node_children(4)
            .max_level_count(2)
            .open()?;

        for i in 0..50u32 {
            let key = format!("{i:05}");
            db.add(key.as_bytes(), b"12345678")?;
        }
        db.flush()?;

        assert_eq!(Some((Slice::from("00000"), Slice::from("12345678"))), db.at(0)?);
        let all: Vec<_> = db.begin().collect();
        assert_eq!(50, all.len());
        for (i, (k, v)) in all.iter().enumerate() {
            assert_eq!(format!("{i:05}").as_bytes(), &**k);
            assert_eq!(b"12345678", &**v);
        }

        Ok(())
    }

    #[test]
    fn s4_reopen_recovers_state() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut db = open(&dir)?;
            for i in 0..100u32 {
                db.add(format!("{i:04}").as_bytes(), format!("v{i}").as_bytes())?;
            }
            db.flush()?;
        }

        let db = open(&dir)?;
        let all: Vec<_> = db.begin().collect();
        assert_eq!(100, all.len());
        assert_eq!(Some(Slice::from("v0")), db.get(b"0000")?);
        assert_eq!(Some(Slice::from("v99")), db.get(b"0099")?);

        Ok(())
    }

    #[test]
    fn buffer_is_not_visible_before_flush() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut db = open(&dir)?;
        db.add(b"k", b"v")?;
        assert_eq!(None, db.get(b"k")?);
        db.flush()?;
        assert_eq!(Some(Slice::from("v")), db.get(b"k")?);
        Ok(())
    }

    #[test]
    fn compact_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut db = Config::new(dir.path()).max_node_children(4).open()?;

        for batch in 0..5 {
            for i in 0..10u32 {
                db.add(format!("{batch}-{i:03}").as_bytes(), b"v")?;
            }
            db.flush()?;
        }

        db.compact()?;
        let after_first: Vec<_> = db.begin().collect();

        db.compact()?;
        let after_second: Vec<_> = db.begin().collect();

        assert_eq!(after_first.len(), after_second.len());
        for (a, b) in after_first.iter().zip(after_second.iter()) {
            assert_eq!(a.0, b.0);
            assert_eq!(a.1, b.1);
        }

        Ok(())
    }

    #[test]
    fn newest_value_wins_across_separate_flushes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut db = open(&dir)?;

        db.add(b"k", b"old")?;
        db.flush()?;
        db.add(b"k", b"new")?;
        db.flush()?;

        assert_eq!(Some(Slice::from("new")), db.get(b"k")?);
        Ok(())
    }

    #[test]
    fn newest_value_wins_across_a_cascade_that_folds_a_higher_level_file() -> Result<()> {
        // Forces two cascaded merges: the first folds level 0 into a level-1
        // file; the second folds two newer level-0 files *and* that older
        // level-1 file together, so the merge source list mixes levels and
        // the level-1 file's index is lower than the level-0 files' even
        // though it's the oldest entry. Only a creation-order (descending
        // index) tie-break gets "newest wins" right here.
        let dir = tempfile::tempdir()?;
        let mut db = Config::new(dir.path()).max_level_count(2).open()?;

        db.add(b"k", b"v1")?;
        db.flush()?;
        db.add(b"k", b"v2")?;
        db.flush()?; // level 0 now has 2 files -> cascades into one level-1 file

        db.add(b"k", b"v3")?;
        db.flush()?;
        db.add(b"k", b"v4")?;
        db.flush()?; // level 0 has 2 files again -> cascades, pulling in the level-1 file too

        assert_eq!(Some(Slice::from("v4")), db.get(b"k")?);

        db.compact()?;
        assert_eq!(Some(Slice::from("v4")), db.get(b"k")?);

        // merging never drops a duplicate, it only orders them -- all four
        // inserts of "k" are still present in the one surviving file, newest
        // first, since that's what makes `get`'s leftmost-duplicate-wins
        // lookup return "v4" above.
        let all: Vec<_> = db.begin().collect();
        assert_eq!(4, all.len());
        let values: Vec<_> = all.iter().map(|(_, v)| v.to_vec()).collect();
        assert_eq!(
            vec![b"v4".to_vec(), b"v3".to_vec(), b"v2".to_vec(), b"v1".to_vec()],
            values
        );

        Ok(())
    }

    #[test]
    fn reduce_max_prunes_traverse_to_matching_leaf() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let reduce = |values: &[&[u8]]| -> Result<Vec<u8>> {
            Ok(values.iter().max().map(|v| v.to_vec()).unwrap_or_default())
        };
        let mut db = Config::new(dir.path())
            .max_node_children(4)
            .reduce(Some(Arc::new(reduce)))
            .open()?;

        for i in 0..999u32 {
            db.add(format!("{i:03}").as_bytes(), format!("{i:03}").as_bytes())?;
        }
        db.flush()?;

        let mut out = vec![];
        db.traverse(|v| v == b"998", &mut out)?;
        assert_eq!(1, out.len());
        assert_eq!(b"998", &*out[0]);

        Ok(())
    }

    #[test]
    fn error_if_exists_rejects_existing_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let _db = open(&dir)?;

        let result = Config::new(dir.path()).error_if_exists(true).open();
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn create_if_missing_false_fails_on_absent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("does-not-exist");
        let result = Config::new(&missing).create_if_missing(false).open();
        assert!(result.is_err());
    }

    #[test]
    fn delete_if_exists_starts_fresh() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut db = open(&dir)?;
            db.add(b"k", b"v")?;
            db.flush()?;
        }

        let db = Config::new(dir.path()).delete_if_exists(true).open()?;
        assert_eq!(None, db.get(b"k")?);
        Ok(())
    }
}
