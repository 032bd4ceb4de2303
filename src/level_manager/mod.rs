// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! LSM level accounting, file naming, and merge planning (§4.F).
//!
//! State is recovered by scanning the database directory for files matching
//! [`file_name`]'s pattern and reading each one's footer tail, rather than
//! from a sidecar state file -- this avoids a second source of truth for
//! level membership that could drift from what's actually on disk after a
//! crash mid-merge (see `SPEC_FULL.md`).

pub mod plan;

pub use plan::MergePlan;

use crate::node::Footer;
use crate::storage::ByteStorage;
use crate::Result;
use log::warn;
use std::path::{Path, PathBuf};

/// Returns the canonical, lexicographically-sortable filename for `(index, level)`.
///
/// 20 zero-padded decimals for the index, `-`, 8 zero-padded decimals for the
/// level, and a `.pbt` extension (§6).
#[must_use]
pub fn file_name(index: u64, level: u64) -> String {
    format!("{index:020}-{level:08}.pbt")
}

/// Joins [`file_name`] onto `dir`.
#[must_use]
pub fn file_path(dir: &Path, index: u64, level: u64) -> PathBuf {
    dir.join(file_name(index, level))
}

/// Parses a filename produced by [`file_name`] back into `(index, level)`.
#[must_use]
fn parse_file_name(name: &str) -> Option<(u64, u64)> {
    let name = name.strip_suffix(".pbt")?;
    let (index_str, level_str) = name.split_once('-')?;
    if index_str.len() != 20 || level_str.len() != 8 {
        return None;
    }
    let index = index_str.parse().ok()?;
    let level = level_str.parse().ok()?;
    Some((index, level))
}

/// Everything [`crate::db::Database::open`] needs to bring its set of open
/// readers back in sync with what's on disk.
pub struct Recovered {
    pub manager: LevelManager,
    /// `(level, index)` pairs found on disk, in the order a caller should
    /// open them -- grouped by level, ascending index within each level.
    pub files: Vec<(u64, u64)>,
    /// `footer.global_end` of the file with the largest index, or 0 if the
    /// directory held no files.
    pub global_counter: u64,
}

/// Tracks which `(level, index)` pairs currently exist and plans merges.
pub struct LevelManager {
    max_level_count: u64,
    levels: Vec<Vec<u64>>,
    next_index: u64,
}

impl LevelManager {
    /// Scans `dir` for existing PBT files and rebuilds level state from
    /// their names and footers.
    pub fn recover(dir: &Path, max_level_count: u64) -> Result<Recovered> {
        let mut by_level: Vec<Vec<u64>> = vec![];
        let mut max_index = None;
        let mut max_index_level = 0u64;

        if dir.is_dir() {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                let Some((index, level)) = parse_file_name(&name) else {
                    continue;
                };

                if level as usize >= by_level.len() {
                    by_level.resize(level as usize + 1, vec![]);
                }
                by_level[level as usize].push(index);

                if max_index.is_none_or(|m| index > m) {
                    max_index = Some(index);
                    max_index_level = level;
                }
            }
        }

        for level in &mut by_level {
            level.sort_unstable();
        }

        let next_index = max_index.map_or(0, |i| i + 1);

        let global_counter = if let Some(index) = max_index {
            let path = file_path(dir, index, max_index_level);
            match ByteStorage::open(&path, true).and_then(|s| Footer::parse(s.as_slice())) {
                Ok(footer) => footer.global_end,
                Err(e) => {
                    warn!(
                        "highest-index file {} failed footer validation during recovery ({e}); \
                         treating it as absent for global_counter purposes",
                        path.display()
                    );
                    0
                }
            }
        } else {
            0
        };

        let mut files = vec![];
        for (level, indices) in by_level.iter().enumerate() {
            for &index in indices {
                files.push((level as u64, index));
            }
        }

        let manager = Self {
            max_level_count,
            levels: by_level,
            next_index,
        };

        Ok(Recovered {
            manager,
            files,
            global_counter,
        })
    }

    #[must_use]
    pub fn next_level_0_path(&self, dir: &Path) -> PathBuf {
        file_path(dir, self.next_index, 0)
    }

    /// The index the next new file (flush or merge destination) will receive.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Drops `(level, index)` from level bookkeeping without producing a
    /// merge plan, used when recovery finds a file that fails footer
    /// validation and is treated as absent (§7 "partially-written
    /// destination files... are tolerated on reopen").
    pub fn forget(&mut self, level: u64, index: u64) {
        if let Some(l) = self.levels.get_mut(level as usize) {
            l.retain(|&i| i != index);
        }
    }

    /// Commits the file reserved by [`Self::next_level_0_path`] into level 0.
    pub fn advance_level_0(&mut self) {
        self.ensure_level(0);
        self.levels[0].push(self.next_index);
        self.next_index += 1;
    }

    fn ensure_level(&mut self, level: u64) {
        let level = level as usize;
        if level >= self.levels.len() {
            self.levels.resize(level + 1, vec![]);
        }
    }

    fn level(&self, level: u64) -> &[u64] {
        self.levels.get(level as usize).map_or(&[], Vec::as_slice)
    }

    fn would_overflow(&self, level: u64, extra: u64) -> bool {
        self.level(level).len() as u64 + extra >= self.max_level_count
    }

    /// Plans a merge of all of level 0 (and as many levels above it as
    /// necessary) into the lowest level that doesn't overflow, if level 0
    /// currently holds `max_level_count` or more files.
    #[must_use]
    pub fn cascaded_merge(&self) -> Option<MergePlan> {
        if !self.would_overflow(0, 0) {
            return None;
        }

        let mut src = vec![];
        let mut level = 0u64;
        loop {
            for &index in self.level(level) {
                src.push((level, index));
            }
            if self.would_overflow(level + 1, 1) {
                level += 1;
            } else {
                break;
            }
        }

        let dst_level = level + 1;
        let top_level_indices = self.level(level);
        let dst_index = top_level_indices.iter().copied().max().map_or(0, |i| i + 1);

        Some(MergePlan::cascaded_from(src, dst_level, dst_index))
    }

    /// Plans collapsing every open file into one, at the highest occupied
    /// level, if two or more files exist anywhere.
    #[must_use]
    pub fn full_merge(&self) -> Option<MergePlan> {
        let total: usize = self.levels.iter().map(Vec::len).sum();
        if total < 2 {
            return None;
        }

        let dst_level = self.levels.len().saturating_sub(1) as u64;
        let mut dst_index = 0u64;
        let mut src = vec![];

        for (level, indices) in self.levels.iter().enumerate().rev() {
            let level = level as u64;
            for &index in indices {
                src.push((level, index));
            }
            if let Some(&last) = indices.last() {
                dst_index = last;
                if dst_level == level {
                    dst_index += 1;
                }
            }
        }

        Some(MergePlan::full(src, dst_level, dst_index))
    }

    /// Removes the plan's consumed `(level, index)` pairs, records the
    /// produced one, and advances `next_index` past it.
    pub fn apply(&mut self, plan: &MergePlan) {
        self.ensure_level(plan.dst_level);

        for &(level, index) in &plan.src_levels_and_indices {
            if let Some(l) = self.levels.get_mut(level as usize) {
                l.retain(|&i| i != index);
            }
        }

        self.levels[plan.dst_level as usize].push(plan.dst_index);
        self.next_index = self.next_index.max(plan.dst_index + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn file_name_is_fixed_width_and_sortable() {
        assert_eq!("00000000000000000000-00000000.pbt", file_name(0, 0));
        assert_eq!("00000000000000000007-00000003.pbt", file_name(7, 3));
        assert!(file_name(1, 0) < file_name(2, 0));
        assert!(file_name(0, 0) < file_name(0, 1));
    }

    #[test]
    fn parse_round_trips_file_name() {
        assert_eq!(Some((7, 3)), parse_file_name(&file_name(7, 3)));
        assert_eq!(None, parse_file_name("garbage.pbt"));
        assert_eq!(None, parse_file_name("00000000000000000007-00000003.txt"));
    }

    #[test]
    fn recover_empty_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recovered = LevelManager::recover(dir.path(), 10)?;
        assert!(recovered.files.is_empty());
        assert_eq!(0, recovered.global_counter);
        assert_eq!(dir.path().join(file_name(0, 0)), recovered.manager.next_level_0_path(dir.path()));
        Ok(())
    }

    #[test]
    fn advance_level_0_reserves_and_commits() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recovered = LevelManager::recover(dir.path(), 10)?;
        let mut manager = recovered.manager;

        let first_path = manager.next_level_0_path(dir.path());
        assert_eq!(dir.path().join(file_name(0, 0)), first_path);
        manager.advance_level_0();

        let second_path = manager.next_level_0_path(dir.path());
        assert_eq!(dir.path().join(file_name(1, 0)), second_path);

        Ok(())
    }

    #[test]
    fn cascaded_merge_triggers_at_threshold() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recovered = LevelManager::recover(dir.path(), 2)?;
        let mut manager = recovered.manager;

        manager.advance_level_0();
        assert!(manager.cascaded_merge().is_none());

        manager.advance_level_0();
        let plan = manager.cascaded_merge().expect("level 0 has reached max_level_count");
        assert_eq!(vec![(0, 0), (0, 1)], plan.src_levels_and_indices);
        assert_eq!(1, plan.dst_level);
        assert_eq!(2, plan.dst_index);

        Ok(())
    }

    #[test]
    fn cascaded_merge_folds_through_multiple_levels() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recovered = LevelManager::recover(dir.path(), 2)?;
        let mut manager = recovered.manager;

        // seed level 1 with one file already, so folding level 0 into level 1
        // would make level 1 overflow too, cascading into level 2.
        manager.ensure_level(1);
        manager.levels[1].push(10);
        manager.next_index = 11;

        manager.advance_level_0();
        manager.advance_level_0();

        let plan = manager.cascaded_merge().expect("level 0 over threshold");
        assert_eq!(vec![(0, 11), (0, 12), (1, 10)], plan.src_levels_and_indices);
        assert_eq!(2, plan.dst_level);
        assert_eq!(11, plan.dst_index);

        Ok(())
    }

    #[test]
    fn full_merge_requires_at_least_two_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recovered = LevelManager::recover(dir.path(), 10)?;
        let mut manager = recovered.manager;

        assert!(manager.full_merge().is_none());
        manager.advance_level_0();
        assert!(manager.full_merge().is_none());
        manager.advance_level_0();
        assert!(manager.full_merge().is_some());

        Ok(())
    }

    #[test]
    fn apply_removes_sources_and_records_destination() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recovered = LevelManager::recover(dir.path(), 2)?;
        let mut manager = recovered.manager;
        manager.advance_level_0();
        manager.advance_level_0();

        let plan = manager.cascaded_merge().expect("plan");
        manager.apply(&plan);

        assert!(manager.level(0).is_empty());
        assert_eq!(vec![2], manager.level(1).to_vec());
        assert_eq!(3, manager.next_index);

        Ok(())
    }
}
