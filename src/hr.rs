// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Spatial overlay on top of [`crate::db::Database`] (§6 "Spatial overlay").
//!
//! Points and axis-aligned boxes are indexed by the order-16 Hilbert index of
//! their midpoint; values are prefixed with the box's coordinates so
//! `traverse` (and the `reduce`-driven pruning it enables) can test bbox
//! intersection without decoding the key.

use crate::config::Config;
use crate::db::Database;
use crate::hilbert::{average, hilbert_xy_to_index};
use crate::{Reduce, Result, Slice};
use std::sync::Arc;

const BBOX_PREFIX_LEN: usize = 4 * 4;

fn encode_bbox(x0: u32, y0: u32, x1: u32, y1: u32) -> [u8; BBOX_PREFIX_LEN] {
    let mut out = [0u8; BBOX_PREFIX_LEN];
    out[0..4].copy_from_slice(&x0.to_le_bytes());
    out[4..8].copy_from_slice(&y0.to_le_bytes());
    out[8..12].copy_from_slice(&x1.to_le_bytes());
    out[12..16].copy_from_slice(&y1.to_le_bytes());
    out
}

fn decode_bbox(value: &[u8]) -> Option<(u32, u32, u32, u32)> {
    if value.len() < BBOX_PREFIX_LEN {
        return None;
    }
    let read = |r: std::ops::Range<usize>| u32::from_le_bytes(value[r].try_into().expect("4 bytes"));
    Some((read(0..4), read(4..8), read(8..12), read(12..16)))
}

fn intersects(ax0: u32, ay0: u32, ax1: u32, ay1: u32, bx0: u32, by0: u32, bx1: u32, by1: u32) -> bool {
    bx0 <= ax1 && bx1 >= ax0 && by0 <= ay1 && by1 >= ay0
}

/// Componentwise bbox union: min of the lower corners, max of the upper
/// corners, across every child's bbox prefix.
struct BboxUnionReduce;

impl Reduce for BboxUnionReduce {
    fn reduce(&self, values: &[&[u8]]) -> Result<Vec<u8>> {
        let mut x0 = u32::MAX;
        let mut y0 = u32::MAX;
        let mut x1 = 0u32;
        let mut y1 = 0u32;

        for value in values {
            if let Some((bx0, by0, bx1, by1)) = decode_bbox(value) {
                x0 = x0.min(bx0);
                y0 = y0.min(by0);
                x1 = x1.max(bx1);
                y1 = y1.max(by1);
            }
        }

        Ok(encode_bbox(x0, y0, x1, y1).to_vec())
    }
}

/// A 2-D spatial store layered over the plain key-value core.
///
/// `Config::reduce` must be left unset: [`HrDb::open`] installs the
/// bbox-union reduction itself and nothing else may occupy that slot.
pub struct HrDb {
    db: Database,
}

impl HrDb {
    /// Opens (or creates) the directory described by `config`, installing
    /// the bbox-union reduce.
    ///
    /// # Errors
    /// Returns `Err` if `config` already carries a `reduce`, or if opening
    /// the underlying database fails.
    pub fn open(config: Config) -> Result<Self> {
        if config.reduce.is_some() {
            return Err(crate::Error::Config(
                "HrDb installs its own reduce function; Config::reduce must be unset",
            ));
        }
        let config = config.reduce(Some(Arc::new(BboxUnionReduce) as Arc<dyn Reduce>));
        Ok(Self { db: Database::open(config)? })
    }

    /// Indexes `value` at the point `(x, y)`.
    pub fn add_point(&mut self, x: u32, y: u32, value: &[u8]) -> Result<()> {
        self.add(x, y, x, y, value)
    }

    /// Indexes `value` under the bounding box `(x0, y0, x1, y1)`.
    pub fn add(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, value: &[u8]) -> Result<()> {
        let mx = average(x0, x1);
        let my = average(y0, y1);
        let h = hilbert_xy_to_index(mx, my);
        let key = h.to_be_bytes();

        let mut padded = encode_bbox(x0, y0, x1, y1).to_vec();
        padded.extend_from_slice(value);

        self.db.add(&key, &padded)
    }

    /// Returns every value whose stored bbox intersects the query box.
    ///
    /// # Errors
    /// Returns `Err` if the underlying traversal fails.
    pub fn search(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> Result<Vec<Slice>> {
        let mut raw = vec![];
        self.db.traverse(
            |value| match decode_bbox(value) {
                Some((bx0, by0, bx1, by1)) => intersects(x0, y0, x1, y1, bx0, by0, bx1, by1),
                None => false,
            },
            &mut raw,
        )?;

        Ok(raw
            .into_iter()
            .map(|v| Slice::new(&v[BBOX_PREFIX_LEN..]))
            .collect())
    }

    /// Flushes the buffer, as [`Database::flush`].
    pub fn flush(&mut self) -> Result<()> {
        self.db.flush()
    }

    /// Collapses every file into one, as [`Database::compact`].
    pub fn compact(&mut self) -> Result<()> {
        self.db.compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn search_matches_brute_force_on_random_boxes() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut hr = HrDb::open(Config::new(dir.path()).max_node_children(4))?;

        let mut seed = 0x1234_5678u64;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        let mut boxes = vec![];
        for i in 0..200u32 {
            let x0 = (next() % 490) as u32;
            let y0 = (next() % 490) as u32;
            let x1 = x0 + 10;
            let y1 = y0 + 10;
            hr.add(x0, y0, x1, y1, &i.to_le_bytes())?;
            boxes.push((x0, y0, x1, y1, i));
        }
        hr.flush()?;

        for _ in 0..20 {
            let qx0 = (next() % 500) as u32;
            let qy0 = (next() % 500) as u32;
            let qx1 = qx0 + 5;
            let qy1 = qy0 + 5;

            let expected: std::collections::HashSet<u32> = boxes
                .iter()
                .filter(|&&(bx0, by0, bx1, by1, _)| intersects(qx0, qy0, qx1, qy1, bx0, by0, bx1, by1))
                .map(|&(_, _, _, _, i)| i)
                .collect();

            let found: std::collections::HashSet<u32> = hr
                .search(qx0, qy0, qx1, qy1)?
                .into_iter()
                .map(|v| u32::from_le_bytes(v.as_ref().try_into().expect("4 bytes")))
                .collect();

            assert_eq!(expected, found, "mismatch at query ({qx0},{qy0})-({qx1},{qy1})");
        }

        Ok(())
    }

    #[test]
    fn open_rejects_preinstalled_reduce() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new(dir.path()).reduce(Some(Arc::new(BboxUnionReduce)));
        assert!(HrDb::open(config).is_err());
    }
}
