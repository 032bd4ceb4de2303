// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An embedded key-value store built on immutable, mmap-friendly "packed
//! B+-tree" (PBT) files, organized as a log-structured merge (LSM) tree.
//!
//! ##### About
//!
//! Entries are buffered in memory and, once the buffer exceeds
//! `max_buffer_size`, flushed as one new immutable PBT file at level 0 of
//! the LSM. Once a level accumulates `max_level_count` files, a cascaded
//! merge folds them into the next level down. A PBT file is a bottom-up,
//! single-pass-constructed B+-tree: point lookup, positional lookup by
//! global index, range iteration, and an optional per-subtree `reduce`
//! aggregation are all served directly against the mapped file, without
//! deserializing it into an in-memory structure first.
//!
//! A thin spatial overlay, [`HrDb`], layers a Hilbert-curve key encoding on
//! top of the plain key-value core for 2-D bounding-box queries.
//!
//! Keys and values are arbitrary byte strings; duplicate keys are permitted
//! and, on lookup, the most recently added occurrence wins.
//!
//! # Example usage
//!
//! ```
//! use pbt_tree::Config;
//! #
//! # let dir = tempfile::tempdir()?;
//!
//! let mut db = Config::new(dir.path()).open()?;
//!
//! db.add(b"apple", b"1")?;
//! db.add(b"banana", b"2")?;
//! db.flush()?;
//!
//! assert_eq!(Some(pbt_tree::Slice::from("2")), db.get(b"banana")?);
//!
//! for (key, value) in db.begin() {
//!     // ...
//!     # let _ = (key, value);
//! }
//!
//! db.compact()?;
//! #
//! # Ok::<(), pbt_tree::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]

mod buffer;
mod cache;
mod coding;
mod config;
mod db;
mod error;
mod hilbert;
mod hr;
mod level_manager;
mod merged_iterator;
mod node;
pub mod pbt;
mod reduce;
mod slice;
mod storage;

pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use hr::HrDb;
pub use merged_iterator::MergedIterator;
pub use reduce::Reduce;
pub use slice::Slice;
