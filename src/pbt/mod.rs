// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! One immutable, mmap-friendly B+-tree file: construction (§4.D), access
//! (§4.E), and leaf-order iteration (§4.E's "Iterator contract").

pub mod iterator;
pub mod reader;
pub mod writer;

pub use iterator::PbtIterator;
pub use reader::PbtReader;
pub use writer::{PbtWriter, WriterConfig};
