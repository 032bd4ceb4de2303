// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk node layouts that make up a PBT file (§4.C): leaves at the
//! bottom, internal nodes above them, and a fixed-size [`footer::Footer`]
//! tying the whole thing together.

pub mod footer;
pub mod internal;
pub mod leaf;

pub use footer::Footer;
pub use internal::{ChildRef, InternalBuilder, InternalNode};
pub use leaf::{LeafBuilder, LeafNode};

/// A node is either a leaf (level 0) or an internal node (any level above).
///
/// The writer knows which is which while building bottom-up; the reader
/// disambiguates a node it is about to descend into using the tree's
/// recorded height together with the current depth, since nothing in the
/// node bytes themselves is tagged with a node kind.
#[derive(Clone, Copy)]
pub enum Node<'a> {
    Leaf(LeafNode<'a>),
    Internal(InternalNode<'a>),
}

impl<'a> Node<'a> {
    #[must_use]
    pub fn size_of(&self) -> u64 {
        match self {
            Self::Leaf(l) => l.size_of(),
            Self::Internal(i) => i.size_of(),
        }
    }
}
