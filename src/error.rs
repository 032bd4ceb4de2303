// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{DecodeError, EncodeError};

/// Version stamped into a PBT footer.
pub type FormatVersion = (u16, u16);

/// Represents errors that can occur while operating on a database or a single PBT file.
#[derive(Debug)]
pub enum Error {
    /// I/O error.
    Io(std::io::Error),

    /// Serialization failed.
    Encode(EncodeError),

    /// Deserialization failed.
    Decode(DecodeError),

    /// A PBT footer's magic number or format version could not be validated.
    ///
    /// Carries the (major, minor) version found in the footer, or `None` if
    /// the magic number itself did not match.
    InvalidFooter(Option<FormatVersion>),

    /// `open` was called with a configuration that conflicts with the state
    /// of the target directory (`error_if_exists` hit an existing directory,
    /// or `create_if_missing` is `false` and the directory is absent).
    Config(&'static str),

    /// The `reduce` callback failed while building an internal node.
    Reduce(String),

    /// A cascaded or full merge left source files referenced in the level
    /// manifest that could not be opened.
    Unrecoverable,

    /// Explicitly unimplemented reader operation (`seek_prev`).
    NotImplemented(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PbtTreeError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Database result.
pub type Result<T> = std::result::Result<T, Error>;
