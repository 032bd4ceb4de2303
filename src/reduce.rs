// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The optional per-internal-node aggregation callback (§4.D, §9).
//!
//! `reduce` is given borrowed views of the values underneath one node — not
//! owned copies — since the writer runs it once per child while the pooled
//! key/value bytes are still sitting in its in-progress buffer; cloning them
//! first would double the writer's peak memory for no benefit.

use crate::Result;

/// Aggregates the values of a node's children into the single value stored
/// alongside that child's separator key.
///
/// Implemented for any closure matching the signature so callers rarely need
/// to write out the trait themselves; see [`crate::Config::reduce`].
pub trait Reduce: Send + Sync {
    /// Combines `values`, which are the `reduce` output for each child of the
    /// node being built (or leaf values, one level up from the leaves).
    /// Returns an error to abort the write in progress.
    fn reduce(&self, values: &[&[u8]]) -> Result<Vec<u8>>;
}

impl<F> Reduce for F
where
    F: Fn(&[&[u8]]) -> Result<Vec<u8>> + Send + Sync,
{
    fn reduce(&self, values: &[&[u8]]) -> Result<Vec<u8>> {
        self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn closure_impls_reduce() -> Result<()> {
        let sum_lengths = |values: &[&[u8]]| -> Result<Vec<u8>> {
            let total: usize = values.iter().map(|v| v.len()).sum();
            Ok((total as u64).to_le_bytes().to_vec())
        };

        let out = sum_lengths.reduce(&[b"ab", b"cde"])?;
        assert_eq!(5_u64.to_le_bytes().to_vec(), out);

        Ok(())
    }
}
