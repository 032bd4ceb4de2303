// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! File-backed, resizable, randomly addressable byte region (§4.A).
//!
//! Two access modes are exposed: a writer opens a file read-write and grows
//! it geometrically as nodes are appended; a reader opens the finished file
//! read-only and maps it once for the lifetime of the [`crate::pbt::Reader`].

use crate::Result;
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::path::Path;

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

/// A file-backed byte region, mapped into memory for the duration it is open.
pub struct ByteStorage {
    file: File,
    mapping: Mapping,
    read_only: bool,
}

impl ByteStorage {
    /// Opens `path`, mapping it read-only or read-write.
    ///
    /// Fails if the file does not exist, or if `read_only` is requested on a
    /// file whose permissions don't allow it.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;

        let mapping = Self::map(&file, read_only)?;

        Ok(Self {
            file,
            mapping,
            read_only,
        })
    }

    /// Creates a new file at `path` with an initial size, mapped read-write.
    pub fn create(path: &Path, initial_size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        file.set_len(initial_size.max(1))?;

        let mapping = Self::map(&file, false)?;

        Ok(Self {
            file,
            mapping,
            read_only: false,
        })
    }

    #[allow(unsafe_code)]
    fn map(file: &File, read_only: bool) -> Result<Mapping> {
        // SAFETY: `ByteStorage` owns the file handle for the lifetime of the
        // mapping, and mutation only ever happens through `ByteStorage` (the
        // writer never shares its storage with a reader — see §5); there is
        // no other process or thread racing on the same file while mapped.
        if read_only {
            let mmap = unsafe { Mmap::map(file)? };
            Ok(Mapping::ReadOnly(mmap))
        } else {
            let mmap = unsafe { MmapMut::map_mut(file)? };
            Ok(Mapping::ReadWrite(mmap))
        }
    }

    /// Returns the size of the mapped region in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.mapping {
            Mapping::ReadOnly(m) => m.len() as u64,
            Mapping::ReadWrite(m) => m.len() as u64,
        }
    }

    /// Resizes the underlying file and remaps it.
    ///
    /// A no-op if the requested size equals the current size. Fails if the
    /// storage was opened read-only.
    pub fn resize(&mut self, new_size: u64) -> Result<()> {
        if self.read_only {
            return Err(crate::Error::Config("cannot resize a read-only storage"));
        }

        if new_size == self.size() {
            return Ok(());
        }

        self.flush()?;
        self.file.set_len(new_size)?;
        self.mapping = Self::map(&self.file, false)?;

        Ok(())
    }

    /// Returns the full mapped region as a byte slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.mapping {
            Mapping::ReadOnly(m) => m,
            Mapping::ReadWrite(m) => m,
        }
    }

    /// Returns the full mapped region as a mutable byte slice.
    ///
    /// Panics if the storage was opened read-only.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.mapping {
            Mapping::ReadWrite(m) => m,
            Mapping::ReadOnly(_) => panic!("storage is read-only"),
        }
    }

    /// Zeroes the whole mapped region.
    pub fn clear(&mut self) {
        self.as_mut_slice().fill(0);
    }

    /// Best-effort sync of the mapped region to disk.
    ///
    /// Never blocks on an fsync durability guarantee; mirrors §7's "durable
    /// to the extent the OS's mmap flush provides" wording.
    pub fn flush(&self) -> Result<()> {
        match &self.mapping {
            Mapping::ReadOnly(m) => m.flush()?,
            Mapping::ReadWrite(m) => m.flush()?,
        }
        Ok(())
    }

    /// Copies `size` bytes starting at `offset` into `dst`.
    ///
    /// Provided for callers that prefer an explicit bounded read over
    /// indexing the mapped slice directly. Fails on out-of-bounds access.
    pub fn read(&self, offset: u64, size: usize, dst: &mut [u8]) -> Result<()> {
        let offset = offset as usize;
        let region = self.as_slice();

        let src = region
            .get(offset..offset + size)
            .ok_or_else(|| crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read({size}) at {offset} is out of bounds (storage size {})", region.len()),
            )))?;

        dst[..size].copy_from_slice(src);
        Ok(())
    }
}
