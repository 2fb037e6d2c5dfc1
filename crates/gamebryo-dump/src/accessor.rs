//! Read-only random-access view over the dump file.
//!
//! The accessor exclusively owns the memory mapping. All reads that would
//! cross the file end fail with `None` -- there is no write path and no
//! caching beyond the OS page cache.

use crate::DumpError;
use std::ops::Deref;
use std::path::Path;

/// Abstraction over dump data sources (owned bytes or memory-mapped).
enum FileData {
    Owned(Vec<u8>),
    Mapped(memmap2::Mmap),
}

impl Deref for FileData {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            FileData::Owned(v) => v,
            FileData::Mapped(m) => m,
        }
    }
}

/// A dump file opened for reading.
pub struct DumpAccessor {
    data: FileData,
}

impl DumpAccessor {
    /// Open a dump file using memory-mapping.
    ///
    /// The OS pages data on demand; a page fault against the mapping is the
    /// only blocking operation in the analysis pipeline.
    ///
    /// # Safety
    /// The file must not be modified while the accessor is open.
    pub fn open_mmap(path: impl AsRef<Path>) -> Result<Self, DumpError> {
        let file = std::fs::File::open(path.as_ref())?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self {
            data: FileData::Mapped(mmap),
        })
    }

    /// Open a dump file, reading it entirely into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DumpError> {
        let data = std::fs::read(path.as_ref())?;
        Ok(Self::from_bytes(data))
    }

    /// Wrap an in-memory dump image (used by synthetic tests).
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data: FileData::Owned(data),
        }
    }

    /// Total file size in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Borrow `len` bytes starting at `offset`, or `None` if the range
    /// crosses the file end.
    pub fn read(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(len)?;
        self.data.get(start..end)
    }

    /// Copy bytes at `offset` into `buf`, failing without a partial write
    /// if the range crosses the file end.
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Option<()> {
        let src = self.read(offset, buf.len())?;
        buf.copy_from_slice(src);
        Some(())
    }
}
