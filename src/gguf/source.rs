//! Positioned byte access for container payloads
//!
//! [`ByteSource`] abstracts where the container bytes live: an in-memory
//! slice for tests and small files, or a memory mapping for large models
//! that must never be copied to heap wholesale. Reads are positioned, so
//! a parsed file and its source can be shared across threads without a
//! seek cursor to contend on.

use crate::error::{CuantizarError, Result};
use std::fs::File;
use std::path::Path;

/// A read-only byte region addressable by absolute offset.
///
/// `read_exact_at` never short-reads: either `buf` is filled or an error
/// names the out-of-range request. Implementations are `Send + Sync`, so
/// tensor payloads can be pulled concurrently after a single parse.
pub trait ByteSource: Send + Sync {
    /// Total size in bytes.
    fn len(&self) -> u64;

    /// True when the source holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` from the bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// `FormatError` when the requested range runs past the end.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

fn slice_read_at(data: &[u8], offset: u64, buf: &mut [u8]) -> Result<()> {
    let len = buf.len() as u64;
    let end = offset.checked_add(len).ok_or_else(|| {
        CuantizarError::overflow(format!("read of {len} bytes at offset {offset}"))
    })?;
    if end > data.len() as u64 {
        return Err(CuantizarError::format_error(format!(
            "read of {len} bytes at offset {offset} runs past the end of a {}-byte source",
            data.len()
        )));
    }
    let start = offset as usize;
    buf.copy_from_slice(&data[start..start + buf.len()]);
    Ok(())
}

impl ByteSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        slice_read_at(self, offset, buf)
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        slice_read_at(self, offset, buf)
    }
}

/// Memory-mapped container file.
///
/// The mapping is opened read-only; pages fault in on demand, so parsing
/// a multi-gigabyte model touches only the header until tensor payloads
/// are requested.
///
/// If another process truncates the file while mapped, touching the
/// vanished region raises SIGBUS on Unix. No signal handler is installed
/// here; keep a single writer.
#[derive(Debug)]
pub struct MmapSource {
    mmap: memmap2::Mmap,
    path: String,
}

#[allow(unsafe_code)]
impl MmapSource {
    /// Map a file for read access.
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be opened or mapped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let file = File::open(path.as_ref())?;
        // SAFETY: the file is opened read-only and we document the
        // single-writer assumption; external truncation is the caller's
        // responsibility per the struct docs.
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };
        Ok(Self {
            mmap,
            path: path_str,
        })
    }

    /// The whole mapping as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Path this mapping was opened from.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Hint the kernel that access will be a linear scan (Unix only).
    #[cfg(unix)]
    pub fn advise_sequential(&self) -> Result<()> {
        self.mmap.advise(memmap2::Advice::Sequential)?;
        Ok(())
    }
}

impl ByteSource for MmapSource {
    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        slice_read_at(&self.mmap, offset, buf)
    }
}
