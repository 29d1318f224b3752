//! Where converted records go
//!
//! The converter drives a [`TensorSink`] through `begin_write`, one
//! `write_record` per tensor, then `commit` or `abort`. The sink owns
//! atomicity: until `commit` returns, no output is observable; after
//! `abort`, nothing is left behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::output::{OutputContainer, OutputTensorRecord};
use crate::error::{CuantizarError, Result};

/// Receiver for converted tensors, all-or-nothing.
pub trait TensorSink {
    /// Start a write of `tensor_count` records. Clears any prior state.
    fn begin_write(&mut self, tensor_count: usize) -> Result<()>;

    /// Accept one record. Order is the source directory order.
    fn write_record(&mut self, record: &OutputTensorRecord) -> Result<()>;

    /// Make the output observable. Only called after every record.
    fn commit(&mut self) -> Result<()>;

    /// Discard everything staged since `begin_write`.
    fn abort(&mut self) -> Result<()>;
}

/// Sink that assembles the output container in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pending: Vec<OutputTensorRecord>,
    active: bool,
    committed: Option<Vec<u8>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed container bytes; `None` until a commit.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        self.committed.as_deref()
    }

    /// Consume the sink, yielding the committed container bytes.
    #[must_use]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        self.committed
    }
}

impl TensorSink for MemorySink {
    fn begin_write(&mut self, tensor_count: usize) -> Result<()> {
        self.pending.clear();
        self.pending.reserve(tensor_count);
        self.committed = None;
        self.active = true;
        Ok(())
    }

    fn write_record(&mut self, record: &OutputTensorRecord) -> Result<()> {
        if !self.active {
            return Err(CuantizarError::Other(
                "write_record before begin_write".to_string(),
            ));
        }
        self.pending.push(record.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.active {
            return Err(CuantizarError::Other("commit before begin_write".to_string()));
        }
        self.committed = Some(OutputContainer::encode(&self.pending));
        self.pending.clear();
        self.active = false;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        self.pending.clear();
        self.committed = None;
        self.active = false;
        Ok(())
    }
}

/// Sink that writes a sibling temp file and renames it into place on
/// commit. The rename is atomic on POSIX filesystems, so readers of the
/// target path see either the old file or the complete new one, never a
/// partial write.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    tmp_path: PathBuf,
    pending: Vec<OutputTensorRecord>,
    active: bool,
}

impl FileSink {
    /// Sink targeting `path`. The temp file is `path` with `.tmp`
    /// appended, in the same directory so the rename never crosses a
    /// filesystem.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp),
            pending: Vec::new(),
            active: false,
        }
    }

    /// The target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TensorSink for FileSink {
    fn begin_write(&mut self, tensor_count: usize) -> Result<()> {
        self.pending.clear();
        self.pending.reserve(tensor_count);
        // create the temp file now so an unwritable target fails before
        // any conversion work
        fs::write(&self.tmp_path, [])?;
        self.active = true;
        Ok(())
    }

    fn write_record(&mut self, record: &OutputTensorRecord) -> Result<()> {
        if !self.active {
            return Err(CuantizarError::Other(
                "write_record before begin_write".to_string(),
            ));
        }
        self.pending.push(record.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.active {
            return Err(CuantizarError::Other("commit before begin_write".to_string()));
        }
        let bytes = OutputContainer::encode(&self.pending);
        fs::write(&self.tmp_path, &bytes)?;
        fs::rename(&self.tmp_path, &self.path)?;
        self.pending.clear();
        self.active = false;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        self.pending.clear();
        if self.active {
            self.active = false;
            if let Err(err) = fs::remove_file(&self.tmp_path) {
                if err.kind() != io::ErrorKind::NotFound {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }
}
