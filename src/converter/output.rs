//! The converter's output container
//!
//! Little-endian layout:
//!
//! ```text
//! magic "CQTZ" | version u32 = 1 | tensor_count u32 |
//! directory: { name (u32 len + UTF-8), n_dims u32, dims u64...,
//!              type u32, block_size u32, offset u64 } |
//! per tensor at offset: scale array (f32 x n_blocks) | packed payload
//! ```
//!
//! Offsets are absolute from the start of the container. Every tensor is
//! stored in fixed 64-element blocks with one f32 scale per block; the
//! directory keeps the true shape, so a final partial block is implied
//! rather than recorded.

use crate::error::{CuantizarError, Result};
use crate::registry::element_count;
use serde::{Deserialize, Serialize};

/// "CQTZ" as a little-endian u32.
pub const OUTPUT_MAGIC: u32 = 0x5A54_5143;

/// Output container version this crate writes and parses.
pub const OUTPUT_VERSION: u32 = 1;

/// Elements per output block, all precisions.
pub const OUTPUT_BLOCK_SIZE: usize = 64;

/// Re-quantization target: how each 64-element block is packed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPrecision {
    /// One signed byte per value, quant_max 127
    #[default]
    Int8,
    /// One nibble per value with a +8 bias on disk, quant_max 7
    Int4,
}

impl TargetPrecision {
    /// Directory type tag.
    #[must_use]
    pub fn tag(self) -> u32 {
        match self {
            Self::Int8 => 0,
            Self::Int4 => 1,
        }
    }

    /// Resolve a directory type tag.
    #[must_use]
    pub fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Int8),
            1 => Some(Self::Int4),
            _ => None,
        }
    }

    /// Largest representable magnitude of an encoded value.
    #[must_use]
    pub fn quant_max(self) -> i32 {
        match self {
            Self::Int8 => 127,
            Self::Int4 => 7,
        }
    }

    /// Packed payload bytes per 64-element block.
    #[must_use]
    pub fn bytes_per_block(self) -> usize {
        match self {
            Self::Int8 => OUTPUT_BLOCK_SIZE,
            Self::Int4 => OUTPUT_BLOCK_SIZE / 2,
        }
    }

    /// Name as written in reports.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int4 => "int4",
        }
    }
}

/// One converted tensor: true shape, per-block scales and the packed
/// payload covering whole blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTensorRecord {
    /// Tensor name from the source container
    pub name: String,
    /// True logical shape; the final block may be padding beyond it
    pub dims: Vec<u64>,
    /// Packing of the payload
    pub precision: TargetPrecision,
    /// One scale per block
    pub scales: Vec<f32>,
    /// Packed values, `scales.len()` whole blocks
    pub payload: Vec<u8>,
}

impl OutputTensorRecord {
    /// Logical element count (product of dims).
    pub fn element_count(&self) -> Result<usize> {
        element_count(&self.dims)
    }

    /// Number of 64-element blocks.
    #[must_use]
    pub fn n_blocks(&self) -> usize {
        self.scales.len()
    }

    /// Decode the record back to floats, truncated to the true shape.
    ///
    /// # Errors
    ///
    /// `CorruptBlock` when the payload does not hold whole blocks for
    /// the scale count, `Overflow` on shape arithmetic.
    pub fn decode(&self) -> Result<Vec<f32>> {
        let per_block = self.precision.bytes_per_block();
        let expected = self.scales.len() * per_block;
        if self.payload.len() != expected {
            return Err(CuantizarError::CorruptBlock {
                type_name: self.precision.name(),
                expected,
                actual: self.payload.len(),
            });
        }
        let elements = self.element_count()?;
        let mut out = Vec::with_capacity(self.scales.len() * OUTPUT_BLOCK_SIZE);
        for (scale, block) in self.scales.iter().zip(self.payload.chunks_exact(per_block)) {
            match self.precision {
                TargetPrecision::Int8 => {
                    for &byte in block {
                        out.push(f32::from(byte as i8) * scale);
                    }
                }
                TargetPrecision::Int4 => {
                    for &byte in block {
                        let lo = i32::from(byte & 0x0F) - 8;
                        let hi = i32::from(byte >> 4) - 8;
                        out.push(lo as f32 * scale);
                        out.push(hi as f32 * scale);
                    }
                }
            }
        }
        out.truncate(elements);
        Ok(out)
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

struct OutputCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> OutputCursor<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(len).ok_or_else(|| {
            CuantizarError::overflow(format!("{what} at offset {}", self.offset))
        })?;
        if end > self.bytes.len() {
            return Err(CuantizarError::format_error(format!(
                "unexpected EOF reading {what} at offset {}",
                self.offset
            )));
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self, what: &str) -> Result<u64> {
        let b = self.take(8, what)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

/// Parsed form of the converter's output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputContainer {
    /// Records in directory order
    pub records: Vec<OutputTensorRecord>,
}

impl OutputContainer {
    /// Assemble the container bytes for a record list.
    #[must_use]
    pub fn encode(records: &[OutputTensorRecord]) -> Vec<u8> {
        // directory size first, so offsets can be absolute
        let mut directory_len = 12usize;
        for record in records {
            directory_len += 4 + record.name.len() + 4 + 8 * record.dims.len() + 4 + 4 + 8;
        }

        let mut out = Vec::with_capacity(directory_len);
        put_u32(&mut out, OUTPUT_MAGIC);
        put_u32(&mut out, OUTPUT_VERSION);
        put_u32(&mut out, records.len() as u32);

        let mut offset = directory_len as u64;
        for record in records {
            put_u32(&mut out, record.name.len() as u32);
            out.extend_from_slice(record.name.as_bytes());
            put_u32(&mut out, record.dims.len() as u32);
            for dim in &record.dims {
                put_u64(&mut out, *dim);
            }
            put_u32(&mut out, record.precision.tag());
            put_u32(&mut out, OUTPUT_BLOCK_SIZE as u32);
            put_u64(&mut out, offset);
            offset += (record.scales.len() * 4 + record.payload.len()) as u64;
        }
        for record in records {
            for scale in &record.scales {
                out.extend_from_slice(&scale.to_le_bytes());
            }
            out.extend_from_slice(&record.payload);
        }
        out
    }

    /// Parse container bytes back into records.
    ///
    /// # Errors
    ///
    /// `FormatError` for a bad magic, version, type tag, block size or
    /// truncated region.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = OutputCursor { bytes, offset: 0 };
        let magic = cursor.read_u32("magic")?;
        if magic != OUTPUT_MAGIC {
            return Err(CuantizarError::format_error(format!(
                "invalid output magic: 0x{magic:08X}, expected 0x{OUTPUT_MAGIC:08X} (\"CQTZ\")"
            )));
        }
        let version = cursor.read_u32("version")?;
        if version != OUTPUT_VERSION {
            return Err(CuantizarError::format_error(format!(
                "unsupported output version {version}, expected {OUTPUT_VERSION}"
            )));
        }
        let tensor_count = cursor.read_u32("tensor count")? as usize;

        struct DirectoryEntry {
            name: String,
            dims: Vec<u64>,
            precision: TargetPrecision,
            offset: u64,
        }
        let mut entries = Vec::with_capacity(tensor_count.min(4096));
        for _ in 0..tensor_count {
            let name_len = cursor.read_u32("name length")? as usize;
            let name_bytes = cursor.take(name_len, "name")?;
            let name = String::from_utf8_lossy(name_bytes).into_owned();
            let n_dims = cursor.read_u32("dimension count")? as usize;
            let mut dims = Vec::with_capacity(n_dims.min(64));
            for _ in 0..n_dims {
                dims.push(cursor.read_u64("dimension")?);
            }
            let tag = cursor.read_u32("type tag")?;
            let precision = TargetPrecision::from_u32(tag).ok_or_else(|| {
                CuantizarError::format_error(format!("unknown output type tag {tag}"))
            })?;
            let block_size = cursor.read_u32("block size")?;
            if block_size as usize != OUTPUT_BLOCK_SIZE {
                return Err(CuantizarError::format_error(format!(
                    "unsupported output block size {block_size}, expected {OUTPUT_BLOCK_SIZE}"
                )));
            }
            let offset = cursor.read_u64("tensor offset")?;
            entries.push(DirectoryEntry {
                name,
                dims,
                precision,
                offset,
            });
        }

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let elements = element_count(&entry.dims)?;
            let blocks = elements.div_ceil(OUTPUT_BLOCK_SIZE);
            let mut cursor = OutputCursor {
                bytes,
                offset: usize::try_from(entry.offset).map_err(|_| {
                    CuantizarError::overflow(format!("offset of tensor '{}'", entry.name))
                })?,
            };
            let scale_bytes = cursor.take(blocks * 4, "scale array")?;
            let scales: Vec<f32> = scale_bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            let payload = cursor
                .take(blocks * entry.precision.bytes_per_block(), "payload")?
                .to_vec();
            records.push(OutputTensorRecord {
                name: entry.name,
                dims: entry.dims,
                precision: entry.precision,
                scales,
                payload,
            });
        }
        Ok(Self { records })
    }

    /// Look up a record by name.
    #[must_use]
    pub fn record(&self, name: &str) -> Option<&OutputTensorRecord> {
        self.records.iter().find(|r| r.name == name)
    }
}
