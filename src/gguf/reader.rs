//! Container parsing over a [`ByteSource`]
//!
//! [`GgufFile::parse`] walks the header with a positioned cursor: magic,
//! version, counts, metadata, tensor directory, then the alignment
//! padding that places the data section. Version 1 encodes counts,
//! string lengths and dims as u32; versions 2 and 3 as u64. The width is
//! always selected from the parsed version, never assumed.
//!
//! Hostile headers must fail with explicit errors before any allocation
//! sized from an unvalidated count.

use std::collections::{BTreeMap, BTreeSet};

use super::source::ByteSource;
use super::types::{
    padding_for_alignment, MetadataValue, MetadataValueType, TensorDescriptor, GGUF_DEFAULT_ALIGNMENT,
    GGUF_MAGIC,
};
use crate::error::{CuantizarError, Result};
use crate::registry::element_count;

/// Inclusive range of container versions this parser accepts.
pub const SUPPORTED_VERSIONS: (u32, u32) = (1, 3);

/// Upper bound on the tensor directory. No real model comes close.
const MAX_TENSOR_COUNT: u64 = 100_000;
/// Upper bound on metadata entries.
const MAX_METADATA_COUNT: u64 = 100_000;
/// Upper bound on dimensions per tensor.
const MAX_DIMS: u32 = 16;
/// Upper bound on elements per tensor (a 16 GB F32 tensor).
const MAX_TENSOR_ELEMENTS: usize = 4_000_000_000;
/// Upper bound on a single string (chat templates run to ~100 KB).
const MAX_STRING_LEN: u64 = 1 << 24;
/// Upper bound on metadata array nesting.
const MAX_ARRAY_NESTING: usize = 8;

/// Offset-tracking reads over a [`ByteSource`].
struct Cursor<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    offset: u64,
}

impl<'a, S: ByteSource + ?Sized> Cursor<'a, S> {
    fn new(source: &'a S) -> Self {
        Self { source, offset: 0 }
    }

    fn remaining(&self) -> u64 {
        self.source.len().saturating_sub(self.offset)
    }

    fn take(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        if self.source.read_exact_at(self.offset, buf).is_err() {
            return Err(CuantizarError::format_error(format!(
                "unexpected EOF reading {what} at offset {}",
                self.offset
            )));
        }
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn read_u8(&mut self, what: &str) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.take(&mut buf, what)?;
        Ok(buf[0])
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.take(&mut buf, what)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self, what: &str) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.take(&mut buf, what)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Count field whose width depends on the container version.
    fn read_count(&mut self, version: u32, what: &str) -> Result<u64> {
        if version == 1 {
            Ok(u64::from(self.read_u32(what)?))
        } else {
            self.read_u64(what)
        }
    }

    /// Length-prefixed string; the length uses the version's count width.
    fn read_string(&mut self, version: u32, what: &str) -> Result<String> {
        let len = self.read_count(version, what)?;
        if len > MAX_STRING_LEN {
            return Err(CuantizarError::format_error(format!(
                "{what} of {len} bytes exceeds maximum {MAX_STRING_LEN}"
            )));
        }
        if len > self.remaining() {
            return Err(CuantizarError::format_error(format!(
                "{what} of {len} bytes runs past the end at offset {}",
                self.offset
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.take(&mut buf, what)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn read_value<S: ByteSource + ?Sized>(
    cursor: &mut Cursor<'_, S>,
    tag: u32,
    version: u32,
    depth: usize,
) -> Result<MetadataValue> {
    let ty = MetadataValueType::from_u32(tag).ok_or_else(|| {
        CuantizarError::format_error(format!(
            "unknown metadata value type {tag} at offset {}",
            cursor.offset
        ))
    })?;
    match ty {
        MetadataValueType::Uint8 => Ok(MetadataValue::Uint8(cursor.read_u8("uint8 value")?)),
        MetadataValueType::Int8 => Ok(MetadataValue::Int8(cursor.read_u8("int8 value")? as i8)),
        MetadataValueType::Uint16 => {
            let mut buf = [0u8; 2];
            cursor.take(&mut buf, "uint16 value")?;
            Ok(MetadataValue::Uint16(u16::from_le_bytes(buf)))
        }
        MetadataValueType::Int16 => {
            let mut buf = [0u8; 2];
            cursor.take(&mut buf, "int16 value")?;
            Ok(MetadataValue::Int16(i16::from_le_bytes(buf)))
        }
        MetadataValueType::Uint32 => Ok(MetadataValue::Uint32(cursor.read_u32("uint32 value")?)),
        MetadataValueType::Int32 => {
            Ok(MetadataValue::Int32(cursor.read_u32("int32 value")? as i32))
        }
        MetadataValueType::Float32 => {
            let mut buf = [0u8; 4];
            cursor.take(&mut buf, "float32 value")?;
            Ok(MetadataValue::Float32(f32::from_le_bytes(buf)))
        }
        MetadataValueType::Bool => Ok(MetadataValue::Bool(cursor.read_u8("bool value")? != 0)),
        MetadataValueType::String => Ok(MetadataValue::String(
            cursor.read_string(version, "string value")?,
        )),
        MetadataValueType::Array => {
            if depth >= MAX_ARRAY_NESTING {
                return Err(CuantizarError::format_error(format!(
                    "metadata array nesting exceeds maximum {MAX_ARRAY_NESTING}"
                )));
            }
            let elem_tag = cursor.read_u32("array element type")?;
            let count = cursor.read_count(version, "array length")?;
            // every element costs at least one byte, so a count beyond the
            // remaining bytes can never be satisfied
            if count > cursor.remaining() {
                return Err(CuantizarError::format_error(format!(
                    "array of {count} elements runs past the end at offset {}",
                    cursor.offset
                )));
            }
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(read_value(cursor, elem_tag, version, depth + 1)?);
            }
            Ok(MetadataValue::Array(items))
        }
        MetadataValueType::Uint64 => Ok(MetadataValue::Uint64(cursor.read_u64("uint64 value")?)),
        MetadataValueType::Int64 => {
            Ok(MetadataValue::Int64(cursor.read_u64("int64 value")? as i64))
        }
        MetadataValueType::Float64 => {
            let mut buf = [0u8; 8];
            cursor.take(&mut buf, "float64 value")?;
            Ok(MetadataValue::Float64(f64::from_le_bytes(buf)))
        }
    }
}

/// A parsed container: header fields, metadata, tensor directory and the
/// absolute offset where the aligned data section begins.
///
/// Payload bytes stay in the source; [`GgufFile::tensor_bytes`] pulls one
/// tensor at a time with positioned reads, so a parsed file can serve
/// multiple reader threads against the same source.
#[derive(Debug, Clone)]
pub struct GgufFile {
    /// Container version (1, 2 or 3)
    pub version: u32,
    /// Data-section alignment in effect for this file
    pub alignment: usize,
    /// Metadata key-value pairs in key order
    pub metadata: BTreeMap<String, MetadataValue>,
    /// Tensor directory in file order
    pub tensors: Vec<TensorDescriptor>,
    /// Absolute offset of the data section
    pub data_offset: u64,
}

impl GgufFile {
    /// Parse a container header.
    ///
    /// # Errors
    ///
    /// `FormatError` for a bad magic, malformed fields, duplicate tensor
    /// names, hostile counts or a bad `general.alignment`;
    /// `UnsupportedVersion` outside [`SUPPORTED_VERSIONS`]; `Overflow`
    /// when sizes do not fit the address space.
    pub fn parse<S: ByteSource + ?Sized>(source: &S) -> Result<Self> {
        let mut cursor = Cursor::new(source);

        let mut magic_bytes = [0u8; 4];
        cursor.take(&mut magic_bytes, "magic")?;
        let magic = u32::from_le_bytes(magic_bytes);
        if magic != GGUF_MAGIC {
            let magic_ascii: String = magic_bytes
                .iter()
                .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
                .collect();
            return Err(CuantizarError::format_error(format!(
                "invalid magic: 0x{magic:08X} (bytes {magic_bytes:02X?}, ascii \"{magic_ascii}\"), \
                 expected 0x{GGUF_MAGIC:08X} (\"GGUF\")"
            )));
        }

        let version = cursor.read_u32("version")?;
        if !(SUPPORTED_VERSIONS.0..=SUPPORTED_VERSIONS.1).contains(&version) {
            return Err(CuantizarError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS,
            });
        }

        let tensor_count = cursor.read_count(version, "tensor count")?;
        let metadata_kv_count = cursor.read_count(version, "metadata count")?;
        if tensor_count > MAX_TENSOR_COUNT {
            return Err(CuantizarError::format_error(format!(
                "tensor count {tensor_count} exceeds maximum {MAX_TENSOR_COUNT}"
            )));
        }
        if metadata_kv_count > MAX_METADATA_COUNT {
            return Err(CuantizarError::format_error(format!(
                "metadata count {metadata_kv_count} exceeds maximum {MAX_METADATA_COUNT}"
            )));
        }

        let mut metadata = BTreeMap::new();
        for _ in 0..metadata_kv_count {
            let key = cursor.read_string(version, "metadata key")?;
            let tag = cursor.read_u32("metadata value type")?;
            let value = read_value(&mut cursor, tag, version, 0)?;
            metadata.insert(key, value);
        }

        let mut tensors = Vec::with_capacity(tensor_count as usize);
        let mut seen = BTreeSet::new();
        for _ in 0..tensor_count {
            let name = cursor.read_string(version, "tensor name")?;
            let n_dims = cursor.read_u32("dimension count")?;
            if n_dims > MAX_DIMS {
                return Err(CuantizarError::format_error(format!(
                    "tensor '{name}' has {n_dims} dimensions, exceeds maximum {MAX_DIMS}"
                )));
            }
            let mut dims = Vec::with_capacity(n_dims as usize);
            for _ in 0..n_dims {
                dims.push(cursor.read_count(version, "dimension")?);
            }
            let type_tag = cursor.read_u32("tensor type tag")?;
            let offset = cursor.read_u64("tensor offset")?;

            if !seen.insert(name.clone()) {
                return Err(CuantizarError::format_error(format!(
                    "duplicate tensor name '{name}'"
                )));
            }
            let elements = element_count(&dims)?;
            if elements > MAX_TENSOR_ELEMENTS {
                return Err(CuantizarError::format_error(format!(
                    "tensor '{name}' has {elements} elements, exceeds maximum {MAX_TENSOR_ELEMENTS}"
                )));
            }

            tensors.push(TensorDescriptor {
                name,
                dims,
                type_tag,
                offset,
            });
        }

        let alignment = match metadata.get("general.alignment") {
            None => GGUF_DEFAULT_ALIGNMENT,
            Some(value) => {
                let raw = value.as_u64().ok_or_else(|| {
                    CuantizarError::format_error(format!(
                        "general.alignment must be an unsigned integer, got {:?}",
                        value.value_type()
                    ))
                })?;
                if raw == 0 || !raw.is_power_of_two() {
                    return Err(CuantizarError::format_error(format!(
                        "general.alignment must be a power of two, got {raw}"
                    )));
                }
                usize::try_from(raw)
                    .map_err(|_| CuantizarError::overflow(format!("alignment {raw}")))?
            }
        };

        let header_end = usize::try_from(cursor.offset)
            .map_err(|_| CuantizarError::overflow(format!("header end {}", cursor.offset)))?;
        let data_offset = (header_end + padding_for_alignment(header_end, alignment)) as u64;

        // payload ranges are checkable now for every resolvable type; the
        // unresolvable ones stay parseable and fail per tensor on access
        for descriptor in &tensors {
            if descriptor.tensor_type().is_none() {
                continue;
            }
            let size = descriptor.byte_size()? as u64;
            let end = data_offset
                .checked_add(descriptor.offset)
                .and_then(|start| start.checked_add(size))
                .ok_or_else(|| {
                    CuantizarError::overflow(format!(
                        "payload range of tensor '{}'",
                        descriptor.name
                    ))
                })?;
            if end > source.len() {
                return Err(CuantizarError::format_error(format!(
                    "tensor '{}' payload ends at {end}, past the {}-byte container",
                    descriptor.name,
                    source.len()
                )));
            }
        }

        Ok(Self {
            version,
            alignment,
            metadata,
            tensors,
            data_offset,
        })
    }

    /// Look up a tensor by name.
    #[must_use]
    pub fn tensor(&self, name: &str) -> Option<&TensorDescriptor> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Unsigned-integer metadata value, widened to u64.
    #[must_use]
    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(MetadataValue::as_u64)
    }

    /// String metadata value.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetadataValue::as_str)
    }

    /// Read one tensor's packed payload.
    ///
    /// The absolute position is data-section start plus the descriptor's
    /// relative offset; the length comes from the block geometry.
    ///
    /// # Errors
    ///
    /// `UnsupportedType` when the descriptor's tag is not a supported
    /// scheme; `FormatError` when the payload range is not in the source.
    pub fn tensor_bytes<S: ByteSource + ?Sized>(
        &self,
        source: &S,
        descriptor: &TensorDescriptor,
    ) -> Result<Vec<u8>> {
        let size = descriptor.byte_size()?;
        let start = self.data_offset.checked_add(descriptor.offset).ok_or_else(|| {
            CuantizarError::overflow(format!("absolute offset of tensor '{}'", descriptor.name))
        })?;
        let mut buf = vec![0u8; size];
        source.read_exact_at(start, &mut buf)?;
        Ok(buf)
    }

    /// Read and decode one tensor to floats.
    ///
    /// # Errors
    ///
    /// Everything [`GgufFile::tensor_bytes`] and the block codec can
    /// return.
    pub fn tensor_f32<S: ByteSource + ?Sized>(
        &self,
        source: &S,
        descriptor: &TensorDescriptor,
    ) -> Result<Vec<f32>> {
        let ty = descriptor.resolve_type()?;
        let bytes = self.tensor_bytes(source, descriptor)?;
        crate::codec::dequantize(ty, &bytes, descriptor.element_count()?)
    }
}
