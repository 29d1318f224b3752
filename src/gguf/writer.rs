//! Building containers byte-for-byte parseable by [`GgufFile::parse`]
//!
//! [`GgufWriter`] collects metadata and tensor payloads, then emits the
//! exact binary layout: header, metadata, directory, alignment padding,
//! payloads. Always writes version 3 (u64 count widths). Each tensor's
//! payload offset is aligned within the data section, matching what
//! mainstream tooling produces.
//!
//! [`GgufFile::parse`]: super::reader::GgufFile::parse

use super::types::{
    padding_for_alignment, MetadataValue, MetadataValueType, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC,
    GGUF_VERSION,
};
use crate::error::{CuantizarError, Result};
use crate::registry::{element_count, TensorType};

/// Append a length-prefixed string (u64 length, version 3 width).
pub fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_array_header(out: &mut Vec<u8>, element_type: MetadataValueType, len: usize) {
    out.extend_from_slice(&(element_type as u32).to_le_bytes());
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

fn write_value(out: &mut Vec<u8>, value: &MetadataValue) -> Result<()> {
    match value {
        MetadataValue::Uint8(v) => out.push(*v),
        MetadataValue::Int8(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Uint16(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Uint32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Float32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Bool(v) => out.push(u8::from(*v)),
        MetadataValue::String(v) => write_string(out, v),
        MetadataValue::Uint64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Float64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Array(items) => {
            let element_type = items
                .first()
                .map_or(MetadataValueType::Uint8, MetadataValue::value_type);
            for item in items {
                if item.value_type() != element_type {
                    return Err(CuantizarError::format_error(format!(
                        "metadata array mixes {:?} and {:?} elements",
                        element_type,
                        item.value_type()
                    )));
                }
            }
            write_array_header(out, element_type, items.len());
            for item in items {
                write_value(out, item)?;
            }
        }
    }
    Ok(())
}

/// Append one metadata key-value pair: key string, type tag, value.
///
/// # Errors
///
/// `FormatError` when an array value is not homogeneous.
pub fn write_metadata_kv(out: &mut Vec<u8>, key: &str, value: &MetadataValue) -> Result<()> {
    write_string(out, key);
    out.extend_from_slice(&(value.value_type() as u32).to_le_bytes());
    write_value(out, value)
}

#[derive(Debug)]
struct PendingTensor {
    name: String,
    dims: Vec<u64>,
    ty: TensorType,
    data: Vec<u8>,
}

/// Container builder: collect metadata and tensors, then [`build`] the
/// byte image.
///
/// [`build`]: GgufWriter::build
#[derive(Debug)]
pub struct GgufWriter {
    alignment: usize,
    metadata: Vec<(String, MetadataValue)>,
    tensors: Vec<PendingTensor>,
}

impl GgufWriter {
    /// Builder with the default 32-byte data alignment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alignment: GGUF_DEFAULT_ALIGNMENT,
            metadata: Vec::new(),
            tensors: Vec::new(),
        }
    }

    /// Builder with a custom data alignment. The `general.alignment`
    /// metadata key is emitted automatically so parsers honor it.
    ///
    /// # Errors
    ///
    /// `FormatError` unless `alignment` is a power of two that fits the
    /// u32 metadata entry.
    pub fn with_alignment(alignment: usize) -> Result<Self> {
        if alignment == 0 || !alignment.is_power_of_two() || u32::try_from(alignment).is_err() {
            return Err(CuantizarError::format_error(format!(
                "alignment must be a power of two no larger than {}, got {alignment}",
                u32::MAX
            )));
        }
        Ok(Self {
            alignment,
            metadata: Vec::new(),
            tensors: Vec::new(),
        })
    }

    /// Queue a metadata key-value pair. Emitted in insertion order.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: MetadataValue) {
        self.metadata.push((key.into(), value));
    }

    /// Queue a tensor with an already-packed payload.
    ///
    /// # Errors
    ///
    /// `FormatError` for a duplicate name, `CorruptBlock` when the
    /// payload length does not match the geometry for the shape,
    /// `DimensionMismatch`/`Overflow` from shape arithmetic.
    pub fn add_tensor(
        &mut self,
        name: impl Into<String>,
        dims: Vec<u64>,
        ty: TensorType,
        data: Vec<u8>,
    ) -> Result<()> {
        let name = name.into();
        if self.tensors.iter().any(|t| t.name == name) {
            return Err(CuantizarError::format_error(format!(
                "duplicate tensor name '{name}'"
            )));
        }
        let geom = ty.geometry();
        let blocks = geom.block_count(element_count(&dims)?)?;
        let expected = blocks.checked_mul(geom.block_bytes).ok_or_else(|| {
            CuantizarError::overflow(format!("payload size of tensor '{name}'"))
        })?;
        if data.len() != expected {
            return Err(CuantizarError::CorruptBlock {
                type_name: geom.name,
                expected,
                actual: data.len(),
            });
        }
        self.tensors.push(PendingTensor {
            name,
            dims,
            ty,
            data,
        });
        Ok(())
    }

    /// Queue an unquantized F32 tensor from float values.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` when `values` does not match the shape, plus
    /// everything [`GgufWriter::add_tensor`] can return.
    pub fn add_f32_tensor(
        &mut self,
        name: impl Into<String>,
        dims: Vec<u64>,
        values: &[f32],
    ) -> Result<()> {
        let elements = element_count(&dims)?;
        if values.len() != elements {
            return Err(CuantizarError::DimensionMismatch {
                expected: format!("{elements} elements for shape {dims:?}"),
                actual: values.len().to_string(),
            });
        }
        let data = crate::codec::quantize(TensorType::F32, values)?;
        self.add_tensor(name, dims, TensorType::F32, data)
    }

    /// Emit the container bytes.
    ///
    /// # Errors
    ///
    /// `FormatError` when an explicit `general.alignment` metadata entry
    /// contradicts the builder's alignment, or an array value is not
    /// homogeneous.
    pub fn build(&self) -> Result<Vec<u8>> {
        // an explicit general.alignment entry must agree with the layout
        // this builder actually produces
        let mut have_alignment_key = false;
        for (key, value) in &self.metadata {
            if key == "general.alignment" {
                have_alignment_key = true;
                if value.as_u64() != Some(self.alignment as u64) {
                    return Err(CuantizarError::format_error(format!(
                        "general.alignment metadata {value:?} contradicts builder alignment {}",
                        self.alignment
                    )));
                }
            }
        }
        let inject_alignment = self.alignment != GGUF_DEFAULT_ALIGNMENT && !have_alignment_key;
        let kv_count = self.metadata.len() as u64 + u64::from(inject_alignment);

        let mut out = Vec::new();
        out.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        out.extend_from_slice(&GGUF_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.tensors.len() as u64).to_le_bytes());
        out.extend_from_slice(&kv_count.to_le_bytes());

        if inject_alignment {
            write_metadata_kv(
                &mut out,
                "general.alignment",
                &MetadataValue::Uint32(self.alignment as u32),
            )?;
        }
        for (key, value) in &self.metadata {
            write_metadata_kv(&mut out, key, value)?;
        }

        // directory with data-section-relative offsets, each aligned
        let mut offsets = Vec::with_capacity(self.tensors.len());
        let mut cursor = 0usize;
        for tensor in &self.tensors {
            let offset = cursor + padding_for_alignment(cursor, self.alignment);
            offsets.push(offset as u64);
            cursor = offset + tensor.data.len();
        }
        for (tensor, offset) in self.tensors.iter().zip(offsets.iter()) {
            write_string(&mut out, &tensor.name);
            out.extend_from_slice(&(tensor.dims.len() as u32).to_le_bytes());
            for dim in &tensor.dims {
                out.extend_from_slice(&dim.to_le_bytes());
            }
            out.extend_from_slice(&tensor.ty.tag().to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
        }

        let header_padding = padding_for_alignment(out.len(), self.alignment);
        out.resize(out.len() + header_padding, 0);
        let data_start = out.len();
        for (tensor, offset) in self.tensors.iter().zip(offsets.iter()) {
            let absolute = data_start + *offset as usize;
            out.resize(absolute, 0);
            out.extend_from_slice(&tensor.data);
        }
        Ok(out)
    }
}

impl Default for GgufWriter {
    fn default() -> Self {
        Self::new()
    }
}
