//! Two-phase re-quantizing converter
//!
//! [`convert`] turns a parsed container into the fixed-block output
//! format. Phase 1 scans every tensor and collects every unsupported
//! type so the failure report is exhaustive; only a clean phase 1
//! proceeds to phase 2, which decodes each tensor through the block
//! codec and re-encodes it into 64-element blocks with one f32 scale
//! per block. Output goes through a [`TensorSink`] and becomes
//! observable only at commit.
//!
//! Identical input bytes produce identical output bytes: tensor order
//! follows the source directory, block encoding has no data-dependent
//! branching beyond the values themselves, and no randomized structure
//! is involved anywhere.

pub mod output;
pub mod sink;

pub use output::{
    OutputContainer, OutputTensorRecord, TargetPrecision, OUTPUT_BLOCK_SIZE, OUTPUT_MAGIC,
    OUTPUT_VERSION,
};
pub use sink::{FileSink, MemorySink, TensorSink};

use crate::codec;
use crate::error::{CuantizarError, Result, UnsupportedTensor};
use crate::gguf::{ByteSource, GgufFile, TensorDescriptor};
use crate::registry::FormatRegistry;
use serde::{Deserialize, Serialize};

/// Conversion knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Packing for every output tensor
    pub precision: TargetPrecision,
}

/// Per-tensor outcome of a successful conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorReport {
    /// Tensor name
    pub name: String,
    /// Source scheme name (for example "Q4_K")
    pub source_type: String,
    /// Logical element count
    pub elements: usize,
    /// Output blocks written
    pub blocks: usize,
    /// Output bytes (scales plus payload)
    pub output_bytes: usize,
}

/// Summary of a successful conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionReport {
    /// Number of tensors converted
    pub tensor_count: usize,
    /// Total source payload bytes
    pub original_bytes: usize,
    /// Total output bytes (scales plus payloads)
    pub converted_bytes: usize,
    /// Packing used
    pub precision: TargetPrecision,
    /// One entry per tensor, in source order
    pub tensors: Vec<TensorReport>,
}

impl ConversionReport {
    /// Source size over output size. 1.0 for an empty conversion.
    #[must_use]
    pub fn reduction_ratio(&self) -> f32 {
        if self.converted_bytes == 0 {
            return 1.0;
        }
        self.original_bytes as f32 / self.converted_bytes as f32
    }
}

/// Re-encode one 64-element-block tensor payload.
///
/// Per block: scale = max(|values|) / quant_max, an all-zero block takes
/// scale 1.0, encoded = round(v / scale) clamped to ±quant_max. The
/// final partial block is zero-padded.
fn encode_blocks(values: &[f32], precision: TargetPrecision) -> (Vec<f32>, Vec<u8>) {
    let blocks = values.len().div_ceil(OUTPUT_BLOCK_SIZE);
    let quant_max = precision.quant_max() as f32;
    let mut scales = Vec::with_capacity(blocks);
    let mut payload = Vec::with_capacity(blocks * precision.bytes_per_block());

    let mut padded = [0.0f32; OUTPUT_BLOCK_SIZE];
    for chunk in values.chunks(OUTPUT_BLOCK_SIZE) {
        let block: &[f32] = if chunk.len() == OUTPUT_BLOCK_SIZE {
            chunk
        } else {
            padded.fill(0.0);
            padded[..chunk.len()].copy_from_slice(chunk);
            &padded
        };
        let max_abs = block.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        let scale = if max_abs == 0.0 { 1.0 } else { max_abs / quant_max };
        let inv_scale = 1.0 / scale;
        scales.push(scale);

        match precision {
            TargetPrecision::Int8 => {
                for &v in block {
                    let q = (v * inv_scale).round().clamp(-127.0, 127.0) as i8;
                    payload.push(q as u8);
                }
            }
            TargetPrecision::Int4 => {
                for pair in block.chunks_exact(2) {
                    let lo = (pair[0] * inv_scale).round().clamp(-7.0, 7.0) as i32 + 8;
                    let hi = (pair[1] * inv_scale).round().clamp(-7.0, 7.0) as i32 + 8;
                    payload.push((lo | (hi << 4)) as u8);
                }
            }
        }
    }
    (scales, payload)
}

fn re_encode_tensor<S: ByteSource + ?Sized>(
    file: &GgufFile,
    source: &S,
    descriptor: &TensorDescriptor,
    precision: TargetPrecision,
) -> Result<OutputTensorRecord> {
    let ty = descriptor.resolve_type()?;
    let bytes = file.tensor_bytes(source, descriptor)?;
    let values = codec::dequantize(ty, &bytes, descriptor.element_count()?)?;
    let (scales, payload) = encode_blocks(&values, precision);
    Ok(OutputTensorRecord {
        name: descriptor.name.clone(),
        dims: descriptor.dims.clone(),
        precision,
        scales,
        payload,
    })
}

/// Convert every tensor of a parsed container into the output format.
///
/// Phase 1 validates all tensors and reports every unsupported type in
/// one batch; nothing is written when it fails. Phase 2 re-encodes and
/// streams records to the sink, committing only after the last tensor.
/// Any phase-2 or commit error aborts the sink before propagating.
///
/// # Errors
///
/// `AggregateUnsupportedType` carrying every undecodable tensor;
/// `FormatError` / `CorruptBlock` / `Overflow` when the input cannot be
/// decoded; `Io` from the sink.
pub fn convert<S: ByteSource + ?Sized, K: TensorSink>(
    file: &GgufFile,
    source: &S,
    sink: &mut K,
    options: &ConvertOptions,
) -> Result<ConversionReport> {
    let registry = FormatRegistry::new();

    // phase 1: the failure list must be exhaustive, so no early return
    // inside the scan
    let mut failures = Vec::new();
    for descriptor in &file.tensors {
        if descriptor.tensor_type().is_none() {
            failures.push(UnsupportedTensor {
                name: descriptor.name.clone(),
                type_tag: descriptor.type_tag,
            });
        }
    }
    if !failures.is_empty() {
        return Err(CuantizarError::AggregateUnsupportedType { failures });
    }

    // phase 2
    sink.begin_write(file.tensors.len())?;
    let written = match write_all(file, source, sink, options, &registry) {
        Ok(report) => sink.commit().map(|()| report),
        Err(err) => Err(err),
    };
    match written {
        Ok(report) => Ok(report),
        Err(err) => {
            // surface the conversion failure, not any cleanup failure; a
            // failed commit leaves the sink active, so abort still cleans up
            let _ = sink.abort();
            Err(err)
        }
    }
}

fn write_all<S: ByteSource + ?Sized, K: TensorSink>(
    file: &GgufFile,
    source: &S,
    sink: &mut K,
    options: &ConvertOptions,
    registry: &FormatRegistry,
) -> Result<ConversionReport> {
    let mut report = ConversionReport {
        tensor_count: file.tensors.len(),
        original_bytes: 0,
        converted_bytes: 0,
        precision: options.precision,
        tensors: Vec::with_capacity(file.tensors.len()),
    };
    for descriptor in &file.tensors {
        let ty = descriptor.resolve_type()?;
        let elements = descriptor.element_count()?;
        let record = re_encode_tensor(file, source, descriptor, options.precision)?;
        let output_bytes = record.scales.len() * 4 + record.payload.len();
        report.original_bytes += registry.byte_size(ty, elements)?;
        report.converted_bytes += output_bytes;
        report.tensors.push(TensorReport {
            name: record.name.clone(),
            source_type: ty.name().to_string(),
            elements,
            blocks: record.n_blocks(),
            output_bytes,
        });
        sink.write_record(&record)?;
    }
    Ok(report)
}
