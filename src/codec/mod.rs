//! Bit-exact block codec
//!
//! Single-block encode/decode for every [`TensorType`], plus whole-tensor
//! helpers that walk a packed payload block by block. Buffers are caller
//! allocated: [`decode_block`] writes into a `&mut [f32]` of exactly one
//! block's elements, [`encode_block`] into a `&mut [u8]` of exactly one
//! block's packed bytes. Length mismatches on the packed side are
//! [`CuantizarError::CorruptBlock`]; mismatches on the element side are
//! [`CuantizarError::DimensionMismatch`]. Nothing here panics on
//! hostile input.
//!
//! Layouts follow the canonical GGML bit packing, so payloads produced by
//! mainstream tooling decode here and vice versa. `Q4_1`, `Q5_0` and
//! `Q5_1` are decode-only: asking for their encoder is a `FormatError`.

mod k_quants;
mod uniform;

pub(crate) use k_quants::get_scale_min_k4;

use crate::error::{CuantizarError, Result};
use crate::registry::{element_count, TensorType};
use half::f16;

fn expect_bytes(type_name: &'static str, expected: usize, bytes: &[u8]) -> Result<()> {
    if bytes.len() != expected {
        return Err(CuantizarError::CorruptBlock {
            type_name,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn expect_elements(type_name: &'static str, expected: usize, actual: usize) -> Result<()> {
    if actual != expected {
        return Err(CuantizarError::DimensionMismatch {
            expected: format!("{expected} elements for one {type_name} block"),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Decode one packed block of `ty` into `out`.
///
/// For the quantized schemes `bytes` must be exactly one block
/// (`block_bytes`) and `out` exactly `block_elements` long. `F32`/`F16`
/// are passthrough and accept any element count as long as the byte
/// length matches `out.len()` times the element width, so a whole float
/// tensor can be decoded in one call.
///
/// # Errors
///
/// `CorruptBlock` when `bytes` has the wrong length, `DimensionMismatch`
/// when `out` does.
pub fn decode_block(ty: TensorType, bytes: &[u8], out: &mut [f32]) -> Result<()> {
    match ty {
        TensorType::F32 => {
            expect_bytes("F32", out.len().saturating_mul(4), bytes)?;
            for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                *slot = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            Ok(())
        }
        TensorType::F16 => {
            expect_bytes("F16", out.len().saturating_mul(2), bytes)?;
            for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                *slot = f16::from_le_bytes([chunk[0], chunk[1]]).to_f32();
            }
            Ok(())
        }
        _ => {
            let geom = ty.geometry();
            expect_bytes(geom.name, geom.block_bytes, bytes)?;
            expect_elements(geom.name, geom.block_elements, out.len())?;
            match ty {
                TensorType::Q4_0 => uniform::decode_q4_0(bytes, out),
                TensorType::Q4_1 => uniform::decode_q4_1(bytes, out),
                TensorType::Q5_0 => uniform::decode_q5_0(bytes, out),
                TensorType::Q5_1 => uniform::decode_q5_1(bytes, out),
                TensorType::Q8_0 => uniform::decode_q8_0(bytes, out),
                TensorType::Q4_K => k_quants::decode_q4_k(bytes, out),
                TensorType::Q5_K => k_quants::decode_q5_k(bytes, out),
                TensorType::Q6_K => k_quants::decode_q6_k(bytes, out),
                // float passthrough handled above
                TensorType::F32 | TensorType::F16 => {}
            }
            Ok(())
        }
    }
}

/// Encode one block of `values` into the packed layout of `ty`.
///
/// Mirror of [`decode_block`]: `values` must be exactly one block for the
/// quantized schemes, `out` exactly `block_bytes`. `F32`/`F16` accept any
/// element count. Given the same input the output bytes are identical on
/// every run and every platform.
///
/// # Errors
///
/// `FormatError` for the decode-only schemes (`Q4_1`, `Q5_0`, `Q5_1`),
/// `DimensionMismatch`/`CorruptBlock` for length mismatches.
pub fn encode_block(ty: TensorType, values: &[f32], out: &mut [u8]) -> Result<()> {
    match ty {
        TensorType::F32 => {
            expect_bytes("F32", values.len().saturating_mul(4), out)?;
            for (chunk, value) in out.chunks_exact_mut(4).zip(values.iter()) {
                chunk.copy_from_slice(&value.to_le_bytes());
            }
            Ok(())
        }
        TensorType::F16 => {
            expect_bytes("F16", values.len().saturating_mul(2), out)?;
            for (chunk, value) in out.chunks_exact_mut(2).zip(values.iter()) {
                chunk.copy_from_slice(&f16::from_f32(*value).to_le_bytes());
            }
            Ok(())
        }
        TensorType::Q4_1 | TensorType::Q5_0 | TensorType::Q5_1 => {
            Err(CuantizarError::format_error(format!(
                "{} is decode-only; pick Q4_0, Q8_0 or a K-quant as the encode target",
                ty.name()
            )))
        }
        _ => {
            let geom = ty.geometry();
            expect_elements(geom.name, geom.block_elements, values.len())?;
            expect_bytes(geom.name, geom.block_bytes, out)?;
            match ty {
                TensorType::Q4_0 => uniform::encode_q4_0(values, out),
                TensorType::Q8_0 => uniform::encode_q8_0(values, out),
                TensorType::Q4_K => k_quants::encode_q4_k(values, out),
                TensorType::Q5_K => k_quants::encode_q5_k(values, out),
                TensorType::Q6_K => k_quants::encode_q6_k(values, out),
                _ => {}
            }
            Ok(())
        }
    }
}

/// Decode a whole packed payload into `element_count` floats.
///
/// The payload must be exactly the block-ceiling byte size for
/// `element_count` elements of `ty`. Trailing padding elements in the
/// final block are decoded and then discarded, so the returned vector is
/// exactly `element_count` long.
///
/// # Errors
///
/// `CorruptBlock` when the payload length is wrong, `DimensionMismatch`
/// for a ragged count on a block-strict scheme, `Overflow` on byte-size
/// arithmetic.
pub fn dequantize(ty: TensorType, bytes: &[u8], element_count: usize) -> Result<Vec<f32>> {
    let geom = ty.geometry();
    if !ty.is_quantized() {
        let mut out = vec![0.0f32; element_count];
        decode_block(ty, bytes, &mut out)?;
        return Ok(out);
    }
    let blocks = geom.block_count(element_count)?;
    let expected = blocks.checked_mul(geom.block_bytes).ok_or_else(|| {
        CuantizarError::overflow(format!("payload size of {element_count} {} elements", geom.name))
    })?;
    expect_bytes(geom.name, expected, bytes)?;

    let mut out = vec![0.0f32; blocks * geom.block_elements];
    for (block, chunk) in bytes.chunks_exact(geom.block_bytes).enumerate() {
        let start = block * geom.block_elements;
        decode_block(ty, chunk, &mut out[start..start + geom.block_elements])?;
    }
    out.truncate(element_count);
    Ok(out)
}

/// Encode a whole float tensor into the packed layout of `ty`.
///
/// Element counts that are not a whole number of blocks are allowed for
/// the 32-element schemes: the final block is zero-padded before
/// encoding. The super-block schemes are block-strict and reject ragged
/// counts.
///
/// # Errors
///
/// `FormatError` for a decode-only target, `DimensionMismatch` for a
/// ragged count on a block-strict scheme, `Overflow` on byte-size
/// arithmetic.
pub fn quantize(ty: TensorType, values: &[f32]) -> Result<Vec<u8>> {
    let geom = ty.geometry();
    if !ty.is_quantized() {
        let total = values.len().checked_mul(geom.block_bytes).ok_or_else(|| {
            CuantizarError::overflow(format!("payload size of {} floats", values.len()))
        })?;
        let mut out = vec![0u8; total];
        encode_block(ty, values, &mut out)?;
        return Ok(out);
    }
    let blocks = geom.block_count(values.len())?;
    let total = blocks.checked_mul(geom.block_bytes).ok_or_else(|| {
        CuantizarError::overflow(format!("payload size of {} {} elements", values.len(), geom.name))
    })?;
    let mut out = vec![0u8; total];
    for (chunk, packed) in values
        .chunks(geom.block_elements)
        .zip(out.chunks_exact_mut(geom.block_bytes))
    {
        if chunk.len() == geom.block_elements {
            encode_block(ty, chunk, packed)?;
        } else {
            let mut padded = vec![0.0f32; geom.block_elements];
            padded[..chunk.len()].copy_from_slice(chunk);
            encode_block(ty, &padded, packed)?;
        }
    }
    Ok(out)
}

/// Mean squared error between a tensor and its reconstruction.
///
/// Returns `NaN` when the slices differ in length or are empty, so a
/// bogus comparison can never look like a perfect one.
#[must_use]
pub fn quantization_mse(original: &[f32], dequantized: &[f32]) -> f32 {
    if original.len() != dequantized.len() || original.is_empty() {
        return f32::NAN;
    }
    let sum_sq_error: f64 = original
        .iter()
        .zip(dequantized.iter())
        .map(|(a, b)| f64::from(a - b).powi(2))
        .sum();
    (sum_sq_error / original.len() as f64) as f32
}

/// A packed tensor payload together with its logical shape and scheme.
///
/// Construction validates that the payload is exactly the block-ceiling
/// byte size for the shape, so downstream consumers can index blocks
/// without re-checking lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    ty: TensorType,
    shape: Vec<u64>,
    elements: usize,
    data: Vec<u8>,
}

impl QuantizedTensor {
    /// Wrap an existing packed payload.
    ///
    /// # Errors
    ///
    /// `Overflow` when the shape's element count does not fit,
    /// `DimensionMismatch` for a ragged count on a block-strict scheme,
    /// `CorruptBlock` when the payload length is wrong for the shape.
    pub fn new(ty: TensorType, shape: Vec<u64>, data: Vec<u8>) -> Result<Self> {
        let elements = element_count(&shape)?;
        let geom = ty.geometry();
        let blocks = geom.block_count(elements)?;
        let expected = blocks.checked_mul(geom.block_bytes).ok_or_else(|| {
            CuantizarError::overflow(format!("payload size of {elements} {} elements", geom.name))
        })?;
        expect_bytes(geom.name, expected, &data)?;
        Ok(Self {
            ty,
            shape,
            elements,
            data,
        })
    }

    /// Quantize a float tensor and wrap the result.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` when `values` does not match the shape, plus
    /// everything [`quantize`] can return.
    pub fn from_f32(ty: TensorType, shape: Vec<u64>, values: &[f32]) -> Result<Self> {
        let elements = element_count(&shape)?;
        if values.len() != elements {
            return Err(CuantizarError::DimensionMismatch {
                expected: format!("{elements} elements for shape {shape:?}"),
                actual: values.len().to_string(),
            });
        }
        let data = quantize(ty, values)?;
        Ok(Self {
            ty,
            shape,
            elements,
            data,
        })
    }

    /// Storage scheme of the payload.
    #[must_use]
    pub fn ty(&self) -> TensorType {
        self.ty
    }

    /// Logical tensor shape.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The packed payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Logical element count (product of the shape).
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.elements
    }

    /// Number of packed blocks in the payload.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        let geom = self.ty.geometry();
        self.data.len() / geom.block_bytes
    }

    /// Packed payload size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Ratio of f32 storage to packed storage.
    #[must_use]
    pub fn compression_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 1.0;
        }
        (self.elements * 4) as f32 / self.data.len() as f32
    }

    /// Decode the whole payload back to floats.
    ///
    /// # Errors
    ///
    /// Anything [`dequantize`] can return; with a validated payload this
    /// only fails on byte-size overflow.
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        dequantize(self.ty, &self.data, self.elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BLOCK_SIZE, QK_K};

    #[test]
    fn test_f32_passthrough_bit_exact() {
        let values = [0.0f32, -0.0, 1.5, f32::MAX, f32::MIN_POSITIVE, -1e-40];
        let mut bytes = vec![0u8; values.len() * 4];
        encode_block(TensorType::F32, &values, &mut bytes).expect("encode");
        let mut out = vec![0.0f32; values.len()];
        decode_block(TensorType::F32, &bytes, &mut out).expect("decode");
        for (a, b) in values.iter().zip(out.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_f16_boundary_values_round_trip() {
        // 1.0, 0.0, +inf, -inf, NaN as little-endian f16
        let bytes = [
            0x00, 0x3C, 0x00, 0x00, 0x00, 0x7C, 0x00, 0xFC, 0x00, 0x7E,
        ];
        let mut out = [0.0f32; 5];
        decode_block(TensorType::F16, &bytes, &mut out).expect("decode");
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], 0.0);
        assert_eq!(out[2], f32::INFINITY);
        assert_eq!(out[3], f32::NEG_INFINITY);
        assert!(out[4].is_nan());

        let mut back = [0u8; 10];
        encode_block(TensorType::F16, &out, &mut back).expect("encode");
        assert_eq!(back, bytes);
    }

    #[test]
    fn test_decode_wrong_byte_length_is_corrupt_block() {
        let mut out = [0.0f32; BLOCK_SIZE];
        let err = decode_block(TensorType::Q8_0, &[0u8; 33], &mut out).unwrap_err();
        match err {
            CuantizarError::CorruptBlock {
                type_name,
                expected,
                actual,
            } => {
                assert_eq!(type_name, "Q8_0");
                assert_eq!(expected, 34);
                assert_eq!(actual, 33);
            }
            other => panic!("expected CorruptBlock, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_wrong_out_length_is_dimension_mismatch() {
        let mut out = [0.0f32; 31];
        let err = decode_block(TensorType::Q4_0, &[0u8; 18], &mut out).unwrap_err();
        assert!(matches!(err, CuantizarError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_encode_decode_only_schemes_rejected() {
        let values = [0.0f32; BLOCK_SIZE];
        for ty in [TensorType::Q4_1, TensorType::Q5_0, TensorType::Q5_1] {
            let mut out = vec![0u8; ty.geometry().block_bytes];
            let err = encode_block(ty, &values, &mut out).unwrap_err();
            match err {
                CuantizarError::FormatError { message } => {
                    assert!(message.contains("decode-only"), "message: {message}");
                }
                other => panic!("expected FormatError for {ty:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_only_schemes_still_decode() {
        // Hand-built blocks with zero quants decode without error.
        for ty in [TensorType::Q4_1, TensorType::Q5_0, TensorType::Q5_1] {
            let bytes = vec![0u8; ty.geometry().block_bytes];
            let mut out = [1.0f32; BLOCK_SIZE];
            decode_block(ty, &bytes, &mut out).expect("decode");
        }
    }

    #[test]
    fn test_dequantize_truncates_to_element_count() {
        let values: Vec<f32> = (0..40).map(|i| i as f32 * 0.25).collect();
        let packed = quantize(TensorType::Q8_0, &values).expect("quantize");
        assert_eq!(packed.len(), 2 * 34);
        let decoded = dequantize(TensorType::Q8_0, &packed, 40).expect("dequantize");
        assert_eq!(decoded.len(), 40);
        for (orig, deq) in values.iter().zip(decoded.iter()) {
            assert!((orig - deq).abs() < 0.05, "{orig} vs {deq}");
        }
    }

    #[test]
    fn test_quantize_zero_pads_final_block() {
        let values = vec![4.0f32; 33];
        let packed = quantize(TensorType::Q4_0, &values).expect("quantize");
        assert_eq!(packed.len(), 2 * 18);
        let decoded = dequantize(TensorType::Q4_0, &packed, 64).expect("dequantize");
        // element 33.. are padding and must decode to exactly zero
        for (i, v) in decoded.iter().enumerate().skip(33) {
            assert_eq!(*v, 0.0, "padding element {i} decoded to {v}");
        }
    }

    #[test]
    fn test_quantize_ragged_super_block_rejected() {
        let values = vec![1.0f32; 300];
        for ty in [TensorType::Q4_K, TensorType::Q5_K, TensorType::Q6_K] {
            let err = quantize(ty, &values).unwrap_err();
            assert!(
                matches!(err, CuantizarError::DimensionMismatch { .. }),
                "{ty:?} accepted a ragged element count"
            );
        }
    }

    #[test]
    fn test_dequantize_wrong_payload_length() {
        let err = dequantize(TensorType::Q4_K, &[0u8; 143], QK_K).unwrap_err();
        assert!(matches!(err, CuantizarError::CorruptBlock { .. }));
        let err = dequantize(TensorType::F32, &[0u8; 7], 2).unwrap_err();
        assert!(matches!(err, CuantizarError::CorruptBlock { .. }));
    }

    #[test]
    fn test_quantized_tensor_validates_payload() {
        let ok = QuantizedTensor::new(TensorType::Q8_0, vec![2, 32], vec![0u8; 68]);
        assert!(ok.is_ok());
        let err = QuantizedTensor::new(TensorType::Q8_0, vec![2, 32], vec![0u8; 67]).unwrap_err();
        assert!(matches!(err, CuantizarError::CorruptBlock { .. }));
        let err =
            QuantizedTensor::new(TensorType::Q6_K, vec![10, 30], vec![0u8; 210]).unwrap_err();
        assert!(matches!(err, CuantizarError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_quantized_tensor_round_trip() {
        let values: Vec<f32> = (0..512).map(|i| ((i as f32) * 0.37).sin()).collect();
        let tensor =
            QuantizedTensor::from_f32(TensorType::Q6_K, vec![2, 256], &values).expect("from_f32");
        assert_eq!(tensor.element_count(), 512);
        assert_eq!(tensor.num_blocks(), 2);
        assert_eq!(tensor.size_bytes(), 420);
        let decoded = tensor.to_f32().expect("to_f32");
        assert_eq!(decoded.len(), 512);
        let mse = quantization_mse(&values, &decoded);
        assert!(mse < 1e-3, "Q6_K mse {mse}");
    }

    #[test]
    fn test_quantized_tensor_shape_mismatch() {
        let values = vec![1.0f32; 64];
        let err = QuantizedTensor::from_f32(TensorType::Q8_0, vec![2, 33], &values).unwrap_err();
        assert!(matches!(err, CuantizarError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_compression_ratio() {
        let values = vec![0.5f32; 64];
        let tensor =
            QuantizedTensor::from_f32(TensorType::Q4_0, vec![64], &values).expect("from_f32");
        // 256 f32 bytes over 36 packed bytes
        let ratio = tensor.compression_ratio();
        assert!((ratio - 256.0 / 36.0).abs() < 1e-4, "ratio {ratio}");
    }

    #[test]
    fn test_mse_nan_on_mismatch() {
        assert!(quantization_mse(&[1.0], &[1.0, 2.0]).is_nan());
        assert!(quantization_mse(&[], &[]).is_nan());
        assert_eq!(quantization_mse(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }
}


/// Falsification tests for the block codec (QC series)
#[cfg(test)]
mod tests_falsification_qc {
    use super::*;

    fn relative_error(original: &[f32], decoded: &[f32]) -> f64 {
        let mut total_sq_error = 0.0_f64;
        let mut total_sq_orig = 0.0_f64;
        for (orig, deq) in original.iter().zip(decoded.iter()) {
            total_sq_error += f64::from(orig - deq).powi(2);
            total_sq_orig += f64::from(*orig).powi(2);
        }
        if total_sq_orig > 0.0 {
            (total_sq_error / total_sq_orig).sqrt()
        } else {
            0.0
        }
    }

    /// QC1: Q4_0 round-trip reconstruction error must be <5%
    /// Falsification: error >5% means the codec loses more than 4-bit
    /// quantization inherently costs
    #[test]
    fn test_qc1_q4_0_roundtrip_error_under_5_percent() {
        let values: Vec<f32> = (0..1024)
            .map(|i| {
                let x = (i as f32 - 512.0) / 512.0;
                x * 0.1
            })
            .collect();
        let packed = quantize(TensorType::Q4_0, &values).expect("quantize");
        let decoded = dequantize(TensorType::Q4_0, &packed, 1024).expect("dequantize");
        let err = relative_error(&values, &decoded);
        assert!(
            err < 0.05,
            "QC1 FALSIFIED: Q4_0 relative error {:.2}% exceeds 5% threshold",
            err * 100.0
        );
    }

    /// QC2: Q8_0 round-trip reconstruction error must be <1%
    #[test]
    fn test_qc2_q8_0_roundtrip_error_under_1_percent() {
        let values: Vec<f32> = (0..1024)
            .map(|i| ((i as f32) * 0.013).sin() * 0.2)
            .collect();
        let packed = quantize(TensorType::Q8_0, &values).expect("quantize");
        let decoded = dequantize(TensorType::Q8_0, &packed, 1024).expect("dequantize");
        let err = relative_error(&values, &decoded);
        assert!(
            err < 0.01,
            "QC2 FALSIFIED: Q8_0 relative error {:.3}% exceeds 1% threshold",
            err * 100.0
        );
    }

    /// QC3: encoding must be deterministic across repeated runs
    /// Falsification: same input produces different bytes
    #[test]
    fn test_qc3_encoding_deterministic() {
        let values: Vec<f32> = (0..256).map(|i| (i as f32 - 128.0) * 0.01).collect();
        for ty in [TensorType::Q8_0, TensorType::Q4_K, TensorType::Q6_K] {
            let mut results: Vec<Vec<u8>> = Vec::new();
            for _ in 0..10 {
                results.push(quantize(ty, &values).expect("quantize"));
            }
            let first = &results[0];
            for (i, result) in results.iter().enumerate().skip(1) {
                assert_eq!(
                    first, result,
                    "QC3 FALSIFIED: {ty:?} run {i} differs from run 0"
                );
            }
        }
    }

    /// QC4: a truncated super-block must be rejected, not misread
    /// Falsification: one missing byte silently shifts every later field
    #[test]
    fn test_qc4_truncated_q6_k_block_rejected() {
        let values: Vec<f32> = (0..256).map(|i| (i as f32 * 0.07).cos()).collect();
        let packed = quantize(TensorType::Q6_K, &values).expect("quantize");
        assert_eq!(packed.len(), 210);

        let mut out = [7.0f32; 256];
        let err = decode_block(TensorType::Q6_K, &packed[..209], &mut out).unwrap_err();
        match err {
            CuantizarError::CorruptBlock {
                type_name,
                expected,
                actual,
            } => {
                assert_eq!(type_name, "Q6_K", "QC4 FALSIFIED: wrong scheme name");
                assert_eq!(expected, 210, "QC4 FALSIFIED: wrong expected length");
                assert_eq!(actual, 209, "QC4 FALSIFIED: wrong actual length");
            }
            other => panic!("QC4 FALSIFIED: expected CorruptBlock, got {other:?}"),
        }
        // rejection must happen before any write
        assert!(
            out.iter().all(|&v| v == 7.0),
            "QC4 FALSIFIED: output written despite rejection"
        );
    }

    /// QC5: the block scale must live in the leading f16 field
    /// Falsification: scale stored elsewhere breaks interchange
    #[test]
    fn test_qc5_q8_0_scale_bytes() {
        let values = [127.0f32; 32];
        let packed = quantize(TensorType::Q8_0, &values).expect("quantize");
        // max|v|/127 = 1.0 -> f16 1.0 little-endian
        assert_eq!(
            &packed[0..2],
            &[0x00, 0x3C],
            "QC5 FALSIFIED: Q8_0 scale bytes are {:02x?}",
            &packed[0..2]
        );
        assert!(
            packed[2..34].iter().all(|&q| q as i8 == 127),
            "QC5 FALSIFIED: quant bytes are not saturated at 127"
        );
    }

    /// QC6: K-quant reconstruction must stay within 2% on smooth data
    #[test]
    fn test_qc6_q6_k_roundtrip_error_under_2_percent() {
        let values: Vec<f32> = (0..2048)
            .map(|i| ((i as f32) / 2048.0 - 0.5) * 4.0)
            .collect();
        let packed = quantize(TensorType::Q6_K, &values).expect("quantize");
        let decoded = dequantize(TensorType::Q6_K, &packed, 2048).expect("dequantize");
        let err = relative_error(&values, &decoded);
        assert!(
            err < 0.02,
            "QC6 FALSIFIED: Q6_K relative error {:.3}% exceeds 2% threshold",
            err * 100.0
        );
    }
}
