//! Fused quantized matrix multiply
//!
//! [`matmul_quantized`] multiplies a packed weight tensor against f32
//! activations without materializing the weights: each block is decoded
//! into a local buffer, consumed into the accumulator and discarded, so
//! extra memory stays at one block regardless of tensor size.
//! Accumulation is f32 throughout.
//!
//! Weights are `[rows, k]` row-major; activations are `[k, n_cols]`
//! row-major; the result is `[rows, n_cols]` row-major. The packed
//! payload is a flat element stream, so a row may start mid-block when
//! `k` is not a multiple of the block size; the walker below handles
//! that without any alignment requirement.
//!
//! [`matvec_q4k`] is the hot single-column case with an AVX2 + FMA
//! kernel behind runtime feature detection. The scalar path is the
//! reference; both must agree with the decode-then-multiply baseline
//! within 1e-4 relative tolerance.

use crate::codec::{self, QuantizedTensor};
use crate::error::{CuantizarError, Result};
use crate::registry::{TensorType, QK_K};

#[cfg(target_arch = "x86_64")]
use crate::codec::get_scale_min_k4;

/// Multiply `weights` (`[rows, k]`) by `activations` (`[k, n_cols]`).
///
/// Returns the `[rows, n_cols]` product in row-major order. Streams the
/// payload one block at a time through a 256-slot local buffer. The
/// final block of a 32-element scheme may be zero-padded; only the
/// first `rows * k` decoded values are consumed.
///
/// # Errors
///
/// `DimensionMismatch` when the weight tensor is not 2-D or the
/// activation length is not `k * n_cols`; `Overflow` when the output
/// size does not fit in memory.
pub fn matmul_quantized(
    weights: &QuantizedTensor,
    activations: &[f32],
    n_cols: usize,
) -> Result<Vec<f32>> {
    let (rows, k) = weight_shape(weights)?;
    let expected = k.checked_mul(n_cols).ok_or_else(|| {
        CuantizarError::overflow(format!("activation count {k} x {n_cols}"))
    })?;
    if activations.len() != expected {
        return Err(CuantizarError::DimensionMismatch {
            expected: format!("{expected} activations for k={k}, n_cols={n_cols}"),
            actual: activations.len().to_string(),
        });
    }
    let out_len = rows.checked_mul(n_cols).ok_or_else(|| {
        CuantizarError::overflow(format!("output count {rows} x {n_cols}"))
    })?;

    let ty = weights.ty();
    if n_cols == 1 && ty == TensorType::Q4_K && k > 0 && k % QK_K == 0 {
        return matvec_q4k(weights, activations);
    }

    let mut out = vec![0.0f32; out_len];
    let total = weights.element_count();
    if total == 0 || n_cols == 0 {
        return Ok(out);
    }

    let geom = ty.geometry();
    let data = weights.data();
    let mut buf = [0.0f32; QK_K];

    // float "blocks" are single elements; stream them through the same
    // buffer in 256-element windows instead of one call per value
    let mut row = 0usize;
    let mut ki = 0usize;
    let mut consumed = 0usize;
    let mut offset = 0usize;
    while consumed < total {
        let (decode_elems, take, byte_len) = if geom.block_elements == 1 {
            let n = QK_K.min(total - consumed);
            (n, n, n * geom.block_bytes)
        } else {
            // whole blocks always exist in a validated payload; the last
            // one may extend past `total` with padding
            (
                geom.block_elements,
                geom.block_elements.min(total - consumed),
                geom.block_bytes,
            )
        };
        codec::decode_block(ty, &data[offset..offset + byte_len], &mut buf[..decode_elems])?;

        for &w in &buf[..take] {
            let acts = &activations[ki * n_cols..(ki + 1) * n_cols];
            let outs = &mut out[row * n_cols..(row + 1) * n_cols];
            for (o, a) in outs.iter_mut().zip(acts) {
                *o += w * a;
            }
            ki += 1;
            if ki == k {
                ki = 0;
                row += 1;
            }
        }
        consumed += take;
        offset += byte_len;
    }
    Ok(out)
}

/// Q4_K matrix-vector product: `weights` (`[rows, k]`) times one
/// activation column of length `k`.
///
/// Dispatches to an AVX2 + FMA kernel when the CPU supports it and
/// falls back to the scalar block-streaming path otherwise. Rows must
/// cover whole super-blocks (`k` a positive multiple of 256); shapes
/// that do not qualify go through [`matmul_quantized`], which has no
/// alignment requirement.
///
/// # Errors
///
/// `DimensionMismatch` when the tensor is not Q4_K, not 2-D, `k` is not
/// a positive multiple of 256, or the activation length is not `k`.
#[allow(unsafe_code)]
pub fn matvec_q4k(weights: &QuantizedTensor, activations: &[f32]) -> Result<Vec<f32>> {
    if weights.ty() != TensorType::Q4_K {
        return Err(CuantizarError::DimensionMismatch {
            expected: "Q4_K weights".to_string(),
            actual: weights.ty().name().to_string(),
        });
    }
    let (rows, k) = weight_shape(weights)?;
    if k == 0 || k % QK_K != 0 {
        return Err(CuantizarError::DimensionMismatch {
            expected: "row length that is a positive multiple of 256".to_string(),
            actual: k.to_string(),
        });
    }
    if activations.len() != k {
        return Err(CuantizarError::DimensionMismatch {
            expected: format!("{k} activations"),
            actual: activations.len().to_string(),
        });
    }

    let row_bytes = (k / QK_K) * 144;
    let data = weights.data();
    let mut out = Vec::with_capacity(rows);

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            for row in data.chunks_exact(row_bytes) {
                // SAFETY: AVX2 and FMA availability was just verified on
                // this CPU; slice lengths were validated above.
                out.push(unsafe { q4k_dot_avx2(row, activations) });
            }
            return Ok(out);
        }
    }

    for row in data.chunks_exact(row_bytes) {
        out.push(q4k_dot_scalar(row, activations)?);
    }
    Ok(out)
}

/// Reference fused dot product for one Q4_K row.
fn q4k_dot_scalar(row: &[u8], activations: &[f32]) -> Result<f32> {
    let mut buf = [0.0f32; QK_K];
    let mut acc = 0.0f32;
    for (sb, block) in row.chunks_exact(144).enumerate() {
        codec::decode_block(TensorType::Q4_K, block, &mut buf)?;
        let acts = &activations[sb * QK_K..(sb + 1) * QK_K];
        for (w, a) in buf.iter().zip(acts) {
            acc += w * a;
        }
    }
    Ok(acc)
}

/// AVX2 + FMA fused dot product for one Q4_K row.
///
/// Walks the same 64-value groups as the scalar decoder: the 32 packed
/// bytes of a group hold low nibbles for the first 32 values and high
/// nibbles for the second 32. Four accumulators hide FMA latency; the
/// horizontal sum happens once at the end.
///
/// # Safety
///
/// Caller must verify AVX2 and FMA support and pass `row` of whole
/// 144-byte super-blocks with `activations` covering every value.
#[cfg(target_arch = "x86_64")]
#[allow(unsafe_code)]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn q4k_dot_avx2(row: &[u8], activations: &[f32]) -> f32 {
    #[allow(clippy::wildcard_imports)]
    use std::arch::x86_64::*;

    let mut acc = [_mm256_setzero_ps(); 4];
    let nibble_mask = _mm_set1_epi8(0x0F);

    for (sb, block) in row.chunks_exact(144).enumerate() {
        let d = read_f16(block, 0);
        let dmin = read_f16(block, 2);
        let scales = &block[4..16];
        let qs = &block[16..144];
        let base = sb * QK_K;

        let mut is = 0;
        for j in (0..QK_K).step_by(64) {
            let q = &qs[j / 2..j / 2 + 32];
            let (sc, m) = get_scale_min_k4(is, scales);
            let d1 = _mm256_set1_ps(d * f32::from(sc));
            let m1 = _mm256_set1_ps(dmin * f32::from(m));
            let (sc, m) = get_scale_min_k4(is + 1, scales);
            let d2 = _mm256_set1_ps(d * f32::from(sc));
            let m2 = _mm256_set1_ps(dmin * f32::from(m));

            for l in (0..32).step_by(8) {
                // SAFETY: q holds 32 bytes and l <= 24, so the 8-byte
                // load stays in bounds; the activation loads end at
                // base + j + 32 + l + 8 <= row length, validated by the
                // caller.
                let (w_lo, w_hi, a_lo, a_hi) = unsafe {
                    let packed = _mm_loadl_epi64(q.as_ptr().add(l).cast());
                    let lo = _mm256_cvtepi32_ps(_mm256_cvtepu8_epi32(_mm_and_si128(
                        packed,
                        nibble_mask,
                    )));
                    let hi = _mm256_cvtepi32_ps(_mm256_cvtepu8_epi32(_mm_and_si128(
                        _mm_srli_epi16::<4>(packed),
                        nibble_mask,
                    )));
                    (
                        _mm256_fmsub_ps(d1, lo, m1),
                        _mm256_fmsub_ps(d2, hi, m2),
                        _mm256_loadu_ps(activations.as_ptr().add(base + j + l)),
                        _mm256_loadu_ps(activations.as_ptr().add(base + j + 32 + l)),
                    )
                };
                let lane = (l / 8) & 1;
                acc[lane] = _mm256_fmadd_ps(w_lo, a_lo, acc[lane]);
                acc[lane + 2] = _mm256_fmadd_ps(w_hi, a_hi, acc[lane + 2]);
            }
            is += 2;
        }
    }

    // reduce 4 accumulators, then 8 lanes, to one f32
    let sum = _mm256_add_ps(_mm256_add_ps(acc[0], acc[1]), _mm256_add_ps(acc[2], acc[3]));
    let halves = _mm_add_ps(_mm256_castps256_ps128(sum), _mm256_extractf128_ps::<1>(sum));
    let quad = _mm_add_ps(halves, _mm_movehl_ps(halves, halves));
    let pair = _mm_add_ss(quad, _mm_shuffle_ps::<1>(quad, quad));
    _mm_cvtss_f32(pair)
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn read_f16(bytes: &[u8], offset: usize) -> f32 {
    half::f16::from_le_bytes([bytes[offset], bytes[offset + 1]]).to_f32()
}

fn weight_shape(weights: &QuantizedTensor) -> Result<(usize, usize)> {
    let dims = weights.shape();
    if dims.len() != 2 {
        return Err(CuantizarError::DimensionMismatch {
            expected: "2-D weight tensor [rows, k]".to_string(),
            actual: format!("{} dimensions {:?}", dims.len(), dims),
        });
    }
    let rows = usize::try_from(dims[0])
        .map_err(|_| CuantizarError::overflow(format!("row count {}", dims[0])))?;
    let k = usize::try_from(dims[1])
        .map_err(|_| CuantizarError::overflow(format!("row length {}", dims[1])))?;
    Ok((rows, k))
}
