//! Uniform 32-element block schemes: Q4_0, Q4_1, Q5_0, Q5_1, Q8_0.
//!
//! Every scheme here carries one f16 scale (and, for the affine variants,
//! one f16 min) per 32-element block. Nibble packing follows the canonical
//! GGML layout: byte `i` of a nibble field holds value `i` in its low
//! nibble and value `i + 16` in its high nibble, so the two halves of a
//! block interleave rather than sit adjacent.
//!
//! Callers validate slice lengths before dispatching here; these functions
//! assume exact block-sized views.

use crate::registry::BLOCK_SIZE;
use half::f16;

/// Read the leading f16 scalar of a block.
#[inline]
fn read_f16(bytes: &[u8], offset: usize) -> f32 {
    f16::from_le_bytes([bytes[offset], bytes[offset + 1]]).to_f32()
}

// ============================================================================
// Q8_0: 34 bytes = f16 scale + 32 × i8
// ============================================================================

pub(crate) fn decode_q8_0(bytes: &[u8], out: &mut [f32]) {
    debug_assert_eq!(bytes.len(), 34);
    debug_assert_eq!(out.len(), BLOCK_SIZE);

    let scale = read_f16(bytes, 0);
    for (i, value) in out.iter_mut().enumerate() {
        let q = bytes[2 + i] as i8;
        *value = f32::from(q) * scale;
    }
}

pub(crate) fn encode_q8_0(values: &[f32], out: &mut [u8]) {
    debug_assert_eq!(values.len(), BLOCK_SIZE);
    debug_assert_eq!(out.len(), 34);

    let max_abs = values.iter().map(|x| x.abs()).fold(0.0_f32, f32::max);
    let scale = if max_abs > 0.0 { max_abs / 127.0 } else { 1.0 };
    let inv_scale = 1.0 / scale;

    out[0..2].copy_from_slice(&f16::from_f32(scale).to_le_bytes());
    for (i, &val) in values.iter().enumerate() {
        let q = (val * inv_scale).round().clamp(-127.0, 127.0) as i8;
        out[2 + i] = q as u8;
    }
}

// ============================================================================
// Q4_0: 18 bytes = f16 scale + 16 nibble bytes
// ============================================================================

pub(crate) fn decode_q4_0(bytes: &[u8], out: &mut [f32]) {
    debug_assert_eq!(bytes.len(), 18);
    debug_assert_eq!(out.len(), BLOCK_SIZE);

    let scale = read_f16(bytes, 0);
    for i in 0..16 {
        let packed = bytes[2 + i];
        let lo = (packed & 0x0F) as i8 - 8;
        let hi = (packed >> 4) as i8 - 8;
        out[i] = f32::from(lo) * scale;
        out[i + 16] = f32::from(hi) * scale;
    }
}

pub(crate) fn encode_q4_0(values: &[f32], out: &mut [u8]) {
    debug_assert_eq!(values.len(), BLOCK_SIZE);
    debug_assert_eq!(out.len(), 18);

    let max_abs = values.iter().map(|x| x.abs()).fold(0.0_f32, f32::max);
    // Signed 4-bit range is -8..=7; the symmetric policy divides by 7 so
    // the extremes land on representable levels in both directions.
    let scale = if max_abs > 0.0 { max_abs / 7.0 } else { 1.0 };
    let inv_scale = 1.0 / scale;

    out[0..2].copy_from_slice(&f16::from_f32(scale).to_le_bytes());
    for i in 0..16 {
        let lo = ((values[i] * inv_scale).round().clamp(-8.0, 7.0) as i8 + 8) as u8;
        let hi = ((values[i + 16] * inv_scale).round().clamp(-8.0, 7.0) as i8 + 8) as u8;
        out[2 + i] = (lo & 0x0F) | ((hi & 0x0F) << 4);
    }
}

// ============================================================================
// Q4_1: 20 bytes = f16 scale + f16 min + 16 nibble bytes (decode only)
// ============================================================================

pub(crate) fn decode_q4_1(bytes: &[u8], out: &mut [f32]) {
    debug_assert_eq!(bytes.len(), 20);
    debug_assert_eq!(out.len(), BLOCK_SIZE);

    let scale = read_f16(bytes, 0);
    let min = read_f16(bytes, 2);
    for i in 0..16 {
        let packed = bytes[4 + i];
        out[i] = f32::from(packed & 0x0F) * scale + min;
        out[i + 16] = f32::from(packed >> 4) * scale + min;
    }
}

// ============================================================================
// Q5_0: 22 bytes = f16 scale + 4 high-bit bytes + 16 nibble bytes
// (decode only)
// ============================================================================

pub(crate) fn decode_q5_0(bytes: &[u8], out: &mut [f32]) {
    debug_assert_eq!(bytes.len(), 22);
    debug_assert_eq!(out.len(), BLOCK_SIZE);

    let scale = read_f16(bytes, 0);
    let qh = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    for i in 0..16 {
        let packed = bytes[6 + i];
        // Bit i of qh is the fifth bit of value i; bit i + 16 belongs to
        // value i + 16.
        let xh_0 = (((qh >> i) << 4) & 0x10) as u8;
        let xh_1 = ((qh >> (i + 12)) & 0x10) as u8;
        let x0 = i32::from((packed & 0x0F) | xh_0) - 16;
        let x1 = i32::from((packed >> 4) | xh_1) - 16;
        out[i] = x0 as f32 * scale;
        out[i + 16] = x1 as f32 * scale;
    }
}

// ============================================================================
// Q5_1: 24 bytes = f16 scale + f16 min + 4 high-bit bytes + 16 nibble bytes
// (decode only)
// ============================================================================

pub(crate) fn decode_q5_1(bytes: &[u8], out: &mut [f32]) {
    debug_assert_eq!(bytes.len(), 24);
    debug_assert_eq!(out.len(), BLOCK_SIZE);

    let scale = read_f16(bytes, 0);
    let min = read_f16(bytes, 2);
    let qh = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    for i in 0..16 {
        let packed = bytes[8 + i];
        let xh_0 = (((qh >> i) << 4) & 0x10) as u8;
        let xh_1 = ((qh >> (i + 12)) & 0x10) as u8;
        let x0 = (packed & 0x0F) | xh_0;
        let x1 = (packed >> 4) | xh_1;
        out[i] = f32::from(x0) * scale + min;
        out[i + 16] = f32::from(x1) * scale + min;
    }
}
