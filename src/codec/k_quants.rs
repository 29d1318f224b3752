//! K-quant super-block schemes: Q4_K, Q5_K, Q6_K.
//!
//! A super-block packs 256 values. Q4_K and Q5_K carry two f16
//! super-scalars (`d`, `dmin`) and a 12-byte field of eight 6-bit
//! sub-scales plus eight 6-bit sub-mins for the eight 32-value sub-blocks;
//! Q6_K carries sixteen signed i8 sub-scales and a single f16 `d`.
//!
//! The 12-byte scale/min field uses a split layout: entries 0..4 live in
//! the low 6 bits of the first eight bytes, entries 4..8 are nibbles of
//! the last four bytes with their top two bits spilled into bits 6..8 of
//! the first eight. [`get_scale_min_k4`] is the exact unpacking rule and
//! the encoders write its exact inverse.
//!
//! Quantization follows the reference fits: an iterative affine fit per
//! 32-value sub-block (`make_qkx1_quants`) for the scale+min schemes and a
//! weighted symmetric fit per 16-value sub-block (`make_qx_quants`) for
//! Q6_K, each followed by 6-bit (resp. 8-bit) normalization of the
//! sub-scales and a requantization pass against the f16-rounded
//! super-scale.
//!
//! Callers validate slice lengths before dispatching here.

use crate::registry::QK_K;
use half::f16;

/// Round to nearest integer, halfway cases to even.
///
/// The bit trick matches the reference quantizers exactly, which matters
/// for byte-for-byte deterministic output. Valid for |value| < 2^22.
#[inline]
pub(crate) fn nearest_int(value: f32) -> i32 {
    debug_assert!(value.abs() <= 4_194_303.0);
    let shifted = value + 12_582_912.0;
    let bits = shifted.to_bits() as i32;
    (bits & 0x007f_ffff) - 0x0040_0000
}

/// Unpack the 6-bit (scale, min) pair for sub-block `j` from the packed
/// 12-byte field.
#[inline]
pub(crate) fn get_scale_min_k4(j: usize, scales: &[u8]) -> (u8, u8) {
    debug_assert!(j < 8);
    debug_assert_eq!(scales.len(), 12);
    if j < 4 {
        (scales[j] & 63, scales[j + 4] & 63)
    } else {
        let sc = (scales[j + 4] & 0x0F) | ((scales[j - 4] >> 6) << 4);
        let m = (scales[j + 4] >> 4) | ((scales[j] >> 6) << 4);
        (sc, m)
    }
}

/// Pack a 6-bit (scale, min) pair for sub-block `j` into the 12-byte
/// field. Exact inverse of [`get_scale_min_k4`]; the field must start
/// zeroed because entries 4..8 OR their high bits into earlier bytes.
#[inline]
fn set_scale_min_k4(j: usize, scales: &mut [u8], ls: u8, lm: u8) {
    debug_assert!(j < 8);
    debug_assert!(ls < 64 && lm < 64);
    if j < 4 {
        scales[j] = ls;
        scales[j + 4] = lm;
    } else {
        scales[j + 4] = (ls & 0x0F) | ((lm & 0x0F) << 4);
        scales[j - 4] |= (ls >> 4) << 6;
        scales[j] |= (lm >> 4) << 6;
    }
}

/// Iterative affine fit of a sub-block onto `0..=nmax` levels.
///
/// Returns `(scale, min)` with `min >= 0` (the stored min is negated so
/// dequantization subtracts it). Writes the chosen levels into `levels`,
/// which later passes may overwrite. `ntry` bounds the refinement rounds;
/// iteration stops early once the level assignment is stable.
fn make_qkx1_quants(nmax: i32, ntry: usize, x: &[f32], levels: &mut [u8]) -> (f32, f32) {
    debug_assert_eq!(x.len(), levels.len());
    let n = x.len();

    let mut min = x[0];
    let mut max = x[0];
    for &v in &x[1..] {
        min = min.min(v);
        max = max.max(v);
    }
    if max == min {
        levels.fill(0);
        return (0.0, 0.0);
    }
    if min > 0.0 {
        min = 0.0;
    }

    let mut iscale = nmax as f32 / (max - min);
    let mut scale = 1.0 / iscale;
    for _ in 0..ntry {
        let mut sumlx = 0.0f32;
        let mut suml2 = 0i32;
        let mut did_change = false;
        for (i, &v) in x.iter().enumerate() {
            let l = nearest_int(iscale * (v - min)).clamp(0, nmax);
            if l as u8 != levels[i] {
                levels[i] = l as u8;
                did_change = true;
            }
            sumlx += (v - min) * l as f32;
            suml2 += l * l;
        }
        scale = sumlx / suml2 as f32;
        let sum: f32 = x
            .iter()
            .zip(levels.iter())
            .map(|(&v, &l)| v - scale * f32::from(l))
            .sum();
        min = sum / n as f32;
        if min > 0.0 {
            min = 0.0;
        }
        iscale = 1.0 / scale;
        if !did_change {
            break;
        }
    }
    (scale, -min)
}

/// Weighted symmetric fit of a sub-block onto `-nmax..nmax` levels, weight
/// x^2, with a small grid search around the initial inverse scale.
///
/// Returns the fitted scale and writes levels biased by `+nmax` into
/// `levels`.
fn make_qx_quants(nmax: i32, x: &[f32], levels: &mut [u8]) -> f32 {
    debug_assert_eq!(x.len(), levels.len());

    let mut max = 0.0f32;
    let mut amax = 0.0f32;
    for &v in x {
        let a = v.abs();
        if a > amax {
            amax = a;
            max = v;
        }
    }
    if amax == 0.0 {
        levels.fill(0);
        return 0.0;
    }

    let iscale = -(nmax as f32) / max;
    let mut sumlx = 0.0f32;
    let mut suml2 = 0.0f32;
    for (i, &v) in x.iter().enumerate() {
        let l = nearest_int(iscale * v).clamp(-nmax, nmax - 1);
        levels[i] = (l + nmax) as u8;
        let w = v * v;
        sumlx += w * v * l as f32;
        suml2 += w * (l * l) as f32;
    }
    let mut scale = sumlx / suml2;
    let mut best = scale * sumlx;
    for step in -9i32..=9 {
        if step == 0 {
            continue;
        }
        let iscale_try = -(nmax as f32 + 0.1 * step as f32) / max;
        let mut sumlx_try = 0.0f32;
        let mut suml2_try = 0.0f32;
        for &v in x {
            let l = nearest_int(iscale_try * v).clamp(-nmax, nmax - 1);
            let w = v * v;
            sumlx_try += w * v * l as f32;
            suml2_try += w * (l * l) as f32;
        }
        if suml2_try > 0.0 && sumlx_try * sumlx_try > best * suml2_try {
            for (i, &v) in x.iter().enumerate() {
                let l = nearest_int(iscale_try * v).clamp(-nmax, nmax - 1);
                levels[i] = (l + nmax) as u8;
            }
            scale = sumlx_try / suml2_try;
            best = scale * sumlx_try;
        }
    }
    scale
}

#[inline]
fn read_f16(bytes: &[u8], offset: usize) -> f32 {
    f16::from_le_bytes([bytes[offset], bytes[offset + 1]]).to_f32()
}

// ============================================================================
// Q4_K: 144 bytes = d (f16) + dmin (f16) + scales[12] + qs[128]
// ============================================================================

pub(crate) fn decode_q4_k(bytes: &[u8], out: &mut [f32]) {
    debug_assert_eq!(bytes.len(), 144);
    debug_assert_eq!(out.len(), QK_K);

    let d = read_f16(bytes, 0);
    let dmin = read_f16(bytes, 2);
    let scales = &bytes[4..16];
    let qs = &bytes[16..144];

    let mut is = 0;
    for j in (0..QK_K).step_by(64) {
        let q = &qs[j / 2..j / 2 + 32];
        let (sc, m) = get_scale_min_k4(is, scales);
        let d1 = d * f32::from(sc);
        let m1 = dmin * f32::from(m);
        let (sc, m) = get_scale_min_k4(is + 1, scales);
        let d2 = d * f32::from(sc);
        let m2 = dmin * f32::from(m);
        for l in 0..32 {
            out[j + l] = d1 * f32::from(q[l] & 0x0F) - m1;
            out[j + l + 32] = d2 * f32::from(q[l] >> 4) - m2;
        }
        is += 2;
    }
}

pub(crate) fn encode_q4_k(x: &[f32], out: &mut [u8]) {
    debug_assert_eq!(x.len(), QK_K);
    debug_assert_eq!(out.len(), 144);
    out.fill(0);

    let mut levels = [0u8; QK_K];
    let mut scales = [0.0f32; 8];
    let mut mins = [0.0f32; 8];
    for j in 0..8 {
        let (sc, mn) =
            make_qkx1_quants(15, 5, &x[32 * j..32 * (j + 1)], &mut levels[32 * j..32 * (j + 1)]);
        scales[j] = sc;
        mins[j] = mn;
    }

    let max_scale = scales.iter().fold(0.0f32, |a, &b| a.max(b));
    let max_min = mins.iter().fold(0.0f32, |a, &b| a.max(b));
    let inv_scale = if max_scale > 0.0 { 63.0 / max_scale } else { 0.0 };
    let inv_min = if max_min > 0.0 { 63.0 / max_min } else { 0.0 };
    {
        let packed = &mut out[4..16];
        for j in 0..8 {
            let ls = nearest_int(inv_scale * scales[j]).min(63) as u8;
            let lm = nearest_int(inv_min * mins[j]).min(63) as u8;
            set_scale_min_k4(j, packed, ls, lm);
        }
    }

    let d = f16::from_f32(max_scale / 63.0);
    let dmin = f16::from_f32(max_min / 63.0);
    out[0..2].copy_from_slice(&d.to_le_bytes());
    out[2..4].copy_from_slice(&dmin.to_le_bytes());

    // Requantize against the f16-rounded super-scales so decode sees the
    // same numbers the fit saw.
    let d = d.to_f32();
    let dmin = dmin.to_f32();
    for j in 0..8 {
        let (sc, m) = get_scale_min_k4(j, &out[4..16]);
        let dq = d * f32::from(sc);
        if dq == 0.0 {
            continue;
        }
        let dm = dmin * f32::from(m);
        for ii in 0..32 {
            let l = nearest_int((x[32 * j + ii] + dm) / dq).clamp(0, 15);
            levels[32 * j + ii] = l as u8;
        }
    }

    let qs = &mut out[16..144];
    for j in (0..QK_K).step_by(64) {
        for l in 0..32 {
            qs[j / 2 + l] = levels[j + l] | (levels[j + l + 32] << 4);
        }
    }
}

// ============================================================================
// Q5_K: 176 bytes = d + dmin + scales[12] + qh[32] + qs[128]
// ============================================================================

pub(crate) fn decode_q5_k(bytes: &[u8], out: &mut [f32]) {
    debug_assert_eq!(bytes.len(), 176);
    debug_assert_eq!(out.len(), QK_K);

    let d = read_f16(bytes, 0);
    let dmin = read_f16(bytes, 2);
    let scales = &bytes[4..16];
    let qh = &bytes[16..48];
    let qs = &bytes[48..176];

    let mut is = 0;
    let mut u1: u8 = 1;
    let mut u2: u8 = 2;
    for j in (0..QK_K).step_by(64) {
        let ql = &qs[j / 2..j / 2 + 32];
        let (sc, m) = get_scale_min_k4(is, scales);
        let d1 = d * f32::from(sc);
        let m1 = dmin * f32::from(m);
        let (sc, m) = get_scale_min_k4(is + 1, scales);
        let d2 = d * f32::from(sc);
        let m2 = dmin * f32::from(m);
        for l in 0..32 {
            let hi1 = if qh[l] & u1 != 0 { 16 } else { 0 };
            let hi2 = if qh[l] & u2 != 0 { 16 } else { 0 };
            out[j + l] = d1 * f32::from((ql[l] & 0x0F) + hi1) - m1;
            out[j + l + 32] = d2 * f32::from((ql[l] >> 4) + hi2) - m2;
        }
        is += 2;
        u1 <<= 2;
        u2 <<= 2;
    }
}

pub(crate) fn encode_q5_k(x: &[f32], out: &mut [u8]) {
    debug_assert_eq!(x.len(), QK_K);
    debug_assert_eq!(out.len(), 176);
    out.fill(0);

    let mut levels = [0u8; QK_K];
    let mut scales = [0.0f32; 8];
    let mut mins = [0.0f32; 8];
    for j in 0..8 {
        let (sc, mn) =
            make_qkx1_quants(31, 5, &x[32 * j..32 * (j + 1)], &mut levels[32 * j..32 * (j + 1)]);
        scales[j] = sc;
        mins[j] = mn;
    }

    let max_scale = scales.iter().fold(0.0f32, |a, &b| a.max(b));
    let max_min = mins.iter().fold(0.0f32, |a, &b| a.max(b));
    let inv_scale = if max_scale > 0.0 { 63.0 / max_scale } else { 0.0 };
    let inv_min = if max_min > 0.0 { 63.0 / max_min } else { 0.0 };
    {
        let packed = &mut out[4..16];
        for j in 0..8 {
            let ls = nearest_int(inv_scale * scales[j]).min(63) as u8;
            let lm = nearest_int(inv_min * mins[j]).min(63) as u8;
            set_scale_min_k4(j, packed, ls, lm);
        }
    }

    let d = f16::from_f32(max_scale / 63.0);
    let dmin = f16::from_f32(max_min / 63.0);
    out[0..2].copy_from_slice(&d.to_le_bytes());
    out[2..4].copy_from_slice(&dmin.to_le_bytes());

    let d = d.to_f32();
    let dmin = dmin.to_f32();
    for j in 0..8 {
        let (sc, m) = get_scale_min_k4(j, &out[4..16]);
        let dq = d * f32::from(sc);
        if dq == 0.0 {
            continue;
        }
        let dm = dmin * f32::from(m);
        for ii in 0..32 {
            let l = nearest_int((x[32 * j + ii] + dm) / dq).clamp(0, 31);
            levels[32 * j + ii] = l as u8;
        }
    }

    // Split each 5-bit level into a nibble plus one bit of qh. Chunk j of
    // 64 owns bit pair (2j, 2j+1) of every qh byte.
    let (head, qs) = out.split_at_mut(48);
    let qh = &mut head[16..48];
    let mut m1: u8 = 1;
    let mut m2: u8 = 2;
    for j in (0..QK_K).step_by(64) {
        for l in 0..32 {
            let mut l1 = levels[j + l];
            if l1 > 15 {
                l1 -= 16;
                qh[l] |= m1;
            }
            let mut l2 = levels[j + l + 32];
            if l2 > 15 {
                l2 -= 16;
                qh[l] |= m2;
            }
            qs[j / 2 + l] = l1 | (l2 << 4);
        }
        m1 <<= 2;
        m2 <<= 2;
    }
}

// ============================================================================
// Q6_K: 210 bytes = ql[128] + qh[64] + scales[16 × i8] + d (f16)
// ============================================================================

pub(crate) fn decode_q6_k(bytes: &[u8], out: &mut [f32]) {
    debug_assert_eq!(bytes.len(), 210);
    debug_assert_eq!(out.len(), QK_K);

    let ql = &bytes[0..128];
    let qh = &bytes[128..192];
    let scales = &bytes[192..208];
    let d = read_f16(bytes, 208);

    // Two 128-value halves; within a half, four 32-value quadrants share
    // the same ql/qh bytes at different bit positions.
    for n in (0..QK_K).step_by(128) {
        let ql = &ql[n / 2..n / 2 + 64];
        let qh = &qh[n / 4..n / 4 + 32];
        let sc = &scales[n / 16..n / 16 + 8];
        for l in 0..32 {
            let is = l / 16;
            let q1 = i32::from((ql[l] & 0x0F) | ((qh[l] & 3) << 4)) - 32;
            let q2 = i32::from((ql[l + 32] & 0x0F) | (((qh[l] >> 2) & 3) << 4)) - 32;
            let q3 = i32::from((ql[l] >> 4) | (((qh[l] >> 4) & 3) << 4)) - 32;
            let q4 = i32::from((ql[l + 32] >> 4) | (((qh[l] >> 6) & 3) << 4)) - 32;
            out[n + l] = d * f32::from(sc[is] as i8) * q1 as f32;
            out[n + l + 32] = d * f32::from(sc[is + 2] as i8) * q2 as f32;
            out[n + l + 64] = d * f32::from(sc[is + 4] as i8) * q3 as f32;
            out[n + l + 96] = d * f32::from(sc[is + 6] as i8) * q4 as f32;
        }
    }
}

pub(crate) fn encode_q6_k(x: &[f32], out: &mut [u8]) {
    debug_assert_eq!(x.len(), QK_K);
    debug_assert_eq!(out.len(), 210);
    out.fill(0);

    let mut levels = [0u8; QK_K];
    let mut scales = [0.0f32; 16];
    let mut max_abs_scale = 0.0f32;
    let mut max_scale = 0.0f32;
    for ib in 0..16 {
        let scale = make_qx_quants(32, &x[16 * ib..16 * (ib + 1)], &mut levels[16 * ib..16 * (ib + 1)]);
        scales[ib] = scale;
        let abs_scale = scale.abs();
        if abs_scale > max_abs_scale {
            max_abs_scale = abs_scale;
            max_scale = scale;
        }
    }

    if max_abs_scale == 0.0 {
        // All-zero super-block: d = 0, everything else stays zeroed.
        return;
    }

    let iscale = -128.0 / max_scale;
    let d = f16::from_f32(1.0 / iscale);
    out[208..210].copy_from_slice(&d.to_le_bytes());
    for ib in 0..16 {
        out[192 + ib] = nearest_int(iscale * scales[ib]).min(127) as i8 as u8;
    }

    let d = d.to_f32();
    for ib in 0..16 {
        let dq = d * f32::from(out[192 + ib] as i8);
        if dq == 0.0 {
            continue;
        }
        for ii in 0..16 {
            let l = nearest_int(x[16 * ib + ii] / dq).clamp(-32, 31);
            levels[16 * ib + ii] = (l + 32) as u8;
        }
    }

    for j in (0..QK_K).step_by(128) {
        for l in 0..32 {
            let q1 = levels[j + l] & 0x0F;
            let q2 = levels[j + l + 32] & 0x0F;
            let q3 = levels[j + l + 64] & 0x0F;
            let q4 = levels[j + l + 96] & 0x0F;
            out[j / 2 + l] = q1 | (q3 << 4);
            out[j / 2 + l + 32] = q2 | (q4 << 4);
            out[128 + j / 4 + l] = (levels[j + l] >> 4)
                | ((levels[j + l + 32] >> 4) << 2)
                | ((levels[j + l + 64] >> 4) << 4)
                | ((levels[j + l + 96] >> 4) << 6);
        }
    }
}
