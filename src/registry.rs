//! Quantization format registry
//!
//! The immutable geometry table: one [`FormatGeometry`] per storage type,
//! covering block size, packed byte layout, sub-block structure, and
//! scale/min field widths. [`FormatRegistry::new`] builds the table once;
//! callers pass it by reference wherever sizes must be derived from
//! shapes. There is no global mutable state.
//!
//! Type tags are the canonical GGML numbering, so containers written by
//! mainstream tooling resolve to the same schemes.

use crate::error::{CuantizarError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Elements per block for the 32-element uniform schemes.
pub const BLOCK_SIZE: usize = 32;

/// Elements per super-block for the K-quant schemes.
pub const QK_K: usize = 256;

/// Storage type of a tensor: float passthrough or one of the
/// block-quantization schemes.
///
/// The discriminants are the canonical on-disk type tags.
#[allow(non_camel_case_types)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u32)]
pub enum TensorType {
    /// 32-bit float, no quantization
    F32 = 0,
    /// 16-bit float, no quantization
    F16 = 1,
    /// 4-bit symmetric, 32-element blocks, f16 scale
    Q4_0 = 2,
    /// 4-bit affine, 32-element blocks, f16 scale + f16 min
    Q4_1 = 3,
    /// 5-bit symmetric, 32-element blocks, f16 scale + packed high bits
    Q5_0 = 6,
    /// 5-bit affine, 32-element blocks, f16 scale + f16 min + high bits
    Q5_1 = 7,
    /// 8-bit symmetric, 32-element blocks, f16 scale
    Q8_0 = 8,
    /// 4-bit super-block of 256, eight sub-blocks with 6-bit scale/min
    Q4_K = 12,
    /// 5-bit super-block of 256, eight sub-blocks with 6-bit scale/min
    Q5_K = 13,
    /// 6-bit super-block of 256, sixteen sub-blocks with i8 scales
    Q6_K = 14,
}

/// Every supported type, in tag order. Iteration source for the registry.
pub const ALL_TENSOR_TYPES: [TensorType; 10] = [
    TensorType::F32,
    TensorType::F16,
    TensorType::Q4_0,
    TensorType::Q4_1,
    TensorType::Q5_0,
    TensorType::Q5_1,
    TensorType::Q8_0,
    TensorType::Q4_K,
    TensorType::Q5_K,
    TensorType::Q6_K,
];

impl TensorType {
    /// Resolve a raw container type tag. Unknown tags return `None` and
    /// surface as `UnsupportedType` at the call site.
    #[must_use]
    pub fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::F32),
            1 => Some(Self::F16),
            2 => Some(Self::Q4_0),
            3 => Some(Self::Q4_1),
            6 => Some(Self::Q5_0),
            7 => Some(Self::Q5_1),
            8 => Some(Self::Q8_0),
            12 => Some(Self::Q4_K),
            13 => Some(Self::Q5_K),
            14 => Some(Self::Q6_K),
            _ => None,
        }
    }

    /// The on-disk type tag.
    #[must_use]
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Scheme name as written in diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.geometry().name
    }

    /// True for the block-quantized schemes (everything except the float
    /// passthrough types).
    #[must_use]
    pub fn is_quantized(self) -> bool {
        !matches!(self, Self::F32 | Self::F16)
    }

    /// Effective storage cost per weight.
    #[must_use]
    pub fn bits_per_weight(self) -> f32 {
        let geom = self.geometry();
        (geom.block_bytes as f32 * 8.0) / geom.block_elements as f32
    }

    /// The fixed geometry for this type.
    #[must_use]
    pub const fn geometry(self) -> FormatGeometry {
        match self {
            Self::F32 => FormatGeometry {
                name: "F32",
                block_elements: 1,
                block_bytes: 4,
                sub_blocks: 1,
                scale_bits: 0,
                min_bits: 0,
                block_strict: false,
            },
            Self::F16 => FormatGeometry {
                name: "F16",
                block_elements: 1,
                block_bytes: 2,
                sub_blocks: 1,
                scale_bits: 0,
                min_bits: 0,
                block_strict: false,
            },
            Self::Q4_0 => FormatGeometry {
                name: "Q4_0",
                block_elements: BLOCK_SIZE,
                block_bytes: 18,
                sub_blocks: 1,
                scale_bits: 16,
                min_bits: 0,
                block_strict: false,
            },
            Self::Q4_1 => FormatGeometry {
                name: "Q4_1",
                block_elements: BLOCK_SIZE,
                block_bytes: 20,
                sub_blocks: 1,
                scale_bits: 16,
                min_bits: 16,
                block_strict: false,
            },
            Self::Q5_0 => FormatGeometry {
                name: "Q5_0",
                block_elements: BLOCK_SIZE,
                block_bytes: 22,
                sub_blocks: 1,
                scale_bits: 16,
                min_bits: 0,
                block_strict: false,
            },
            Self::Q5_1 => FormatGeometry {
                name: "Q5_1",
                block_elements: BLOCK_SIZE,
                block_bytes: 24,
                sub_blocks: 1,
                scale_bits: 16,
                min_bits: 16,
                block_strict: false,
            },
            Self::Q8_0 => FormatGeometry {
                name: "Q8_0",
                block_elements: BLOCK_SIZE,
                block_bytes: 34,
                sub_blocks: 1,
                scale_bits: 16,
                min_bits: 0,
                block_strict: false,
            },
            Self::Q4_K => FormatGeometry {
                name: "Q4_K",
                block_elements: QK_K,
                block_bytes: 144,
                sub_blocks: 8,
                scale_bits: 6,
                min_bits: 6,
                block_strict: true,
            },
            Self::Q5_K => FormatGeometry {
                name: "Q5_K",
                block_elements: QK_K,
                block_bytes: 176,
                sub_blocks: 8,
                scale_bits: 6,
                min_bits: 6,
                block_strict: true,
            },
            Self::Q6_K => FormatGeometry {
                name: "Q6_K",
                block_elements: QK_K,
                block_bytes: 210,
                sub_blocks: 16,
                scale_bits: 8,
                min_bits: 0,
                block_strict: true,
            },
        }
    }
}

/// Per-type packing constants. All fields are fixed at compile time;
/// values never change after [`FormatRegistry::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatGeometry {
    /// Scheme name as written in diagnostics
    pub name: &'static str,
    /// Elements per independently-decodable block
    pub block_elements: usize,
    /// Exact packed bytes per block
    pub block_bytes: usize,
    /// Sub-blocks sharing the packed scale/min header (1 when the block
    /// carries a single scale)
    pub sub_blocks: usize,
    /// Bit width of each per-sub-block scale field (16 = an f16 scalar)
    pub scale_bits: u32,
    /// Bit width of each per-sub-block min field (0 = symmetric scheme)
    pub min_bits: u32,
    /// Whether element counts must be whole blocks. Ragged counts for
    /// strict schemes are rejected; non-strict schemes round up and the
    /// final block is zero-padded.
    pub block_strict: bool,
}

impl FormatGeometry {
    /// Number of blocks needed for `element_count` elements.
    ///
    /// Fails for block-strict schemes when the count is not a whole
    /// number of blocks.
    pub fn block_count(&self, element_count: usize) -> Result<usize> {
        if self.block_strict && element_count % self.block_elements != 0 {
            return Err(CuantizarError::DimensionMismatch {
                expected: format!(
                    "element count divisible by {} for {}",
                    self.block_elements, self.name
                ),
                actual: element_count.to_string(),
            });
        }
        Ok(element_count.div_ceil(self.block_elements))
    }
}

/// The immutable type-tag → geometry mapping, built once at startup and
/// passed by reference to the parser and converter.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    table: BTreeMap<TensorType, FormatGeometry>,
}

impl FormatRegistry {
    /// Build the registry. Covers every [`TensorType`].
    #[must_use]
    pub fn new() -> Self {
        let table = ALL_TENSOR_TYPES
            .iter()
            .map(|&ty| (ty, ty.geometry()))
            .collect();
        Self { table }
    }

    /// Geometry for a supported type.
    #[must_use]
    pub fn geometry(&self, ty: TensorType) -> &FormatGeometry {
        // new() inserts every enum variant, so the lookup cannot miss.
        &self.table[&ty]
    }

    /// Exact packed byte size for `element_count` elements of `ty`,
    /// using block-ceiling arithmetic.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` for a ragged count on a block-strict scheme;
    /// `Overflow` when the byte length exceeds the address space.
    pub fn byte_size(&self, ty: TensorType, element_count: usize) -> Result<usize> {
        let geom = self.geometry(ty);
        let blocks = geom.block_count(element_count)?;
        blocks.checked_mul(geom.block_bytes).ok_or_else(|| {
            CuantizarError::overflow(format!(
                "byte size of {element_count} {} elements",
                geom.name
            ))
        })
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Total element count for a dimension list, with overflow checking.
pub fn element_count(dims: &[u64]) -> Result<usize> {
    let mut count: usize = 1;
    for &dim in dims {
        let dim = usize::try_from(dim)
            .map_err(|_| CuantizarError::overflow(format!("dimension {dim}")))?;
        count = count
            .checked_mul(dim)
            .ok_or_else(|| CuantizarError::overflow(format!("element count of {dims:?}")))?;
    }
    Ok(count)
}
