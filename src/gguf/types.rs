//! Container constants, metadata values and tensor descriptors

use crate::error::{CuantizarError, Result};
use crate::registry::{element_count, TensorType};
use serde::{Deserialize, Serialize};

/// "GGUF" as a little-endian u32.
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Container version this crate writes. Versions 1 through 3 parse.
pub const GGUF_VERSION: u32 = 3;

/// Data-section alignment when `general.alignment` is absent.
pub const GGUF_DEFAULT_ALIGNMENT: usize = 32;

/// Padding bytes needed to lift `offset` to the next multiple of
/// `alignment`. Zero when already aligned.
#[must_use]
pub const fn padding_for_alignment(offset: usize, alignment: usize) -> usize {
    (alignment - offset % alignment) % alignment
}

/// Metadata value-type tags as stored on disk.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataValueType {
    /// 8-bit unsigned integer
    Uint8 = 0,
    /// 8-bit signed integer
    Int8 = 1,
    /// 16-bit unsigned integer
    Uint16 = 2,
    /// 16-bit signed integer
    Int16 = 3,
    /// 32-bit unsigned integer
    Uint32 = 4,
    /// 32-bit signed integer
    Int32 = 5,
    /// 32-bit float
    Float32 = 6,
    /// Boolean stored as one byte
    Bool = 7,
    /// Length-prefixed UTF-8 string
    String = 8,
    /// Homogeneous array: element-type u32, count, elements
    Array = 9,
    /// 64-bit unsigned integer
    Uint64 = 10,
    /// 64-bit signed integer
    Int64 = 11,
    /// 64-bit float
    Float64 = 12,
}

impl MetadataValueType {
    /// Resolve a raw tag. Unknown tags return `None` and surface as
    /// `FormatError` in the parser.
    #[must_use]
    pub fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Uint8),
            1 => Some(Self::Int8),
            2 => Some(Self::Uint16),
            3 => Some(Self::Int16),
            4 => Some(Self::Uint32),
            5 => Some(Self::Int32),
            6 => Some(Self::Float32),
            7 => Some(Self::Bool),
            8 => Some(Self::String),
            9 => Some(Self::Array),
            10 => Some(Self::Uint64),
            11 => Some(Self::Int64),
            12 => Some(Self::Float64),
            _ => None,
        }
    }
}

/// A parsed metadata value. Arrays nest arbitrarily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Array(Vec<MetadataValue>),
    Uint64(u64),
    Int64(i64),
    Float64(f64),
}

impl MetadataValue {
    /// The on-disk type tag for this value.
    #[must_use]
    pub const fn value_type(&self) -> MetadataValueType {
        match self {
            Self::Uint8(_) => MetadataValueType::Uint8,
            Self::Int8(_) => MetadataValueType::Int8,
            Self::Uint16(_) => MetadataValueType::Uint16,
            Self::Int16(_) => MetadataValueType::Int16,
            Self::Uint32(_) => MetadataValueType::Uint32,
            Self::Int32(_) => MetadataValueType::Int32,
            Self::Float32(_) => MetadataValueType::Float32,
            Self::Bool(_) => MetadataValueType::Bool,
            Self::String(_) => MetadataValueType::String,
            Self::Array(_) => MetadataValueType::Array,
            Self::Uint64(_) => MetadataValueType::Uint64,
            Self::Int64(_) => MetadataValueType::Int64,
            Self::Float64(_) => MetadataValueType::Float64,
        }
    }

    /// Widen any unsigned integer variant to u64.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint8(v) => Some(u64::from(*v)),
            Self::Uint16(v) => Some(u64::from(*v)),
            Self::Uint32(v) => Some(u64::from(*v)),
            Self::Uint64(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the string variant.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// One tensor's directory entry: name, shape, storage type tag and the
/// offset of its payload relative to the data-section start.
///
/// The type tag is kept raw so containers carrying schemes this crate
/// does not decode still parse; resolution happens per tensor when the
/// payload is actually needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    /// Tensor name, unique within the container
    pub name: String,
    /// Shape; element count is the product
    pub dims: Vec<u64>,
    /// Raw storage type tag
    pub type_tag: u32,
    /// Payload offset relative to the data-section start
    pub offset: u64,
}

impl TensorDescriptor {
    /// Storage type, when the tag names a supported scheme.
    #[must_use]
    pub fn tensor_type(&self) -> Option<TensorType> {
        TensorType::from_u32(self.type_tag)
    }

    /// Storage type, or `UnsupportedType` naming this tensor.
    pub fn resolve_type(&self) -> Result<TensorType> {
        self.tensor_type()
            .ok_or_else(|| CuantizarError::UnsupportedType {
                tensor: self.name.clone(),
                type_tag: self.type_tag,
            })
    }

    /// Logical element count (product of dims, overflow-checked).
    pub fn element_count(&self) -> Result<usize> {
        element_count(&self.dims)
    }

    /// Exact payload byte length from the block geometry.
    pub fn byte_size(&self) -> Result<usize> {
        let ty = self.resolve_type()?;
        let geom = ty.geometry();
        let blocks = geom.block_count(self.element_count()?)?;
        blocks.checked_mul(geom.block_bytes).ok_or_else(|| {
            CuantizarError::overflow(format!("payload size of tensor '{}'", self.name))
        })
    }
}
