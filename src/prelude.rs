//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use cuantizar::prelude::*;
//! ```

pub use crate::codec::{decode_block, dequantize, encode_block, quantize, QuantizedTensor};
pub use crate::converter::{
    convert, ConversionReport, ConvertOptions, FileSink, MemorySink, OutputContainer,
    TargetPrecision, TensorSink,
};
pub use crate::error::{CuantizarError, Result};
pub use crate::fused::{matmul_quantized, matvec_q4k};
pub use crate::gguf::{ByteSource, GgufFile, GgufWriter, MetadataValue, MmapSource};
pub use crate::registry::{FormatRegistry, TensorType};
