//! GGUF container support
//!
//! Split by concern: [`types`] holds the on-disk constants and value
//! model, [`source`] the positioned-read abstraction, [`reader`] the
//! version-aware parser, [`writer`] the builder that emits parseable
//! containers.

pub mod reader;
pub mod source;
pub mod types;
pub mod writer;

pub use reader::{GgufFile, SUPPORTED_VERSIONS};
pub use source::{ByteSource, MmapSource};
pub use types::{
    padding_for_alignment, MetadataValue, MetadataValueType, TensorDescriptor,
    GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION,
};
pub use writer::{write_metadata_kv, write_string, GgufWriter};
