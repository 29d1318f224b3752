//! Cuantizar: quantized-tensor container codec in pure Rust.
//!
//! Cuantizar parses GGUF model containers, decodes and encodes the
//! common block-quantization schemes bit-exactly, re-packages models
//! into a simple fixed-block output format, and multiplies against
//! quantized weights without ever materializing them as floats.
//!
//! # Quick Start
//!
//! ```
//! use cuantizar::prelude::*;
//!
//! // Pack a small weight matrix into 8-bit blocks
//! let values: Vec<f32> = (0..64).map(|i| (i as f32) * 0.01).collect();
//! let weights = QuantizedTensor::from_f32(TensorType::Q8_0, vec![2, 32], &values).unwrap();
//! assert!(weights.compression_ratio() > 3.0);
//!
//! // Multiply against activations one decoded block at a time
//! let activations = vec![1.0f32; 32];
//! let product = matmul_quantized(&weights, &activations, 1).unwrap();
//! assert_eq!(product.len(), 2);
//! ```
//!
//! # Modules
//!
//! - [`gguf`]: GGUF container parsing and writing (versions 1 through 3)
//! - [`registry`]: quantization scheme tags and block geometries
//! - [`codec`]: block-level encode/decode for every supported scheme
//! - [`converter`]: two-phase re-quantizing converter and output container
//! - [`fused`]: fused quantized matrix multiply
//! - [`error`]: the crate-wide error type

pub mod codec;
pub mod converter;
pub mod error;
pub mod fused;
pub mod gguf;
pub mod prelude;
pub mod registry;

pub use error::{CuantizarError, Result};
pub use registry::{FormatRegistry, TensorType};
