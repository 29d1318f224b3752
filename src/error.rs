//! Error types for cuantizar operations.
//!
//! One error enum for the whole crate. Parse-time failures abort
//! immediately; the converter batches unsupported-type failures into a
//! single [`CuantizarError::AggregateUnsupportedType`] so a caller sees
//! every offending tensor in one response. I/O errors are propagated
//! unmodified and never retried here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias for cuantizar operations.
pub type Result<T> = std::result::Result<T, CuantizarError>;

/// A tensor the converter cannot decode: name plus the raw type tag
/// found in the container directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsupportedTensor {
    /// Tensor name as declared in the container
    pub name: String,
    /// Raw quantization-type tag from the descriptor
    pub type_tag: u32,
}

impl fmt::Display for UnsupportedTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (type {})", self.name, self.type_tag)
    }
}

/// Main error type for cuantizar operations.
///
/// # Examples
///
/// ```
/// use cuantizar::error::CuantizarError;
///
/// let err = CuantizarError::CorruptBlock {
///     type_name: "Q6_K",
///     expected: 210,
///     actual: 209,
/// };
/// assert!(err.to_string().contains("210"));
/// ```
#[derive(Debug)]
pub enum CuantizarError {
    /// Malformed container: bad magic, truncated input, bad metadata
    /// tag, duplicate tensor name.
    FormatError {
        /// Error description
        message: String,
    },

    /// Container version outside the supported range.
    UnsupportedVersion {
        /// Version found in the header
        found: u32,
        /// Supported range (min, max), inclusive
        supported: (u32, u32),
    },

    /// Shape incompatible with an operation: ragged element count for a
    /// block-strict scheme, or mismatched operand shapes in the fused
    /// kernel.
    DimensionMismatch {
        /// Expected dimensions description
        expected: String,
        /// Actual dimensions found
        actual: String,
    },

    /// A single tensor with a type tag the codec cannot decode.
    UnsupportedType {
        /// Tensor name
        tensor: String,
        /// Raw type tag
        type_tag: u32,
    },

    /// Batched conversion failure carrying every unsupported tensor.
    AggregateUnsupportedType {
        /// All failing tensors, in directory order
        failures: Vec<UnsupportedTensor>,
    },

    /// A decode call received a byte slice whose length differs from the
    /// exact geometry-derived size.
    CorruptBlock {
        /// Scheme name (e.g. "Q6_K")
        type_name: &'static str,
        /// Exact byte length the geometry requires
        expected: usize,
        /// Byte length actually provided
        actual: usize,
    },

    /// A declared shape implies an unaddressable byte length.
    Overflow {
        /// What was being computed when the arithmetic overflowed
        context: String,
    },

    /// I/O error from the source or sink, propagated unmodified.
    Io(std::io::Error),

    /// Generic error with string message.
    Other(String),
}

impl fmt::Display for CuantizarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CuantizarError::FormatError { message } => {
                write!(f, "Format error: {message}")
            }
            CuantizarError::UnsupportedVersion { found, supported } => {
                write!(
                    f,
                    "Unsupported container version {found} (supported: {}..={})",
                    supported.0, supported.1
                )
            }
            CuantizarError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {expected}, got {actual}")
            }
            CuantizarError::UnsupportedType { tensor, type_tag } => {
                write!(
                    f,
                    "Unsupported tensor type: '{tensor}' has type tag {type_tag}"
                )
            }
            CuantizarError::AggregateUnsupportedType { failures } => {
                write!(
                    f,
                    "Conversion failed: {} unsupported tensor(s): ",
                    failures.len()
                )?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{failure}")?;
                }
                Ok(())
            }
            CuantizarError::CorruptBlock {
                type_name,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Corrupt {type_name} block data: expected {expected} bytes, got {actual}"
                )
            }
            CuantizarError::Overflow { context } => {
                write!(f, "Arithmetic overflow computing {context}")
            }
            CuantizarError::Io(err) => write!(f, "I/O error: {err}"),
            CuantizarError::Other(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for CuantizarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CuantizarError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CuantizarError {
    fn from(err: std::io::Error) -> Self {
        CuantizarError::Io(err)
    }
}

impl From<String> for CuantizarError {
    fn from(message: String) -> Self {
        CuantizarError::Other(message)
    }
}

impl From<&str> for CuantizarError {
    fn from(message: &str) -> Self {
        CuantizarError::Other(message.to_string())
    }
}

impl CuantizarError {
    /// Construct a [`CuantizarError::FormatError`] from anything
    /// stringifiable.
    pub fn format_error(message: impl Into<String>) -> Self {
        CuantizarError::FormatError {
            message: message.into(),
        }
    }

    /// Construct a [`CuantizarError::Overflow`] naming the computation.
    pub fn overflow(context: impl Into<String>) -> Self {
        CuantizarError::Overflow {
            context: context.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_display() {
        let err = CuantizarError::format_error("bad magic");
        assert_eq!(err.to_string(), "Format error: bad magic");
    }

    #[test]
    fn test_unsupported_version_display() {
        let err = CuantizarError::UnsupportedVersion {
            found: 7,
            supported: (1, 3),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported container version 7 (supported: 1..=3)"
        );
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = CuantizarError::DimensionMismatch {
            expected: "multiple of 256".to_string(),
            actual: "300".to_string(),
        };
        assert!(err.to_string().contains("expected multiple of 256"));
        assert!(err.to_string().contains("got 300"));
    }

    #[test]
    fn test_aggregate_display_lists_every_tensor() {
        let err = CuantizarError::AggregateUnsupportedType {
            failures: vec![
                UnsupportedTensor {
                    name: "blk.0.ffn_up.weight".to_string(),
                    type_tag: 26,
                },
                UnsupportedTensor {
                    name: "blk.1.ffn_up.weight".to_string(),
                    type_tag: 26,
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 unsupported tensor(s)"));
        assert!(text.contains("blk.0.ffn_up.weight (type 26)"));
        assert!(text.contains("blk.1.ffn_up.weight (type 26)"));
    }

    #[test]
    fn test_corrupt_block_display() {
        let err = CuantizarError::CorruptBlock {
            type_name: "Q6_K",
            expected: 210,
            actual: 209,
        };
        assert_eq!(
            err.to_string(),
            "Corrupt Q6_K block data: expected 210 bytes, got 209"
        );
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error;
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err = CuantizarError::from(io);
        assert!(err.source().is_some());
        assert!(matches!(err, CuantizarError::Io(_)));
    }

    #[test]
    fn test_from_string() {
        let err: CuantizarError = "something failed".into();
        assert_eq!(err.to_string(), "something failed");
    }
}
