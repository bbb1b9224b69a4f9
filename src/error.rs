//! Failure signals exposed by the decoding engine.

use thiserror::Error;

/// Structural and file-format failures raised by the engine.
///
/// Schema-level mismatches are reported separately as
/// [`SchemaError`](crate::schema::SchemaError) and are always recovered by
/// skipping one element.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes remain than a tag or length requires.
    #[error("truncated input at offset {offset}: need {needed} more byte(s)")]
    TruncatedInput { offset: usize, needed: usize },

    /// An indefinite-length element has no matching End-of-Contents marker.
    #[error("unterminated indefinite-length element at offset {offset}")]
    UnterminatedIndefiniteLength { offset: usize },

    /// The file uses a minimal proprietary record layout the schema cannot
    /// describe; the caller falls back to scanner-only decoding.
    #[error("proprietary record format at offset {offset} (declared length {declared}, expected at least {minimum})")]
    ProprietaryFormatDetected {
        offset: usize,
        declared: usize,
        minimum: usize,
    },
}

pub type DecodeResult<T> = Result<T, DecodeError>;
