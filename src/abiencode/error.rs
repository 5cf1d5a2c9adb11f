//! Error type and Return values used by the encoding and decoding layer.

/// Represents all possible errors that can happen while decoding ABI data.
///
/// Encoding can't fail: every [Token][super::Token] has exactly one
/// representation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The input ended before the value at `offset` could be read.
    #[error("out of bounds: need {needed} bytes at offset {offset}, input has {len}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        len: usize,
    },
    /// A length or offset does not fit into `usize` (or is absurdly large
    /// compared to the input).
    #[error("length or offset too large")]
    LengthOverflow,
    /// The slot does not contain a valid value of the given Solidity type,
    /// e.g. dirty upper bytes in an `address` or a `bool` that is not 0 or 1.
    #[error("invalid encoding for type {0}")]
    InvalidValue(&'static str),
    /// Decoding succeeded, but encoding the result does not reproduce the
    /// input. Signatures are computed over the encoded bytes, so we only
    /// accept canonical encodings.
    #[error("input is not in canonical encoding")]
    NonCanonical,
    /// A decoded token had a different type than the caller expected.
    #[error("unexpected token, expected {0}")]
    UnexpectedToken(&'static str),
}

/// Alias for `Result` using the [Error] returned by the decoder.
pub type Result<T> = core::result::Result<T, Error>;
