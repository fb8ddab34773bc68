use thiserror::Error;

/// Errors from encoding, decoding or converting objects.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// The buffer does not start with the expected magic bytes.
    #[error("invalid magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: String, actual: String },

    /// The encoded format version is not understood.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Inline arrays and objects nest deeper than the given limit.
    #[error("object nesting exceeds {0} levels")]
    TooDeep(usize),

    /// The object could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// JSON input does not describe a valid object.
    #[error("invalid JSON object: {0}")]
    InvalidJson(String),
}

/// Result alias for object operations.
pub type ObjectResult<T> = Result<T, ObjectError>;
