use thiserror::Error;

/// Crate-wide error taxonomy. Variants correspond to the error kinds named in the
/// storage-core specification, not to individual failure sites.
#[derive(Debug, Error)]
pub enum WaxError {
    #[error("format error: {0}")]
    FormatError(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl From<bincode::error::EncodeError> for WaxError {
    fn from(e: bincode::error::EncodeError) -> Self {
        WaxError::FormatError(format!("encode: {e}"))
    }
}

impl From<bincode::error::DecodeError> for WaxError {
    fn from(e: bincode::error::DecodeError) -> Self {
        WaxError::FormatError(format!("decode: {e}"))
    }
}

impl From<serde_json::Error> for WaxError {
    fn from(e: serde_json::Error) -> Self {
        WaxError::FormatError(format!("json: {e}"))
    }
}

pub type WaxResult<T> = Result<T, WaxError>;
