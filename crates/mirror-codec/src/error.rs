use thiserror::Error;

/// Errors that can occur while decoding assets, config rows, or update packages.
#[derive(Debug, Error)]
pub enum Error {
    /// The encrypted region bounds of a container are invalid.
    #[error("corrupt container: {0}")]
    CorruptContainer(String),

    /// The derived cipher key does not fit the 16-byte key schedule.
    #[error("malformed key: derived key is {0} bytes, at most 16 allowed")]
    MalformedKey(usize),

    /// Decoded bytes are not valid text.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// A required entry is missing from an update package.
    #[error("missing required entry: {0}")]
    MissingEntry(String),

    /// The update package manifest could not be parsed.
    #[error("invalid package manifest: {0}")]
    InvalidManifest(String),

    /// Error from the zip library.
    #[error("zip error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    /// I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for mirror-codec operations.
pub type Result<T> = std::result::Result<T, Error>;
