use thiserror::Error;

/// Top-level error type for the Lexica pipeline.
///
/// Each variant wraps a subsystem-specific detail message. Subsystem crates
/// construct the matching variant so that the `?` operator works seamlessly
/// across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LexicaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Packaging error: {0}")]
    Packaging(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for LexicaError {
    fn from(err: toml::de::Error) -> Self {
        LexicaError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for LexicaError {
    fn from(err: toml::ser::Error) -> Self {
        LexicaError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LexicaError {
    fn from(err: serde_json::Error) -> Self {
        LexicaError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Lexica operations.
pub type Result<T> = std::result::Result<T, LexicaError>;
