//! Error types shared by the transfer-learning crates.

use thiserror::Error;

/// Main error type for the training pipeline.
///
/// `Config` and `Data` abort a run before training starts. `Device` is
/// raised while probing for an accelerator and is normally recovered by
/// falling back to the CPU. `Io` covers unwritable checkpoint destinations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value or unknown architecture
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing, empty or malformed dataset directory
    #[error("Data error: {0}")]
    Data(String),

    /// Requested compute device is not available
    #[error("Device error: {0}")]
    Device(String),

    /// Model construction or record error
    #[error("Model error: {0}")]
    Model(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the pipeline can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Device(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Specialized Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
