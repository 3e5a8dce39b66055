//! Connector error type.

use sluice_core::error_codes::{ErrorCode, HasErrorCode};

/// Errors raised by source readers, sink writers and row decoding.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Adapter option has an invalid value.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Required adapter option is absent.
    #[error("missing option: {0}")]
    MissingConfig(String),

    /// Could not bind or connect.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Reading from the external system failed.
    #[error("read error: {0}")]
    ReadError(String),

    /// Writing to the external system failed.
    #[error("write error: {0}")]
    WriteError(String),

    /// External system did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Payload could not be decoded or encoded.
    #[error("serde error: {0}")]
    Serde(String),

    /// Source row does not fit the stream schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Source row names the same column twice.
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    /// Operation not valid in the adapter's current state.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Required state.
        expected: String,
        /// Actual state.
        actual: String,
    },

    /// Row validation failed.
    #[error(transparent)]
    Core(#[from] sluice_core::Error),
}

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e.to_string())
    }
}

impl HasErrorCode for ConnectorError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::ConfigurationError(_) | Self::MissingConfig(_) => ErrorCode::InvalidOption,
            Self::ConnectionFailed(_) | Self::ReadError(_) | Self::WriteError(_) => {
                ErrorCode::ForeignIo
            }
            Self::Timeout(_) => ErrorCode::ForeignSourceTimeout,
            Self::Serde(_) | Self::SchemaMismatch(_) => ErrorCode::InvalidFormat,
            Self::DuplicateColumn(_) => ErrorCode::Sql,
            Self::InvalidState { .. } => ErrorCode::Unavailable,
            Self::Core(e) => e.error_code(),
        }
    }
}
