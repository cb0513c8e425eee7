use leafscan_api::{ClassifierError, PrescriptionsError};
use thiserror::Error;

/// All the ways things can go wrong in LeafScan
#[derive(Error, Debug)]
pub enum Error {
    /// Stored history exists but can't be read back
    #[error("Failed to read capture history: {0}")]
    StorageReadError(String),

    /// The storage backend refused a write
    #[error("Failed to write capture history: {0}")]
    StorageWriteError(String),

    /// Label and confidence must come together, and confidence must lie in [0, 1]
    #[error("Invalid record: {0}")]
    InvalidRecordError(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Classification failed: {0}")]
    ClassifierError(#[from] ClassifierError),

    #[error("Prescriptions unavailable: {0}")]
    PrescriptionsError(#[from] PrescriptionsError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::StorageReadError("expected value at line 1".to_string());
        assert!(err.to_string().contains("read capture history"));

        let err = Error::InvalidRecordError("label without confidence".to_string());
        assert!(err.to_string().contains("label without confidence"));

        let err: Error = ClassifierError::Rejected("Model not loaded".to_string()).into();
        assert!(err.to_string().contains("Model not loaded"));
    }
}
