/*
    errors.rs - Error types for the remote selection store

    Defines the errors that can occur in:
    - Store I/O (seed read, upsert, subscribe)
    - Decoding selection rows
*/

use thiserror::Error;

/// Errors that can occur talking to the remote selection store
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Transport-level failure (connection refused, timeout, ...)
    #[error("Request error: {0}")]
    Request(String),

    /// Store answered with a non-success status
    #[error("Store returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Store is not reachable or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A selection row is malformed
    #[error("Malformed record: {0}")]
    Record(#[from] RecordError),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Reasons a selection row fails to decode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has no item key")]
    MissingKey,

    #[error("item key is not a string")]
    KeyNotString,

    #[error("is_checked is not a boolean")]
    CheckedNotBool,

    #[error("selected sub-items payload is not an array")]
    SubItemsNotArray,

    #[error("invalid sub-item in payload: {0}")]
    InvalidSubItem(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Status {
            status: 409,
            body: "conflict".to_string(),
        };
        assert_eq!(err.to_string(), "Store returned status 409: conflict");
    }

    #[test]
    fn test_record_error_conversion() {
        let err: StoreError = RecordError::SubItemsNotArray.into();
        assert!(matches!(err, StoreError::Record(RecordError::SubItemsNotArray)));
        assert!(err.to_string().contains("not an array"));
    }
}
