//! Error types for the wire protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding replication log data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The record is not a JSON object of the expected shape.
    #[error("malformed entry: {0}")]
    MalformedEntry(String),

    /// A field required for this operation type is absent.
    #[error("entry of type {code} is missing field `{field}`")]
    MissingField {
        /// Operation type code of the entry.
        code: i64,
        /// Name of the missing field.
        field: &'static str,
    },

    /// The logger-state body could not be decoded.
    #[error("invalid logger state: {0}")]
    InvalidLoggerState(String),

    /// A tick value is not a decimal number.
    #[error("invalid tick: {0:?}")]
    InvalidTick(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::MissingField {
            code: 2302,
            field: "data",
        };
        assert_eq!(err.to_string(), "entry of type 2302 is missing field `data`");
    }
}
