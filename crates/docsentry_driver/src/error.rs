//! Error types for driver operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Server error codes reported while a replica set changes its primary.
///
/// A write rejected with one of these codes succeeds once the client talks to
/// the new primary.
pub const RETRYABLE_WRITE_CODES: &[i32] = &[
    91,    // ShutdownInProgress
    189,   // PrimarySteppedDown
    10107, // NotWritablePrimary
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13435, // NotPrimaryNoSecondaryOk
    13436, // NotPrimaryOrSecondary
];

/// Errors that can occur while talking to the document database.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The network connection failed or the server is unreachable.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server did not answer in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The client handle was closed.
    #[error("client is closed")]
    ClientClosed,

    /// The server the client talks to is no longer the primary.
    #[error("not primary: {0}")]
    NotPrimary(String),

    /// A unique index rejected a write.
    #[error("duplicate key on {namespace} index {index}: {key}")]
    DuplicateKey {
        /// Namespace of the write.
        namespace: String,
        /// Name of the violated index.
        index: String,
        /// Rendered key value.
        key: String,
    },

    /// A collection with that name already exists.
    #[error("namespace already exists: {0}")]
    NamespaceExists(String),

    /// The collection or database does not exist.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// An index with the same name or key pattern but different options exists.
    #[error("index conflict on {namespace}: {message}")]
    IndexConflict {
        /// Namespace of the index.
        namespace: String,
        /// Description of the conflict.
        message: String,
    },

    /// Malformed filter, update or document.
    #[error("bad value: {0}")]
    BadValue(String),

    /// The server rejected a write with an error code.
    #[error("write failed with code {code}: {message}")]
    WriteFailed {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },
}

impl DriverError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Creates a bad value error.
    pub fn bad_value(message: impl Into<String>) -> Self {
        Self::BadValue(message.into())
    }

    /// Returns true if the error is caused by the network or the replica set
    /// topology rather than by the data of the request.
    ///
    /// Only these errors are worth a reconnect.
    pub fn is_connectivity(&self) -> bool {
        match self {
            DriverError::Connection(_)
            | DriverError::Timeout(_)
            | DriverError::ClientClosed
            | DriverError::NotPrimary(_) => true,
            DriverError::WriteFailed { code, .. } => RETRYABLE_WRITE_CODES.contains(code),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors() {
        assert!(DriverError::connection("reset by peer").is_connectivity());
        assert!(DriverError::Timeout(Duration::from_secs(1)).is_connectivity());
        assert!(DriverError::ClientClosed.is_connectivity());
        assert!(DriverError::NotPrimary("stepped down".into()).is_connectivity());
        assert!(DriverError::WriteFailed {
            code: 10107,
            message: "not master".into(),
        }
        .is_connectivity());
    }

    #[test]
    fn data_errors_are_not_connectivity() {
        let duplicate = DriverError::DuplicateKey {
            namespace: "db.players".into(),
            index: "_id_".into(),
            key: "1".into(),
        };
        assert!(!duplicate.is_connectivity());
        assert!(!DriverError::bad_value("unknown operator $foo").is_connectivity());
        assert!(!DriverError::WriteFailed {
            code: 121,
            message: "document failed validation".into(),
        }
        .is_connectivity());
    }

    #[test]
    fn error_display() {
        let err = DriverError::NamespaceNotFound("db.missing".into());
        assert_eq!(err.to_string(), "namespace not found: db.missing");
    }
}
