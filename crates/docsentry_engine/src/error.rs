//! Error types for the engine.

use docsentry_driver::DriverError;
use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while running operations through an engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The driver rejected the operation; never retried.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// The operation failed again after the client was replaced.
    #[error("{operation} failed after reconnect: {source}")]
    Connectivity {
        /// Name of the operation.
        operation: String,
        /// Error of the retried attempt.
        #[source]
        source: DriverError,
    },

    /// A replacement client could not be built.
    #[error("cannot reconnect to {address}: {source}")]
    Reconnect {
        /// Server address.
        address: String,
        /// Error reported by the client factory.
        #[source]
        source: DriverError,
    },

    /// The engine was disposed.
    #[error("engine is disposed")]
    Disposed,

    /// Waiting for another reconnect or dispose took too long.
    #[error("{operation} timed out after {waited:?}")]
    Timeout {
        /// Name of the operation.
        operation: String,
        /// How long the caller waited.
        waited: Duration,
    },
}

impl EngineError {
    /// Returns true if the error means the database could not be reached.
    pub fn is_connectivity(&self) -> bool {
        match self {
            EngineError::Driver(e) => e.is_connectivity(),
            EngineError::Connectivity { .. } | EngineError::Reconnect { .. } => true,
            EngineError::Disposed | EngineError::Timeout { .. } => false,
        }
    }

    /// Returns the underlying driver error, if any.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            EngineError::Driver(e)
            | EngineError::Connectivity { source: e, .. }
            | EngineError::Reconnect { source: e, .. } => Some(e),
            _ => None,
        }
    }
}
