//! Error types for schema coordination.

use docsentry_driver::DriverError;
use docsentry_engine::EngineError;
use std::time::Duration;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while declaring or materializing a topology.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Engine error, including connectivity failures after a retry.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The initialization lock was not acquired in time.
    #[error("lock {lock} not acquired after {waited:?} (holder: {})", .holder.as_deref().unwrap_or("unknown"))]
    LockTimeout {
        /// Lock id, or `local` for the in-process lock.
        lock: String,
        /// How long the caller waited.
        waited: Duration,
        /// Owner token of the current holder, if known.
        holder: Option<String>,
    },

    /// The lease expired and was claimed by someone else during initialization.
    #[error("lease {lock} lost by owner {owner}")]
    LeaseLost {
        /// Lock id.
        lock: String,
        /// Owner token this process held.
        owner: String,
    },

    /// A collection name was declared twice.
    #[error("collection {name} is already defined")]
    DuplicateDefinition {
        /// Name of the collection.
        name: String,
    },

    /// No definition exists for a collection.
    #[error("collection {name} not found")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// A definition is malformed.
    #[error("invalid definition of {name}: {reason}")]
    InvalidDefinition {
        /// Name of the collection.
        name: String,
        /// What is wrong.
        reason: String,
    },

    /// An index exists with a different key pattern or uniqueness.
    #[error("index {index} on {collection} conflicts with the existing one: {message}")]
    IndexConflict {
        /// Name of the collection.
        collection: String,
        /// Name of the declared index.
        index: String,
        /// Server message or description of the mismatch.
        message: String,
    },
}

impl SchemaError {
    /// Returns true for errors caused by the declared topology itself.
    ///
    /// These are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SchemaError::DuplicateDefinition { .. }
                | SchemaError::CollectionNotFound { .. }
                | SchemaError::InvalidDefinition { .. }
                | SchemaError::IndexConflict { .. }
        )
    }

    /// Returns true if the database could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SchemaError::Engine(e) if e.is_connectivity())
    }

    /// Returns the underlying driver error, if any.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            SchemaError::Engine(e) => e.driver_error(),
            _ => None,
        }
    }
}
