//! Configuration for the engine.

use docsentry_driver::ConnectionOptions;
use std::time::Duration;

/// Configuration for an [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parameters used for the first client and every replacement.
    pub connection: ConnectionOptions,
    /// Upper bound for waiting on another reconnect or dispose.
    pub max_wait: Duration,
    /// Pause before rebuilding a client after a connectivity failure.
    pub reconnect_delay: Duration,
    /// Bound for a single `ping`.
    pub ping_timeout: Duration,
    /// Database pinged when the caller names none.
    pub default_database: String,
}

impl EngineConfig {
    /// Creates a configuration for the given connection.
    pub fn new(connection: ConnectionOptions) -> Self {
        Self {
            connection,
            max_wait: Duration::from_secs(55),
            reconnect_delay: Duration::from_millis(1300),
            ping_timeout: Duration::from_secs(5),
            default_database: "admin".into(),
        }
    }

    /// Sets the wait bound.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.max(Duration::from_millis(1));
        self
    }

    /// Sets the pause before a reconnect.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the ping bound.
    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    /// Sets the database used by `ping`.
    #[must_use]
    pub fn with_default_database(mut self, database: impl Into<String>) -> Self {
        self.default_database = database.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(ConnectionOptions::default())
    }
}
