//! Database configuration.

use std::time::Duration;

/// Configuration of a [`crate::Database`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Upper bound for waiting on the initialization lock.
    pub max_wait: Duration,

    /// First poll interval while the lock is held elsewhere.
    pub wait_step: Duration,

    /// The poll interval doubles up to this value.
    pub max_wait_step: Duration,

    /// How long a lease stays valid without renewal.
    pub lease_ttl: Duration,

    /// Collection holding the lock records.
    pub lock_collection: String,

    /// Id of the lock record guarding `create_all`.
    pub lock_id: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(55),
            wait_step: Duration::from_millis(500),
            max_wait_step: Duration::from_secs(7),
            lease_ttl: Duration::from_secs(300),
            lock_collection: "docsentry_lock".into(),
            lock_id: "master".into(),
        }
    }
}

const MIN_STEP: Duration = Duration::from_millis(1);

impl DatabaseConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock wait bound.
    #[must_use]
    pub fn max_wait(mut self, value: Duration) -> Self {
        self.max_wait = value;
        self
    }

    /// Sets the first poll interval.
    #[must_use]
    pub fn wait_step(mut self, value: Duration) -> Self {
        self.wait_step = value.max(MIN_STEP);
        self.max_wait_step = self.max_wait_step.max(self.wait_step);
        self
    }

    /// Sets the largest poll interval.
    #[must_use]
    pub fn max_wait_step(mut self, value: Duration) -> Self {
        self.max_wait_step = value.max(MIN_STEP);
        self.wait_step = self.wait_step.min(self.max_wait_step);
        self
    }

    /// Sets the lease validity.
    #[must_use]
    pub fn lease_ttl(mut self, value: Duration) -> Self {
        self.lease_ttl = value.max(MIN_STEP);
        self
    }

    /// Sets the lock collection name.
    #[must_use]
    pub fn lock_collection(mut self, name: impl Into<String>) -> Self {
        self.lock_collection = name.into();
        self
    }

    /// Sets the lock record id.
    #[must_use]
    pub fn lock_id(mut self, id: impl Into<String>) -> Self {
        self.lock_id = id.into();
        self
    }

    /// Poll interval following `step`.
    pub(crate) fn next_step(&self, step: Duration) -> Duration {
        step.saturating_mul(2).min(self.max_wait_step)
    }
}
