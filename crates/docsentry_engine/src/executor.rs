//! The executor capability contract.

use crate::error::EngineResult;
use docsentry_driver::{Client, DriverResult};

/// Result returned by a reconnect hook.
pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Connection state of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// A client is installed and operations run against it.
    Connected,
    /// A replacement client is being built.
    Reconnecting,
    /// The client was released; terminal.
    Disposed,
}

impl EngineState {
    /// Returns true if operations may run in this state.
    ///
    /// Operations started while reconnecting use the old client and are
    /// retried on the new one if they fail.
    pub fn can_run(&self) -> bool {
        matches!(self, EngineState::Connected | EngineState::Reconnecting)
    }

    /// Returns true for the terminal state.
    pub fn is_disposed(&self) -> bool {
        matches!(self, EngineState::Disposed)
    }
}

/// Anything able to run database operations and to survive a reconnect.
///
/// [`crate::Engine`] is the production implementation;
/// [`crate::DirectExecutor`] runs operations once, without recovery.
pub trait Executor: Send + Sync + Sized + 'static {
    /// Runs `f` against the current client.
    ///
    /// `operation` names the call in logs and errors. `f` may be invoked a
    /// second time, against a new client, after a connectivity failure.
    fn run<T, F>(&self, operation: &str, f: F) -> EngineResult<T>
    where
        F: FnMut(&dyn Client) -> DriverResult<T>;

    /// Appends a hook called after every successful client replacement.
    ///
    /// Hooks run in registration order and receive the executor. A hook
    /// must not call `reconnect` or `dispose` on its source.
    fn register_hook<H>(&self, hook: H)
    where
        H: Fn(&Self) -> HookResult + Send + Sync + 'static;

    /// Replaces the client now.
    fn reconnect(&self) -> EngineResult<()>;

    /// Releases the client. Further operations fail.
    fn dispose(&self) -> EngineResult<()>;

    /// Probes the server once; `false` on any failure.
    fn ping(&self, database: Option<&str>) -> bool;

    /// Number of client replacements so far.
    fn generation(&self) -> u64;

    /// Current connection state.
    fn state(&self) -> EngineState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_checks() {
        assert!(EngineState::Connected.can_run());
        assert!(EngineState::Reconnecting.can_run());
        assert!(!EngineState::Disposed.can_run());
        assert!(EngineState::Disposed.is_disposed());
        assert!(!EngineState::Connected.is_disposed());
    }
}
