//! Executor without recovery.

use crate::error::{EngineError, EngineResult};
use crate::executor::{EngineState, Executor, HookResult};
use crate::hooks::HookRegistry;
use docsentry_driver::{Client, DriverResult};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Runs every operation once against a fixed client.
///
/// Useful for tests of code generic over [`Executor`]: `reconnect` keeps the
/// client, bumps the generation and notifies hooks, so observers can be
/// exercised without any failure injection.
pub struct DirectExecutor {
    client: RwLock<Option<Arc<dyn Client>>>,
    generation: AtomicU64,
    hooks: HookRegistry<DirectExecutor>,
    ping_timeout: Duration,
}

impl DirectExecutor {
    /// Wraps a client.
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self {
            client: RwLock::new(Some(client)),
            generation: AtomicU64::new(0),
            hooks: HookRegistry::new(),
            ping_timeout: Duration::from_secs(5),
        }
    }

    fn current(&self) -> EngineResult<Arc<dyn Client>> {
        self.client.read().clone().ok_or(EngineError::Disposed)
    }
}

impl Executor for DirectExecutor {
    fn run<T, F>(&self, _operation: &str, mut f: F) -> EngineResult<T>
    where
        F: FnMut(&dyn Client) -> DriverResult<T>,
    {
        let client = self.current()?;
        f(client.as_ref()).map_err(EngineError::Driver)
    }

    fn register_hook<H>(&self, hook: H)
    where
        H: Fn(&Self) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.register(hook);
    }

    fn reconnect(&self) -> EngineResult<()> {
        self.current()?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "direct executor reconnect");
        self.hooks.notify(self);
        Ok(())
    }

    fn dispose(&self) -> EngineResult<()> {
        if let Some(client) = self.client.write().take() {
            if let Err(e) = client.close() {
                debug!(error = %e, "cannot close client");
            }
        }
        Ok(())
    }

    fn ping(&self, database: Option<&str>) -> bool {
        match self.current() {
            Ok(client) => client
                .ping(database.unwrap_or("admin"), self.ping_timeout)
                .is_ok(),
            Err(_) => false,
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn state(&self) -> EngineState {
        if self.client.read().is_some() {
            EngineState::Connected
        } else {
            EngineState::Disposed
        }
    }
}

impl fmt::Debug for DirectExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectExecutor")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsentry_driver::{doc, ClientFactory, ConnectionOptions, DriverError, MemoryServer, Namespace};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn executor(server: &MemoryServer) -> DirectExecutor {
        DirectExecutor::new(server.connect(&ConnectionOptions::default()).unwrap())
    }

    #[test]
    fn failures_are_not_retried() {
        let server = MemoryServer::new();
        let direct = executor(&server);
        let ns = Namespace::new("direct", "dummy");
        let attempts = AtomicUsize::new(0);
        server.fail_next(1);

        let err = direct
            .run("find_one", |c| {
                attempts.fetch_add(1, Ordering::SeqCst);
                c.find_one(&ns, &doc(json!({})))
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Driver(DriverError::Connection(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(server.connection_count(), 1);
    }

    #[test]
    fn reconnect_notifies_hooks() {
        let direct = executor(&MemoryServer::new());
        let seen = Arc::new(AtomicU64::new(0));
        let observed = Arc::clone(&seen);
        direct.register_hook(move |source: &DirectExecutor| {
            observed.store(source.generation(), Ordering::SeqCst);
            Ok(())
        });
        direct.reconnect().unwrap();
        direct.reconnect().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dispose() {
        let direct = executor(&MemoryServer::new());
        assert!(direct.ping(None));
        direct.dispose().unwrap();
        direct.dispose().unwrap();
        assert_eq!(direct.state(), EngineState::Disposed);
        assert!(!direct.ping(None));
        assert!(matches!(direct.reconnect(), Err(EngineError::Disposed)));
    }
}
