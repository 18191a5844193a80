//! Engine connection state machine.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::executor::{EngineState, Executor, HookResult};
use crate::hooks::HookRegistry;
use docsentry_driver::{Client, ClientFactory, DriverError, DriverResult};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Statistics about an engine.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Successful client replacements.
    pub reconnects: u64,
    /// Operations run a second time after a reconnect.
    pub retries: u64,
    /// Connectivity errors observed by `run`.
    pub connectivity_failures: u64,
    /// Reconnect hooks that failed or panicked.
    pub hook_failures: u64,
    /// Pings answered `false` because an earlier ping was still running.
    pub pings_skipped: u64,
    /// Time of the last client replacement.
    pub last_reconnect: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Clears the in-flight flag when the ping thread finishes.
struct PingGuard(Arc<AtomicBool>);

impl Drop for PingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The installed client together with the state it belongs to.
struct Slot {
    state: EngineState,
    client: Option<Arc<dyn Client>>,
    generation: u64,
}

/// Connection manager for one logical database connection.
///
/// The engine owns the live client and replaces it wholesale when an
/// operation fails for connectivity reasons, for example after a replica set
/// elected a new primary. Callers never see the switch unless the retried
/// operation fails as well.
///
/// # State machine
///
/// ```text
/// Connected --(connectivity failure / reconnect)--> Reconnecting --> Connected
/// Connected | Reconnecting --(dispose)--> Disposed (terminal)
/// ```
///
/// # Invariants
///
/// - At most one reconnect or dispose is in flight at a time
/// - A constructed engine holds a client until it is disposed
/// - A disposed engine never installs a client again
/// - `run` reads the client once per attempt
///
/// # Example
///
/// ```rust
/// use docsentry_driver::{doc, ConnectionOptions, MemoryServer, Namespace};
/// use docsentry_engine::{Engine, EngineConfig, Executor};
/// use serde_json::json;
///
/// let server = MemoryServer::new();
/// let engine = Engine::connect(EngineConfig::new(ConnectionOptions::default()), server).unwrap();
/// let ns = Namespace::new("gaming", "game");
/// engine
///     .run("insert_one", |client| client.insert_one(&ns, &doc(json!({"genre": "adventure"}))))
///     .unwrap();
/// assert!(engine.ping(None));
/// ```
pub struct Engine {
    config: EngineConfig,
    factory: Arc<dyn ClientFactory>,
    slot: RwLock<Slot>,
    transition: Mutex<()>,
    hooks: HookRegistry<Engine>,
    stats: RwLock<EngineStats>,
    ping_in_flight: Arc<AtomicBool>,
}

impl Engine {
    /// Connects the first client.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Driver` if the factory cannot build a client;
    /// no engine exists in that case.
    pub fn connect(config: EngineConfig, factory: impl ClientFactory + 'static) -> EngineResult<Self> {
        Self::with_factory(config, Arc::new(factory))
    }

    /// Connects the first client with a shared factory.
    pub fn with_factory(config: EngineConfig, factory: Arc<dyn ClientFactory>) -> EngineResult<Self> {
        let client = factory.connect(&config.connection).map_err(|e| {
            info!(address = %config.connection.address(), error = %e, "cannot create client");
            EngineError::Driver(e)
        })?;
        debug!(address = %config.connection.address(), "engine connected");
        Ok(Self {
            config,
            factory,
            slot: RwLock::new(Slot {
                state: EngineState::Connected,
                client: Some(client),
                generation: 0,
            }),
            transition: Mutex::new(()),
            hooks: HookRegistry::new(),
            stats: RwLock::new(EngineStats::default()),
            ping_in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns `host:port` of the server.
    pub fn address(&self) -> String {
        self.config.connection.address()
    }

    /// Returns the current stats.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Number of registered reconnect hooks.
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Returns the current client.
    ///
    /// Operations run on this handle bypass reconnect handling; prefer `run`.
    pub fn client(&self) -> EngineResult<Arc<dyn Client>> {
        self.snapshot().map(|(client, _)| client)
    }

    /// Reads the client and its generation in one step.
    fn snapshot(&self) -> EngineResult<(Arc<dyn Client>, u64)> {
        let slot = self.slot.read();
        match (&slot.client, slot.state.can_run()) {
            (Some(client), true) => Ok((Arc::clone(client), slot.generation)),
            _ => Err(EngineError::Disposed),
        }
    }

    fn lock_transition(&self, operation: &str) -> EngineResult<MutexGuard<'_, ()>> {
        self.transition
            .try_lock_for(self.config.max_wait)
            .ok_or_else(|| {
                warn!(operation, waited = ?self.config.max_wait, "gave up waiting for reconnect lock");
                EngineError::Timeout {
                    operation: operation.to_string(),
                    waited: self.config.max_wait,
                }
            })
    }

    /// Builds a new client, swaps it in and notifies hooks.
    ///
    /// The caller holds the transition lock. If the factory fails the old
    /// client stays installed.
    fn replace_client(&self, _guard: &MutexGuard<'_, ()>) -> EngineResult<u64> {
        self.slot.write().state = EngineState::Reconnecting;
        debug!(address = %self.address(), "reconnecting client");

        let fresh = match self.factory.connect(&self.config.connection) {
            Ok(client) => client,
            Err(source) => {
                self.slot.write().state = EngineState::Connected;
                error!(address = %self.address(), error = %source, "cannot reconnect");
                self.stats.write().last_error = Some(source.to_string());
                return Err(EngineError::Reconnect {
                    address: self.address(),
                    source,
                });
            }
        };

        let generation = {
            let mut slot = self.slot.write();
            // The previous client is dropped once its last in-flight user is done.
            slot.client = Some(fresh);
            slot.state = EngineState::Connected;
            slot.generation += 1;
            slot.generation
        };
        {
            let mut stats = self.stats.write();
            stats.reconnects += 1;
            stats.last_reconnect = Some(Instant::now());
        }
        info!(address = %self.address(), generation, "reconnected client");

        let failures = self.hooks.notify(self);
        if failures > 0 {
            self.stats.write().hook_failures += failures;
        }
        Ok(generation)
    }

    /// Replaces the client unless another caller already replaced the one
    /// observed at `generation`.
    fn recover(&self, operation: &str, generation: u64) -> EngineResult<()> {
        if !self.config.reconnect_delay.is_zero() {
            thread::sleep(self.config.reconnect_delay);
        }
        let guard = self.lock_transition(operation)?;
        {
            let slot = self.slot.read();
            if slot.state.is_disposed() {
                return Err(EngineError::Disposed);
            }
            if slot.generation != generation {
                debug!(operation, generation = slot.generation, "client already replaced");
                return Ok(());
            }
        }
        self.replace_client(&guard).map(|_| ())
    }

    fn record_failure(&self, error: &DriverError) {
        let mut stats = self.stats.write();
        stats.connectivity_failures += 1;
        stats.last_error = Some(error.to_string());
    }
}

impl Executor for Engine {
    fn run<T, F>(&self, operation: &str, mut f: F) -> EngineResult<T>
    where
        F: FnMut(&dyn Client) -> DriverResult<T>,
    {
        let (client, generation) = self.snapshot()?;
        let failure = match f(client.as_ref()) {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_connectivity() => return Err(EngineError::Driver(e)),
            Err(e) => e,
        };
        drop(client);

        warn!(operation, generation, error = %failure, "connectivity failure, reconnecting");
        self.record_failure(&failure);
        self.recover(operation, generation)?;

        let (client, generation) = self.snapshot()?;
        self.stats.write().retries += 1;
        match f(client.as_ref()) {
            Ok(value) => {
                debug!(operation, generation, "retry succeeded");
                Ok(value)
            }
            Err(source) if source.is_connectivity() => {
                error!(operation, generation, error = %source, "retry failed");
                self.record_failure(&source);
                Err(EngineError::Connectivity {
                    operation: operation.to_string(),
                    source,
                })
            }
            Err(e) => Err(EngineError::Driver(e)),
        }
    }

    fn register_hook<H>(&self, hook: H)
    where
        H: Fn(&Self) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.register(hook);
    }

    fn reconnect(&self) -> EngineResult<()> {
        let guard = self.lock_transition("reconnect")?;
        if self.state().is_disposed() {
            return Err(EngineError::Disposed);
        }
        self.replace_client(&guard).map(|_| ())
    }

    fn dispose(&self) -> EngineResult<()> {
        if self.state().is_disposed() {
            return Ok(());
        }
        let _guard = self.lock_transition("dispose")?;
        let client = {
            let mut slot = self.slot.write();
            if slot.state.is_disposed() {
                return Ok(());
            }
            slot.state = EngineState::Disposed;
            slot.client.take()
        };
        if let Some(client) = client {
            if let Err(e) = client.close() {
                debug!(address = %self.address(), error = %e, "cannot close client");
            }
        }
        debug!(address = %self.address(), "engine disposed");
        Ok(())
    }

    fn ping(&self, database: Option<&str>) -> bool {
        let Ok((client, _)) = self.snapshot() else {
            debug!("ping on disposed engine");
            return false;
        };
        let database = database
            .unwrap_or(&self.config.default_database)
            .to_string();
        let timeout = self.config.ping_timeout;

        // The ping runs on its own thread so a driver that ignores its
        // timeout cannot hold the caller past `ping_timeout`. At most one
        // ping thread exists per engine.
        if self.ping_in_flight.swap(true, Ordering::SeqCst) {
            self.stats.write().pings_skipped += 1;
            info!(database = %database, "previous ping still running");
            return false;
        }
        let guard = PingGuard(Arc::clone(&self.ping_in_flight));
        let (tx, rx) = mpsc::channel();
        let target = database.clone();
        let spawned = thread::Builder::new()
            .name("docsentry-ping".into())
            .spawn(move || {
                let result = client.ping(&target, timeout);
                drop(guard);
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            warn!(error = %e, "cannot spawn ping thread");
            return false;
        }

        match rx.recv_timeout(timeout + Duration::from_millis(50)) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                info!(database = %database, error = %e, "ping failed");
                false
            }
            Err(_) => {
                info!(database = %database, timeout = ?timeout, "ping timed out");
                false
            }
        }
    }

    fn generation(&self) -> u64 {
        self.slot.read().generation
    }

    fn state(&self) -> EngineState {
        self.slot.read().state
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Engine(server={:?})", self.address())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("server", &self.address())
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}
