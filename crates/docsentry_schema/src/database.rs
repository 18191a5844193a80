//! Schema coordinator.

use crate::collection::Collection;
use crate::config::DatabaseConfig;
use crate::definition::CollectionDefinition;
use crate::error::{SchemaError, SchemaResult};
use crate::lease::{self, Claim, Lease, LeaseRecord};
use docsentry_driver::{DriverError, Namespace};
use docsentry_engine::{EngineError, Executor};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Span};

/// What a `create_all` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// The call returned early because the topology was already initialized.
    pub skipped: bool,
    /// Collections created by this call.
    pub collections_created: Vec<String>,
    /// Indexes created by this call, as `collection.index`.
    pub indexes_created: Vec<String>,
    /// Seed documents inserted by this call.
    pub documents_inserted: u64,
    /// Time spent waiting for the initialization lock.
    pub lock_wait: Duration,
}

impl InitReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Returns true if this call created anything.
    pub fn did_work(&self) -> bool {
        !self.collections_created.is_empty()
            || !self.indexes_created.is_empty()
            || self.documents_inserted > 0
    }
}

struct Shared<E: Executor> {
    name: String,
    executor: Arc<E>,
    config: DatabaseConfig,
    topology: RwLock<Vec<CollectionDefinition>>,
    collections: RwLock<HashMap<String, Collection<E>>>,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
    span: Span,
}

impl<E: Executor> Shared<E> {
    fn invalidate_cache(&self, source: &E) {
        let generation = source.generation();
        let collections = self.collections.read();
        for collection in collections.values() {
            collection.rebind(generation);
        }
        debug!(parent: &self.span, generation, collections = collections.len(), "rebound collections");
    }
}

/// A database with a declared topology of collections.
///
/// The database registers a reconnect hook on its executor so cached
/// [`Collection`] handles follow client replacements. Schema is assumed to
/// survive a failover; a reconnect never re-runs initialization.
///
/// # Initialization protocol
///
/// [`Database::create_all`] behaves as if it ran under one mutex shared by
/// every process using the same database:
/// 1. Return early if this instance already initialized the topology
/// 2. Take the in-process lock
/// 3. Take the lease in the lock collection, polling with backoff until
///    `max_wait`
/// 4. Create missing collections, indexes and seed documents, renewing the
///    lease after each collection
/// 5. Release the lease, whatever happened in step 4
///
/// # Example
///
/// ```rust
/// use docsentry_driver::{ConnectionOptions, MemoryServer};
/// use docsentry_engine::{Engine, EngineConfig};
/// use docsentry_schema::{CollectionDefinition, Database, DatabaseConfig, Index};
/// use std::sync::Arc;
///
/// let engine = Arc::new(Engine::connect(EngineConfig::default(), MemoryServer::new()).unwrap());
/// let db = Database::new(
///     "gaming",
///     engine,
///     DatabaseConfig::default(),
///     [CollectionDefinition::new("game").with_index(Index::ascending("genre"))],
/// )
/// .unwrap();
///
/// let report = db.create_all(true).unwrap();
/// assert_eq!(report.collections_created, vec!["game"]);
/// assert!(db.get_collection("game").is_ok());
/// ```
pub struct Database<E: Executor> {
    shared: Arc<Shared<E>>,
}

impl<E: Executor> Database<E> {
    /// Creates a database handle and registers its reconnect hook.
    ///
    /// # Errors
    ///
    /// Fails if a definition is invalid or declared twice.
    pub fn new(
        name: impl Into<String>,
        executor: Arc<E>,
        config: DatabaseConfig,
        definitions: impl IntoIterator<Item = CollectionDefinition>,
    ) -> SchemaResult<Self> {
        let name = name.into();
        let span = info_span!("database", name = %name);
        let shared = Arc::new(Shared {
            name,
            executor,
            config,
            topology: RwLock::new(Vec::new()),
            collections: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            span,
        });

        let weak: Weak<Shared<E>> = Arc::downgrade(&shared);
        shared.executor.register_hook(move |source: &E| {
            if let Some(shared) = weak.upgrade() {
                shared.invalidate_cache(source);
            }
            Ok(())
        });

        let database = Self { shared };
        database.extend(definitions)?;
        Ok(database)
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.shared.config
    }

    /// Executor operations run on.
    pub fn executor(&self) -> &Arc<E> {
        &self.shared.executor
    }

    /// Returns true if `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.shared.topology.read().iter().any(|d| d.name == name)
    }

    /// Declared definitions, in declaration order.
    pub fn topology(&self) -> Vec<CollectionDefinition> {
        self.shared.topology.read().clone()
    }

    /// Returns true once `create_all` succeeded for the current topology.
    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    /// Appends definitions to the topology.
    ///
    /// Nothing is added if any definition is invalid or its name is already
    /// declared. Adding definitions makes the next `create_all` do work.
    pub fn extend(
        &self,
        definitions: impl IntoIterator<Item = CollectionDefinition>,
    ) -> SchemaResult<()> {
        let definitions: Vec<CollectionDefinition> = definitions.into_iter().collect();
        if definitions.is_empty() {
            return Ok(());
        }
        for definition in &definitions {
            definition.validate()?;
        }

        let mut topology = self.shared.topology.write();
        let mut names: HashSet<&str> = topology.iter().map(|d| d.name.as_str()).collect();
        for definition in &definitions {
            if !names.insert(definition.name.as_str()) {
                return Err(SchemaError::DuplicateDefinition {
                    name: definition.name.clone(),
                });
            }
        }
        drop(names);

        for definition in definitions {
            debug!(parent: &self.shared.span, collection = %definition.name, "collection declared");
            topology.push(definition);
        }
        self.shared.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Returns the handle of a declared collection.
    pub fn get_collection(&self, name: &str) -> SchemaResult<Collection<E>> {
        if let Some(collection) = self.shared.collections.read().get(name) {
            return Ok(collection.clone());
        }
        if !self.contains(name) {
            return Err(SchemaError::CollectionNotFound {
                name: name.to_string(),
            });
        }
        Ok(self.bind(name))
    }

    fn bind(&self, name: &str) -> Collection<E> {
        self.shared
            .collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                Collection::bind(
                    Arc::clone(&self.shared.executor),
                    Namespace::new(self.shared.name.clone(), name),
                )
            })
            .clone()
    }

    /// Rebinds every cached collection to `source`'s current generation.
    ///
    /// Registered on the executor at construction; schema work is never
    /// repeated.
    pub fn invalidate_cache_hook(&self, source: &E) {
        self.shared.invalidate_cache(source);
    }

    /// Probes the server with this database's name.
    pub fn ping(&self) -> bool {
        self.shared.executor.ping(Some(&self.shared.name))
    }

    /// Names of the collections present on the server.
    pub fn list_collection_names(&self) -> SchemaResult<Vec<String>> {
        let names = self.shared.executor.run("list_collection_names", |c| {
            c.list_collection_names(&self.shared.name)
        })?;
        Ok(names)
    }

    /// Drops the whole database on the server.
    ///
    /// The topology is kept; the next `create_all` materializes it again.
    pub fn drop(&self) -> SchemaResult<()> {
        self.shared
            .executor
            .run("drop_database", |c| c.drop_database(&self.shared.name))?;
        self.shared.initialized.store(false, Ordering::SeqCst);
        info!(parent: &self.shared.span, "database dropped");
        Ok(())
    }

    /// Reads the initialization lock record.
    pub fn lock_state(&self) -> SchemaResult<Option<LeaseRecord>> {
        lease::read(
            self.shared.executor.as_ref(),
            &self.lock_namespace(),
            &self.shared.config.lock_id,
        )
    }

    fn lock_namespace(&self) -> Namespace {
        Namespace::new(
            self.shared.name.clone(),
            self.shared.config.lock_collection.clone(),
        )
    }

    /// Materializes the topology: collections, indexes and seed documents.
    ///
    /// With `skip_existing`, a collection already present on the server is
    /// bound as is, and a call on an initialized instance returns at once.
    /// Without it, every declared index and seed document is checked and the
    /// missing ones are created.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::LockTimeout`] if the lock is not acquired within
    ///   `max_wait`
    /// - [`SchemaError::IndexConflict`] if an index exists with another
    ///   definition
    /// - [`SchemaError::LeaseLost`] if the lease expired and was taken over
    /// - [`SchemaError::Engine`] for driver and connectivity failures
    ///
    /// The lease is released on every path.
    pub fn create_all(&self, skip_existing: bool) -> SchemaResult<InitReport> {
        let shared = &self.shared;
        let _entered = shared.span.enter();

        if skip_existing && self.is_initialized() {
            debug!("already initialized");
            return Ok(InitReport::skipped());
        }

        let _local = shared
            .init_lock
            .try_lock_for(shared.config.max_wait)
            .ok_or_else(|| SchemaError::LockTimeout {
                lock: "local".into(),
                waited: shared.config.max_wait,
                holder: None,
            })?;
        if skip_existing && self.is_initialized() {
            debug!("initialized by another thread");
            return Ok(InitReport::skipped());
        }

        let (definitions, declared) = {
            let topology = shared.topology.read();
            (topology.clone(), topology.len())
        };

        let started = Instant::now();
        let lease = self.acquire_lease(started)?;
        let mut report = InitReport {
            lock_wait: started.elapsed(),
            ..InitReport::default()
        };
        info!(
            lock = %shared.config.lock_id,
            owner = lease.owner(),
            waited_ms = report.lock_wait.as_millis() as u64,
            "initialization lock acquired"
        );

        let outcome = self.materialize(&lease, &definitions, skip_existing, &mut report);
        if let Err(e) = lease.release(shared.executor.as_ref()) {
            warn!(
                lock = %shared.config.lock_id,
                error = %e,
                ttl = ?shared.config.lease_ttl,
                "cannot release lease, it expires on its own"
            );
        }
        if let Err(e) = outcome {
            error!(error = %e, "create_all failed");
            return Err(e);
        }

        // Definitions added meanwhile still need a run.
        let topology = shared.topology.read();
        if topology.len() == declared {
            shared.initialized.store(true, Ordering::SeqCst);
        }
        drop(topology);

        info!(
            collections = report.collections_created.len(),
            indexes = report.indexes_created.len(),
            documents = report.documents_inserted,
            "create_all finished"
        );
        Ok(report)
    }

    fn acquire_lease(&self, started: Instant) -> SchemaResult<Lease> {
        let config = &self.shared.config;
        let executor = self.shared.executor.as_ref();
        let namespace = self.lock_namespace();
        let owner = lease::new_owner();
        let mut step = config.wait_step;

        loop {
            let attempt =
                Lease::try_acquire(executor, &namespace, &config.lock_id, &owner, config.lease_ttl);
            let claim = match attempt {
                Ok(claim) => claim,
                Err(e) => {
                    match lease::abandon(executor, &namespace, &config.lock_id, &owner) {
                        Ok(true) => warn!(lock = %config.lock_id, "cleared lease taken by a failed attempt"),
                        Ok(false) => {}
                        Err(cleanup) => debug!(error = %cleanup, "cannot clear lease after failed attempt"),
                    }
                    return Err(e);
                }
            };
            let holder = match claim {
                Claim::Acquired(lease) => return Ok(lease),
                Claim::Held(holder) => holder,
            };

            let waited = started.elapsed();
            if waited >= config.max_wait {
                let holder = holder.and_then(|h| h.owner);
                warn!(
                    lock = %config.lock_id,
                    waited_ms = waited.as_millis() as u64,
                    holder = holder.as_deref().unwrap_or("unknown"),
                    "gave up waiting for initialization lock"
                );
                return Err(SchemaError::LockTimeout {
                    lock: config.lock_id.clone(),
                    waited,
                    holder,
                });
            }

            debug!(
                lock = %config.lock_id,
                waited_ms = waited.as_millis() as u64,
                "waiting for initialization lock"
            );
            thread::sleep(step.min(config.max_wait - waited));
            step = config.next_step(step);
        }
    }

    fn materialize(
        &self,
        lease: &Lease,
        definitions: &[CollectionDefinition],
        skip_existing: bool,
        report: &mut InitReport,
    ) -> SchemaResult<()> {
        let executor = self.shared.executor.as_ref();
        let existing: HashSet<String> = self
            .list_collection_names()?
            .into_iter()
            .collect();

        for definition in definitions {
            let namespace = Namespace::new(self.shared.name.clone(), definition.name.clone());
            let is_new = if existing.contains(&definition.name) {
                debug!(collection = %definition.name, "collection exists");
                false
            } else {
                if self.create_collection(&namespace)? {
                    report.collections_created.push(definition.name.clone());
                }
                true
            };

            if is_new || !skip_existing {
                self.create_indexes(definition, &namespace, report)?;
                self.insert_defaults(definition, &namespace, report)?;
            }

            self.bind(&definition.name);
            lease.renew(executor)?;
        }
        Ok(())
    }

    /// Returns false if the collection appeared in the meantime.
    fn create_collection(&self, namespace: &Namespace) -> SchemaResult<bool> {
        let created = self.shared.executor.run("create_collection", |c| {
            match c.create_collection(namespace) {
                Ok(()) => Ok(true),
                Err(DriverError::NamespaceExists(_)) => Ok(false),
                Err(e) => Err(e),
            }
        })?;
        if created {
            info!(collection = %namespace, "created collection");
        } else {
            info!(collection = %namespace, "collection created concurrently");
        }
        Ok(created)
    }

    fn create_indexes(
        &self,
        definition: &CollectionDefinition,
        namespace: &Namespace,
        report: &mut InitReport,
    ) -> SchemaResult<()> {
        if definition.indices.is_empty() {
            return Ok(());
        }
        let executor = self.shared.executor.as_ref();
        let present = executor.run("list_indexes", |c| c.list_indexes(namespace))?;

        for index in &definition.indices {
            let model = index.to_model(&definition.name);
            if let Some(existing) = present.iter().find(|i| i.name == model.name) {
                if existing.same_definition(&model) {
                    continue;
                }
                let message = format!(
                    "declared {:?} unique={}, found {:?} unique={}",
                    model.key_document(),
                    model.unique,
                    existing.key_document(),
                    existing.unique
                );
                return Err(SchemaError::IndexConflict {
                    collection: definition.name.clone(),
                    index: model.name,
                    message,
                });
            }

            debug!(collection = %namespace, index = %model.name, "creating index");
            match executor.run("create_index", |c| c.create_index(namespace, &model)) {
                Ok(name) => {
                    info!(collection = %namespace, index = %name, "created index");
                    report.indexes_created.push(format!("{}.{name}", definition.name));
                }
                Err(EngineError::Driver(DriverError::IndexConflict { message, .. })) => {
                    return Err(SchemaError::IndexConflict {
                        collection: definition.name.clone(),
                        index: model.name,
                        message,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn insert_defaults(
        &self,
        definition: &CollectionDefinition,
        namespace: &Namespace,
        report: &mut InitReport,
    ) -> SchemaResult<()> {
        let executor = self.shared.executor.as_ref();
        for seed in &definition.default_docs {
            let filter = seed.filter();
            let update = seed.upsert_update();
            let result = executor.run("insert_default", |c| {
                c.update_one(namespace, &filter, &update, true)
            })?;
            if result.upserted_id.is_some() {
                report.documents_inserted += 1;
                info!(collection = %namespace, key = ?filter, "inserted default document");
            }
        }
        Ok(())
    }
}

impl<E: Executor> Clone for Database<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Executor> fmt::Display for Database<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database(name={:?})", self.shared.name)
    }
}

impl<E: Executor> fmt::Debug for Database<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.shared.name)
            .field("collections", &self.shared.topology.read().len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
