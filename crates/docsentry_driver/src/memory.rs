//! In-memory document server.

use crate::client::{Client, ClientFactory};
use crate::document::{
    DeleteResult, Document, FindOneAndUpdateOptions, FindOptions, IndexModel, InsertManyResult,
    InsertOneResult, Namespace, ReturnDocument, UpdateResult,
};
use crate::error::{DriverError, DriverResult};
use crate::options::ConnectionOptions;
use crate::query;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredCollection {
    documents: Vec<Document>,
    indexes: Vec<IndexModel>,
}

impl StoredCollection {
    fn new() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![IndexModel::primary()],
        }
    }

    fn index_key(index: &IndexModel, doc: &Document) -> Value {
        Value::Array(
            index
                .keys
                .iter()
                .map(|(field, _)| query::lookup(doc, field).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// Checks unique indexes for `candidate`, ignoring the document at `skip`.
    fn check_unique(
        &self,
        ns: &Namespace,
        candidate: &Document,
        skip: Option<usize>,
    ) -> DriverResult<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = Self::index_key(index, candidate);
            let clash = self
                .documents
                .iter()
                .enumerate()
                .filter(|(pos, _)| Some(*pos) != skip)
                .any(|(_, doc)| query::values_equal(&Self::index_key(index, doc), &key));
            if clash {
                return Err(DriverError::DuplicateKey {
                    namespace: ns.to_string(),
                    index: index.name.clone(),
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn positions(&self, filter: &Document) -> DriverResult<Vec<usize>> {
        let mut out = Vec::new();
        for (pos, doc) in self.documents.iter().enumerate() {
            if query::matches(doc, filter)? {
                out.push(pos);
            }
        }
        Ok(out)
    }
}

type Databases = BTreeMap<String, BTreeMap<String, StoredCollection>>;

#[derive(Debug, Default)]
struct Faults {
    severed: bool,
    refuse_connections: bool,
    fail_next: u32,
    fail_close: bool,
    ping_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct ServerState {
    databases: RwLock<Databases>,
    faults: Mutex<Faults>,
    primary_term: AtomicU64,
    connections: AtomicU64,
    operations: AtomicU64,
    next_id: AtomicU64,
}

/// An in-process document database deployment.
///
/// Cloning a `MemoryServer` yields another handle to the same data, so many
/// engines (standing in for separate processes) can share one deployment.
/// The server doubles as a [`ClientFactory`].
///
/// Faults can be injected to exercise failover handling:
/// - [`MemoryServer::sever`] breaks every connection until [`MemoryServer::restore`]
/// - [`MemoryServer::fail_next`] fails the next operations with a connection error
/// - [`MemoryServer::step_down`] simulates a primary switch: existing clients
///   get `NotPrimary`, newly connected clients work
/// - [`MemoryServer::refuse_connections`] makes `connect` fail
///
/// # Example
///
/// ```rust
/// use docsentry_driver::{doc, Client, ClientFactory, ConnectionOptions, MemoryServer, Namespace};
/// use serde_json::json;
///
/// let server = MemoryServer::new();
/// let client = server.connect(&ConnectionOptions::default()).unwrap();
/// let ns = Namespace::new("gaming", "game");
/// client.insert_one(&ns, &doc(json!({"_id": "tails_of_iron", "genre": "adventure"}))).unwrap();
/// assert_eq!(client.count_documents(&ns, &doc(json!({"genre": "adventure"}))).unwrap(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<ServerState>,
}

impl MemoryServer {
    /// Creates an empty deployment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaks every connection: all operations fail with a connection error.
    pub fn sever(&self) {
        self.state.faults.lock().severed = true;
    }

    /// Heals a severed deployment.
    pub fn restore(&self) {
        self.state.faults.lock().severed = false;
    }

    /// Fails the next `count` client operations with a connection error.
    pub fn fail_next(&self, count: u32) {
        self.state.faults.lock().fail_next = count;
    }

    /// Makes `connect` fail while `refuse` is true.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.faults.lock().refuse_connections = refuse;
    }

    /// Makes `close` report an error (the client is still closed).
    pub fn fail_close(&self, fail: bool) {
        self.state.faults.lock().fail_close = fail;
    }

    /// Makes `ping` block for `delay` regardless of the timeout it is given,
    /// like a driver stuck on a dead socket.
    pub fn delay_ping(&self, delay: Option<Duration>) {
        self.state.faults.lock().ping_delay = delay;
    }

    /// Elects a new primary. Clients connected before the switch see
    /// `NotPrimary` errors.
    pub fn step_down(&self) {
        self.state.primary_term.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of clients connected so far.
    pub fn connection_count(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Number of client operations attempted so far.
    pub fn operation_count(&self) -> u64 {
        self.state.operations.load(Ordering::SeqCst)
    }

    /// Returns a copy of all documents in a collection, bypassing faults.
    pub fn snapshot(&self, ns: &Namespace) -> Vec<Document> {
        self.state
            .databases
            .read()
            .get(&ns.database)
            .and_then(|db| db.get(&ns.collection))
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }
}

impl ClientFactory for MemoryServer {
    fn connect(&self, options: &ConnectionOptions) -> DriverResult<Arc<dyn Client>> {
        if self.state.faults.lock().refuse_connections {
            return Err(DriverError::connection(format!(
                "connection refused by {}",
                options.address()
            )));
        }
        let id = self.state.connections.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(client = id, address = %options.address(), "memory client connected");
        Ok(Arc::new(MemoryClient {
            id,
            address: options.address(),
            term: self.state.primary_term.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        }))
    }
}

/// A client of a [`MemoryServer`].
#[derive(Debug)]
pub struct MemoryClient {
    id: u64,
    address: String,
    term: u64,
    closed: AtomicBool,
    state: Arc<ServerState>,
}

impl MemoryClient {
    /// Sequence number of this client on its server, starting at 1.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true once `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> DriverResult<()> {
        self.state.operations.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(DriverError::ClientClosed);
        }
        {
            let mut faults = self.state.faults.lock();
            if faults.severed {
                return Err(DriverError::connection(format!(
                    "connection to {} severed",
                    self.address
                )));
            }
            if faults.fail_next > 0 {
                faults.fail_next -= 1;
                return Err(DriverError::connection(format!(
                    "connection to {} reset",
                    self.address
                )));
            }
        }
        if self.term < self.state.primary_term.load(Ordering::SeqCst) {
            return Err(DriverError::NotPrimary(format!(
                "{} is no longer primary",
                self.address
            )));
        }
        Ok(())
    }

    fn read<T>(
        &self,
        ns: &Namespace,
        f: impl FnOnce(Option<&StoredCollection>) -> DriverResult<T>,
    ) -> DriverResult<T> {
        self.check()?;
        let databases = self.state.databases.read();
        f(databases
            .get(&ns.database)
            .and_then(|db| db.get(&ns.collection)))
    }

    fn write<T>(
        &self,
        ns: &Namespace,
        f: impl FnOnce(&mut StoredCollection) -> DriverResult<T>,
    ) -> DriverResult<T> {
        self.check()?;
        let mut databases = self.state.databases.write();
        let collection = databases
            .entry(ns.database.clone())
            .or_default()
            .entry(ns.collection.clone())
            .or_insert_with(StoredCollection::new);
        f(collection)
    }

    fn generate_id(&self) -> Value {
        let n = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Value::String(format!("{:016x}{:08x}", self.id, n))
    }

    fn with_id(&self, document: &Document) -> Document {
        let mut document = document.clone();
        if !document.contains_key("_id") {
            document.insert("_id".into(), self.generate_id());
        }
        document
    }

    fn update(
        &self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> DriverResult<UpdateResult> {
        query::is_operator_update(update)?;
        let seed_id = self.generate_id();
        self.write(ns, |collection| {
            let mut positions = collection.positions(filter)?;
            if !multi {
                positions.truncate(1);
            }
            let mut result = UpdateResult {
                matched_count: positions.len() as u64,
                ..UpdateResult::default()
            };

            for pos in positions {
                let mut next = collection.documents[pos].clone();
                query::apply_update(&mut next, update, false)?;
                if next != collection.documents[pos] {
                    collection.check_unique(ns, &next, Some(pos))?;
                    collection.documents[pos] = next;
                    result.modified_count += 1;
                }
            }

            if result.matched_count == 0 && upsert {
                let mut fresh = query::upsert_seed(filter)?;
                query::apply_update(&mut fresh, update, true)?;
                if !fresh.contains_key("_id") {
                    fresh.insert("_id".into(), seed_id);
                }
                collection.check_unique(ns, &fresh, None)?;
                result.upserted_id = fresh.get("_id").cloned();
                collection.documents.push(fresh);
            }
            Ok(result)
        })
    }

    fn delete(&self, ns: &Namespace, filter: &Document, multi: bool) -> DriverResult<DeleteResult> {
        self.check()?;
        let mut databases = self.state.databases.write();
        let Some(collection) = databases
            .get_mut(&ns.database)
            .and_then(|db| db.get_mut(&ns.collection))
        else {
            return Ok(DeleteResult::default());
        };
        let mut positions = collection.positions(filter)?;
        if !multi {
            positions.truncate(1);
        }
        for pos in positions.iter().rev() {
            collection.documents.remove(*pos);
        }
        Ok(DeleteResult {
            deleted_count: positions.len() as u64,
        })
    }
}

impl Client for MemoryClient {
    fn ping(&self, _database: &str, _timeout: Duration) -> DriverResult<()> {
        let delay = self.state.faults.lock().ping_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.check()
    }

    fn list_collection_names(&self, database: &str) -> DriverResult<Vec<String>> {
        self.check()?;
        Ok(self
            .state
            .databases
            .read()
            .get(database)
            .map(|db| db.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn create_collection(&self, ns: &Namespace) -> DriverResult<()> {
        self.check()?;
        let mut databases = self.state.databases.write();
        let db = databases.entry(ns.database.clone()).or_default();
        if db.contains_key(&ns.collection) {
            return Err(DriverError::NamespaceExists(ns.to_string()));
        }
        db.insert(ns.collection.clone(), StoredCollection::new());
        Ok(())
    }

    fn drop_collection(&self, ns: &Namespace) -> DriverResult<()> {
        self.check()?;
        if let Some(db) = self.state.databases.write().get_mut(&ns.database) {
            db.remove(&ns.collection);
        }
        Ok(())
    }

    fn drop_database(&self, database: &str) -> DriverResult<()> {
        self.check()?;
        self.state.databases.write().remove(database);
        Ok(())
    }

    fn list_indexes(&self, ns: &Namespace) -> DriverResult<Vec<IndexModel>> {
        self.read(ns, |collection| {
            collection
                .map(|c| c.indexes.clone())
                .ok_or_else(|| DriverError::NamespaceNotFound(ns.to_string()))
        })
    }

    fn create_index(&self, ns: &Namespace, index: &IndexModel) -> DriverResult<String> {
        if index.keys.is_empty() {
            return Err(DriverError::bad_value("index key pattern is empty"));
        }
        self.write(ns, |collection| {
            if let Some(existing) = collection.indexes.iter().find(|i| i.name == index.name) {
                if existing.same_definition(index) {
                    return Ok(existing.name.clone());
                }
                return Err(DriverError::IndexConflict {
                    namespace: ns.to_string(),
                    message: format!(
                        "index {} already exists with a different definition",
                        index.name
                    ),
                });
            }
            if let Some(existing) = collection.indexes.iter().find(|i| i.keys == index.keys) {
                return Err(DriverError::IndexConflict {
                    namespace: ns.to_string(),
                    message: format!(
                        "key pattern of {} already indexed as {}",
                        index.name, existing.name
                    ),
                });
            }
            if index.unique {
                let mut seen: Vec<Value> = Vec::new();
                for doc in &collection.documents {
                    let key = StoredCollection::index_key(index, doc);
                    if seen.iter().any(|k| query::values_equal(k, &key)) {
                        return Err(DriverError::DuplicateKey {
                            namespace: ns.to_string(),
                            index: index.name.clone(),
                            key: key.to_string(),
                        });
                    }
                    seen.push(key);
                }
            }
            collection.indexes.push(index.clone());
            Ok(index.name.clone())
        })
    }

    fn find(
        &self,
        ns: &Namespace,
        filter: &Document,
        options: &FindOptions,
    ) -> DriverResult<Vec<Document>> {
        self.read(ns, |collection| {
            let Some(collection) = collection else {
                return Ok(Vec::new());
            };
            let limit = options.limit.unwrap_or(usize::MAX);
            let mut out = Vec::new();
            let mut skipped = 0;
            for doc in &collection.documents {
                if out.len() >= limit {
                    break;
                }
                if !query::matches(doc, filter)? {
                    continue;
                }
                if skipped < options.skip {
                    skipped += 1;
                    continue;
                }
                out.push(match &options.projection {
                    Some(projection) => query::project(doc, projection)?,
                    None => doc.clone(),
                });
            }
            Ok(out)
        })
    }

    fn aggregate(&self, ns: &Namespace, pipeline: &[Document]) -> DriverResult<Vec<Document>> {
        let documents = self.read(ns, |collection| {
            Ok(collection.map(|c| c.documents.clone()).unwrap_or_default())
        })?;
        query::aggregate(documents, pipeline)
    }

    fn count_documents(&self, ns: &Namespace, filter: &Document) -> DriverResult<u64> {
        self.read(ns, |collection| match collection {
            Some(collection) => Ok(collection.positions(filter)?.len() as u64),
            None => Ok(0),
        })
    }

    fn insert_one(&self, ns: &Namespace, document: &Document) -> DriverResult<InsertOneResult> {
        let document = self.with_id(document);
        self.write(ns, |collection| {
            collection.check_unique(ns, &document, None)?;
            let inserted_id = document.get("_id").cloned().unwrap_or(Value::Null);
            collection.documents.push(document);
            Ok(InsertOneResult { inserted_id })
        })
    }

    fn insert_many(
        &self,
        ns: &Namespace,
        documents: &[Document],
    ) -> DriverResult<InsertManyResult> {
        let documents: Vec<Document> = documents.iter().map(|d| self.with_id(d)).collect();
        self.write(ns, |collection| {
            let mut inserted_ids = Vec::with_capacity(documents.len());
            for document in documents {
                collection.check_unique(ns, &document, None)?;
                inserted_ids.push(document.get("_id").cloned().unwrap_or(Value::Null));
                collection.documents.push(document);
            }
            Ok(InsertManyResult { inserted_ids })
        })
    }

    fn update_one(
        &self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> DriverResult<UpdateResult> {
        self.update(ns, filter, update, upsert, false)
    }

    fn update_many(
        &self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> DriverResult<UpdateResult> {
        self.update(ns, filter, update, upsert, true)
    }

    fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
    ) -> DriverResult<Option<Document>> {
        let seed_id = self.generate_id();
        self.write(ns, |collection| {
            if let Some(pos) = collection.positions(filter)?.first().copied() {
                let before = collection.documents[pos].clone();
                let mut after = before.clone();
                query::apply_update(&mut after, update, false)?;
                collection.check_unique(ns, &after, Some(pos))?;
                collection.documents[pos] = after.clone();
                return Ok(Some(match options.return_document {
                    ReturnDocument::Before => before,
                    ReturnDocument::After => after,
                }));
            }
            if !options.upsert {
                return Ok(None);
            }
            let mut fresh = query::upsert_seed(filter)?;
            query::apply_update(&mut fresh, update, true)?;
            if !fresh.contains_key("_id") {
                fresh.insert("_id".into(), seed_id);
            }
            collection.check_unique(ns, &fresh, None)?;
            collection.documents.push(fresh.clone());
            Ok(match options.return_document {
                ReturnDocument::Before => None,
                ReturnDocument::After => Some(fresh),
            })
        })
    }

    fn delete_one(&self, ns: &Namespace, filter: &Document) -> DriverResult<DeleteResult> {
        self.delete(ns, filter, false)
    }

    fn delete_many(&self, ns: &Namespace, filter: &Document) -> DriverResult<DeleteResult> {
        self.delete(ns, filter, true)
    }

    fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.state.faults.lock().fail_close {
            return Err(DriverError::connection(format!(
                "failed to close connection to {}",
                self.address
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{doc, IndexKey};
    use serde_json::json;

    fn setup() -> (MemoryServer, Arc<dyn Client>, Namespace) {
        let server = MemoryServer::new();
        let client = server.connect(&ConnectionOptions::default()).unwrap();
        (server, client, Namespace::new("engine_unit_tests", "dummy"))
    }

    fn rows() -> Vec<Document> {
        vec![
            doc(json!({"_id": 1, "NAME": "Pratchett"})),
            doc(json!({"_id": 2, "NAME": "Gaiman"})),
            doc(json!({"_id": 42, "NAME": "Kanturek"})),
        ]
    }

    #[test]
    fn find_one_in_empty() {
        let (_server, client, ns) = setup();
        assert!(client.find_one(&ns, &doc(json!({}))).unwrap().is_none());
    }

    #[test]
    fn insert_and_find() {
        let (_server, client, ns) = setup();
        client.insert_many(&ns, &rows()).unwrap();
        let found = client.find_one(&ns, &doc(json!({"_id": 2}))).unwrap().unwrap();
        assert_eq!(found.get("NAME"), Some(&json!("Gaiman")));
        assert_eq!(client.count_documents(&ns, &doc(json!({}))).unwrap(), 3);
    }

    #[test]
    fn insert_generates_id() {
        let (_server, client, ns) = setup();
        let result = client.insert_one(&ns, &doc(json!({"NAME": "Marquis"}))).unwrap();
        assert!(result.inserted_id.is_string());
    }

    #[test]
    fn aggregate_runs_against_stored_documents() {
        let (server, client, ns) = setup();
        assert!(client.aggregate(&ns, &[doc(json!({"$count": "n"}))]).unwrap().is_empty());

        client.insert_many(&ns, &rows()).unwrap();
        let pipeline = [doc(json!({"$sort": {"_id": -1}})), doc(json!({"$limit": 2}))];
        let out = client.aggregate(&ns, &pipeline).unwrap();
        let ids: Vec<_> = out.iter().map(|d| d["_id"].clone()).collect();
        assert_eq!(ids, vec![json!(42), json!(2)]);

        server.sever();
        assert!(client.aggregate(&ns, &pipeline).unwrap_err().is_connectivity());
    }

    #[test]
    fn insert_duplicate_id_fails() {
        let (_server, client, ns) = setup();
        client.insert_one(&ns, &rows()[0]).unwrap();
        let err = client.insert_one(&ns, &rows()[0]).unwrap_err();
        assert!(matches!(err, DriverError::DuplicateKey { ref index, .. } if index == "_id_"));
        assert!(!err.is_connectivity());
    }

    #[test]
    fn update_and_delete() {
        let (_server, client, ns) = setup();
        client.insert_many(&ns, &rows()).unwrap();
        let changes = doc(json!({"$set": {"updated": true}}));

        let one = client.update_one(&ns, &doc(json!({"_id": 1})), &changes, false).unwrap();
        assert_eq!(one.matched_count, 1);
        assert_eq!(one.modified_count, 1);

        let many = client.update_many(&ns, &doc(json!({})), &changes, false).unwrap();
        assert_eq!(many.matched_count, 3);
        assert_eq!(many.modified_count, 2);

        let deleted = client.delete_many(&ns, &doc(json!({"updated": true}))).unwrap();
        assert_eq!(deleted.deleted_count, 3);
    }

    #[test]
    fn upsert_inserts_once() {
        let (_server, client, ns) = setup();
        let filter = doc(json!({"player_id": 1}));
        let update = doc(json!({"$setOnInsert": {"player_id": 1, "name": "A"}}));
        let first = client.update_one(&ns, &filter, &update, true).unwrap();
        assert!(first.upserted_id.is_some());
        let second = client.update_one(&ns, &filter, &update, true).unwrap();
        assert_eq!(second.matched_count, 1);
        assert_eq!(second.modified_count, 0);
        assert!(second.upserted_id.is_none());
        assert_eq!(client.count_documents(&ns, &filter).unwrap(), 1);
    }

    #[test]
    fn find_one_and_update_returns_before_or_after() {
        let (_server, client, ns) = setup();
        client.insert_one(&ns, &doc(json!({"_id": "master", "locked": false}))).unwrap();
        let before = client
            .find_one_and_update(
                &ns,
                &doc(json!({"_id": "master", "locked": false})),
                &doc(json!({"$set": {"locked": true}})),
                &FindOneAndUpdateOptions::default(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(before.get("locked"), Some(&json!(false)));

        let again = client
            .find_one_and_update(
                &ns,
                &doc(json!({"_id": "master", "locked": false})),
                &doc(json!({"$set": {"locked": true}})),
                &FindOneAndUpdateOptions::default(),
            )
            .unwrap();
        assert!(again.is_none());

        let after = client
            .find_one_and_update(
                &ns,
                &doc(json!({"_id": "other"})),
                &doc(json!({"$set": {"locked": true}})),
                &FindOneAndUpdateOptions {
                    upsert: true,
                    return_document: ReturnDocument::After,
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(after, doc(json!({"_id": "other", "locked": true})));
    }

    #[test]
    fn unique_index_enforced() {
        let (_server, client, ns) = setup();
        let index = IndexModel {
            keys: vec![("player_id".into(), IndexKey::Ascending)],
            name: "ux__player__player_id".into(),
            unique: true,
        };
        client.create_index(&ns, &index).unwrap();
        client.insert_one(&ns, &doc(json!({"player_id": 7}))).unwrap();
        let err = client.insert_one(&ns, &doc(json!({"player_id": 7}))).unwrap_err();
        assert!(matches!(err, DriverError::DuplicateKey { .. }));
    }

    #[test]
    fn create_index_is_idempotent_and_detects_conflicts() {
        let (_server, client, ns) = setup();
        let index = IndexModel {
            keys: vec![("genre".into(), IndexKey::Ascending)],
            name: "ix__game__genre".into(),
            unique: false,
        };
        assert_eq!(client.create_index(&ns, &index).unwrap(), "ix__game__genre");
        assert_eq!(client.create_index(&ns, &index).unwrap(), "ix__game__genre");
        assert_eq!(client.list_indexes(&ns).unwrap().len(), 2);

        let renamed = IndexModel {
            name: "genre_1".into(),
            ..index.clone()
        };
        assert!(matches!(
            client.create_index(&ns, &renamed),
            Err(DriverError::IndexConflict { .. })
        ));

        let unique = IndexModel {
            unique: true,
            ..index
        };
        assert!(matches!(
            client.create_index(&ns, &unique),
            Err(DriverError::IndexConflict { .. })
        ));
    }

    #[test]
    fn create_collection_twice_fails() {
        let (_server, client, ns) = setup();
        client.create_collection(&ns).unwrap();
        assert!(matches!(
            client.create_collection(&ns),
            Err(DriverError::NamespaceExists(_))
        ));
        assert_eq!(
            client.list_collection_names(&ns.database).unwrap(),
            vec!["dummy".to_string()]
        );
    }

    #[test]
    fn list_indexes_of_missing_collection() {
        let (_server, client, ns) = setup();
        assert!(matches!(
            client.list_indexes(&ns),
            Err(DriverError::NamespaceNotFound(_))
        ));
    }

    #[test]
    fn severed_server_fails_operations() {
        let (server, client, ns) = setup();
        server.sever();
        let err = client.find_one(&ns, &doc(json!({}))).unwrap_err();
        assert!(err.is_connectivity());
        assert!(client.ping("admin", Duration::from_secs(1)).is_err());
        server.restore();
        assert!(client.ping("admin", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn fail_next_counts_down() {
        let (server, client, ns) = setup();
        server.fail_next(2);
        assert!(client.count_documents(&ns, &doc(json!({}))).is_err());
        assert!(client.count_documents(&ns, &doc(json!({}))).is_err());
        assert!(client.count_documents(&ns, &doc(json!({}))).is_ok());
    }

    #[test]
    fn step_down_affects_old_clients_only() {
        let (server, old, ns) = setup();
        server.step_down();
        assert!(matches!(
            old.find_one(&ns, &doc(json!({}))),
            Err(DriverError::NotPrimary(_))
        ));
        let fresh = server.connect(&ConnectionOptions::default()).unwrap();
        assert!(fresh.find_one(&ns, &doc(json!({}))).is_ok());
        assert_eq!(server.connection_count(), 2);
    }

    #[test]
    fn closed_client_rejects_operations() {
        let (server, client, ns) = setup();
        server.fail_close(true);
        assert!(client.close().is_err());
        assert!(matches!(
            client.find_one(&ns, &doc(json!({}))),
            Err(DriverError::ClientClosed)
        ));
    }

    #[test]
    fn refused_connection() {
        let server = MemoryServer::new();
        server.refuse_connections(true);
        let err = server.connect(&ConnectionOptions::default()).err().unwrap();
        assert!(err.is_connectivity());
    }

    #[test]
    fn clones_share_data() {
        let (server, client, ns) = setup();
        let other = server.clone().connect(&ConnectionOptions::default()).unwrap();
        client.insert_one(&ns, &rows()[0]).unwrap();
        assert_eq!(other.count_documents(&ns, &doc(json!({}))).unwrap(), 1);
        assert_eq!(server.snapshot(&ns).len(), 1);
    }
}
