//! Per-operation fault injection.
//!
//! [`MemoryServer`] faults hit every operation alike. A [`FaultPlan`] fails
//! chosen operations by name, which is what tests need to break
//! initialization half-way through. A fault either rejects the call before
//! the server sees it, or lets the server apply it and loses the reply.

use docsentry_driver::{
    Client, ClientFactory, ConnectionOptions, DeleteResult, Document, DriverError, DriverResult,
    FindOneAndUpdateOptions, FindOptions, IndexModel, InsertManyResult, InsertOneResult,
    MemoryServer, Namespace, UpdateResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type MakeError = Arc<dyn Fn() -> DriverError + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Before,
    AfterApply,
}

#[derive(Clone)]
struct Fault {
    remaining: u32,
    phase: Phase,
    make: MakeError,
}

/// Shared list of operations that should fail.
#[derive(Clone, Default)]
pub struct FaultPlan {
    faults: Arc<Mutex<HashMap<&'static str, Fault>>>,
}

impl std::fmt::Debug for FaultPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending: Vec<(&'static str, u32)> = self
            .faults
            .lock()
            .map(|faults| faults.iter().map(|(op, fault)| (*op, fault.remaining)).collect())
            .unwrap_or_default();
        f.debug_struct("FaultPlan").field("pending", &pending).finish()
    }
}

impl FaultPlan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` calls of `operation` with the error `make`
    /// returns. The server never sees those calls.
    pub fn fail(
        &self,
        operation: &'static str,
        times: u32,
        make: impl Fn() -> DriverError + Send + Sync + 'static,
    ) {
        self.insert(operation, times, Phase::Before, Arc::new(make));
    }

    /// Lets the server apply the next `times` calls of `operation`, then
    /// reports the error `make` returns instead of the result.
    pub fn lose_reply(
        &self,
        operation: &'static str,
        times: u32,
        make: impl Fn() -> DriverError + Send + Sync + 'static,
    ) {
        self.insert(operation, times, Phase::AfterApply, Arc::new(make));
    }

    /// Removes every pending fault.
    pub fn clear(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    fn insert(&self, operation: &'static str, remaining: u32, phase: Phase, make: MakeError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(
                operation,
                Fault {
                    remaining,
                    phase,
                    make,
                },
            );
        }
    }

    fn take(&self, operation: &'static str) -> Option<(Phase, MakeError)> {
        let mut faults = self.faults.lock().ok()?;
        let fault = faults.get_mut(operation).filter(|f| f.remaining > 0)?;
        fault.remaining -= 1;
        Some((fault.phase, Arc::clone(&fault.make)))
    }

    fn apply<T>(
        &self,
        operation: &'static str,
        call: impl FnOnce() -> DriverResult<T>,
    ) -> DriverResult<T> {
        match self.take(operation) {
            None => call(),
            Some((Phase::Before, make)) => Err(make()),
            Some((Phase::AfterApply, make)) => {
                let _ = call();
                Err(make())
            }
        }
    }

    /// Factory connecting to `server` through this plan.
    pub fn factory(&self, server: MemoryServer) -> impl ClientFactory + 'static {
        let plan = self.clone();
        move |options: &ConnectionOptions| -> DriverResult<Arc<dyn Client>> {
            let inner = server.connect(options)?;
            Ok(Arc::new(FaultyClient {
                inner,
                plan: plan.clone(),
            }))
        }
    }
}

/// Client applying a [`FaultPlan`] before delegating.
pub struct FaultyClient {
    inner: Arc<dyn Client>,
    plan: FaultPlan,
}

impl Client for FaultyClient {
    fn ping(&self, database: &str, timeout: Duration) -> DriverResult<()> {
        self.plan.apply("ping", || self.inner.ping(database, timeout))
    }

    fn list_collection_names(&self, database: &str) -> DriverResult<Vec<String>> {
        self.plan
            .apply("list_collection_names", || self.inner.list_collection_names(database))
    }

    fn create_collection(&self, ns: &Namespace) -> DriverResult<()> {
        self.plan.apply("create_collection", || self.inner.create_collection(ns))
    }

    fn drop_collection(&self, ns: &Namespace) -> DriverResult<()> {
        self.plan.apply("drop_collection", || self.inner.drop_collection(ns))
    }

    fn drop_database(&self, database: &str) -> DriverResult<()> {
        self.plan.apply("drop_database", || self.inner.drop_database(database))
    }

    fn list_indexes(&self, ns: &Namespace) -> DriverResult<Vec<IndexModel>> {
        self.plan.apply("list_indexes", || self.inner.list_indexes(ns))
    }

    fn create_index(&self, ns: &Namespace, index: &IndexModel) -> DriverResult<String> {
        self.plan.apply("create_index", || self.inner.create_index(ns, index))
    }

    fn find(
        &self,
        ns: &Namespace,
        filter: &Document,
        options: &FindOptions,
    ) -> DriverResult<Vec<Document>> {
        self.plan.apply("find", || self.inner.find(ns, filter, options))
    }

    fn aggregate(&self, ns: &Namespace, pipeline: &[Document]) -> DriverResult<Vec<Document>> {
        self.plan.apply("aggregate", || self.inner.aggregate(ns, pipeline))
    }

    fn count_documents(&self, ns: &Namespace, filter: &Document) -> DriverResult<u64> {
        self.plan.apply("count_documents", || self.inner.count_documents(ns, filter))
    }

    fn insert_one(&self, ns: &Namespace, document: &Document) -> DriverResult<InsertOneResult> {
        self.plan.apply("insert_one", || self.inner.insert_one(ns, document))
    }

    fn insert_many(
        &self,
        ns: &Namespace,
        documents: &[Document],
    ) -> DriverResult<InsertManyResult> {
        self.plan.apply("insert_many", || self.inner.insert_many(ns, documents))
    }

    fn update_one(
        &self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> DriverResult<UpdateResult> {
        self.plan
            .apply("update_one", || self.inner.update_one(ns, filter, update, upsert))
    }

    fn update_many(
        &self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> DriverResult<UpdateResult> {
        self.plan
            .apply("update_many", || self.inner.update_many(ns, filter, update, upsert))
    }

    fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
    ) -> DriverResult<Option<Document>> {
        self.plan.apply("find_one_and_update", || {
            self.inner.find_one_and_update(ns, filter, update, options)
        })
    }

    fn delete_one(&self, ns: &Namespace, filter: &Document) -> DriverResult<DeleteResult> {
        self.plan.apply("delete_one", || self.inner.delete_one(ns, filter))
    }

    fn delete_many(&self, ns: &Namespace, filter: &Document) -> DriverResult<DeleteResult> {
        self.plan.apply("delete_many", || self.inner.delete_many(ns, filter))
    }

    fn close(&self) -> DriverResult<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsentry_driver::doc;
    use serde_json::json;

    fn setup() -> (FaultPlan, Arc<dyn Client>, Namespace) {
        let plan = FaultPlan::new();
        let factory = plan.factory(MemoryServer::new());
        let client = factory.connect(&ConnectionOptions::default()).unwrap();
        (plan, client, Namespace::new("faults", "dummy"))
    }

    #[test]
    fn faults_hit_named_operations_only() {
        let (plan, client, ns) = setup();

        plan.fail("insert_one", 1, || DriverError::bad_value("injected"));
        assert!(client.insert_one(&ns, &doc(json!({"a": 1}))).is_err());
        assert!(client.insert_one(&ns, &doc(json!({"a": 1}))).is_ok());
        assert_eq!(client.count_documents(&ns, &doc(json!({}))).unwrap(), 1);

        plan.fail("count_documents", 5, || DriverError::connection("injected"));
        plan.clear();
        assert!(client.count_documents(&ns, &doc(json!({}))).is_ok());
    }

    #[test]
    fn lost_replies_still_apply_the_write() {
        let (plan, client, ns) = setup();

        plan.lose_reply("insert_one", 1, || DriverError::connection("reply lost"));
        let err = client.insert_one(&ns, &doc(json!({"_id": 7}))).unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(client.count_documents(&ns, &doc(json!({"_id": 7}))).unwrap(), 1);

        let again = client.insert_one(&ns, &doc(json!({"_id": 7}))).unwrap_err();
        assert!(matches!(again, DriverError::DuplicateKey { .. }));
    }
}
