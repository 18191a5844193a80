//! Client and client factory traits.

use crate::document::{
    DeleteResult, Document, FindOneAndUpdateOptions, FindOptions, IndexModel, InsertManyResult,
    InsertOneResult, Namespace, UpdateResult,
};
use crate::error::DriverResult;
use crate::options::ConnectionOptions;
use std::sync::Arc;
use std::time::Duration;

/// A live connection handle to a document database deployment.
///
/// A client is never repaired in place: once it reports a connectivity error
/// the owner builds a new one through its [`ClientFactory`] and drops the old
/// handle.
///
/// # Invariants
///
/// - Every method either completes or returns an error; none retries
/// - Single-document writes are atomic
/// - After `close` every method returns [`crate::DriverError::ClientClosed`]
///
/// # Implementors
///
/// - [`crate::MemoryClient`] - in-process server for tests and embedding
pub trait Client: Send + Sync {
    /// Runs a liveness probe against `database`, waiting at most `timeout`.
    fn ping(&self, database: &str, timeout: Duration) -> DriverResult<()>;

    /// Lists the collections of a database, sorted by name.
    fn list_collection_names(&self, database: &str) -> DriverResult<Vec<String>>;

    /// Creates an empty collection.
    ///
    /// # Errors
    ///
    /// Returns `NamespaceExists` if the collection is already there.
    fn create_collection(&self, ns: &Namespace) -> DriverResult<()>;

    /// Drops a collection. Dropping a missing collection succeeds.
    fn drop_collection(&self, ns: &Namespace) -> DriverResult<()>;

    /// Drops a whole database.
    fn drop_database(&self, database: &str) -> DriverResult<()>;

    /// Lists the indexes of a collection, including `_id_`.
    fn list_indexes(&self, ns: &Namespace) -> DriverResult<Vec<IndexModel>>;

    /// Creates an index and returns its name.
    ///
    /// Creating an index identical to an existing one is a no-op.
    fn create_index(&self, ns: &Namespace, index: &IndexModel) -> DriverResult<String>;

    /// Returns the documents matching `filter`.
    fn find(
        &self,
        ns: &Namespace,
        filter: &Document,
        options: &FindOptions,
    ) -> DriverResult<Vec<Document>>;

    /// Returns the first document matching `filter`.
    fn find_one(&self, ns: &Namespace, filter: &Document) -> DriverResult<Option<Document>> {
        let options = FindOptions::default().with_limit(1);
        Ok(self.find(ns, filter, &options)?.into_iter().next())
    }

    /// Runs an aggregation pipeline and returns its output.
    fn aggregate(&self, ns: &Namespace, pipeline: &[Document]) -> DriverResult<Vec<Document>>;

    /// Counts the documents matching `filter`.
    fn count_documents(&self, ns: &Namespace, filter: &Document) -> DriverResult<u64>;

    /// Inserts one document; an `_id` is generated when missing.
    fn insert_one(&self, ns: &Namespace, document: &Document) -> DriverResult<InsertOneResult>;

    /// Inserts documents in order, stopping at the first failure.
    fn insert_many(
        &self,
        ns: &Namespace,
        documents: &[Document],
    ) -> DriverResult<InsertManyResult>;

    /// Updates the first matching document.
    fn update_one(
        &self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> DriverResult<UpdateResult>;

    /// Updates every matching document.
    fn update_many(
        &self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> DriverResult<UpdateResult>;

    /// Atomically updates the first matching document and returns it.
    fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
    ) -> DriverResult<Option<Document>>;

    /// Deletes the first matching document.
    fn delete_one(&self, ns: &Namespace, filter: &Document) -> DriverResult<DeleteResult>;

    /// Deletes every matching document.
    fn delete_many(&self, ns: &Namespace, filter: &Document) -> DriverResult<DeleteResult>;

    /// Releases the client's connections.
    fn close(&self) -> DriverResult<()>;
}

/// Builds clients from connection options.
///
/// Engines keep their factory for the whole process lifetime and call it
/// again on every reconnect.
pub trait ClientFactory: Send + Sync {
    /// Connects a new client.
    fn connect(&self, options: &ConnectionOptions) -> DriverResult<Arc<dyn Client>>;
}

impl<F> ClientFactory for F
where
    F: Fn(&ConnectionOptions) -> DriverResult<Arc<dyn Client>> + Send + Sync,
{
    fn connect(&self, options: &ConnectionOptions) -> DriverResult<Arc<dyn Client>> {
        self(options)
    }
}
