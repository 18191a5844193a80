//! Rebindable collection handle.

use docsentry_driver::{
    DeleteResult, Document, FindOneAndUpdateOptions, FindOptions, IndexModel, InsertManyResult,
    InsertOneResult, Namespace, UpdateResult,
};
use docsentry_engine::{EngineResult, Executor};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle to a declared collection.
///
/// Every call goes through the executor's `run`, so a reconnect is picked up
/// without touching the handle. Clones share their binding: when the
/// database rebinds its cached proxies after a reconnect, every clone sees
/// the new generation.
pub struct Collection<E: Executor> {
    executor: Arc<E>,
    namespace: Namespace,
    generation: Arc<AtomicU64>,
}

impl<E: Executor> Collection<E> {
    pub(crate) fn bind(executor: Arc<E>, namespace: Namespace) -> Self {
        let generation = Arc::new(AtomicU64::new(executor.generation()));
        Self {
            executor,
            namespace,
            generation,
        }
    }

    pub(crate) fn rebind(&self, generation: u64) {
        self.generation.store(generation, Ordering::SeqCst);
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.namespace.collection
    }

    /// `database.collection`.
    pub fn full_name(&self) -> String {
        self.namespace.to_string()
    }

    /// Namespace of the collection.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Executor generation this handle was last bound to.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns the matching documents.
    pub fn find(&self, filter: &Document, options: &FindOptions) -> EngineResult<Vec<Document>> {
        self.executor
            .run("find", |c| c.find(&self.namespace, filter, options))
    }

    /// Returns the first matching document.
    pub fn find_one(&self, filter: &Document) -> EngineResult<Option<Document>> {
        self.executor
            .run("find_one", |c| c.find_one(&self.namespace, filter))
    }

    /// Runs an aggregation pipeline.
    pub fn aggregate(&self, pipeline: &[Document]) -> EngineResult<Vec<Document>> {
        self.executor
            .run("aggregate", |c| c.aggregate(&self.namespace, pipeline))
    }

    /// Counts the matching documents.
    pub fn count_documents(&self, filter: &Document) -> EngineResult<u64> {
        self.executor
            .run("count_documents", |c| c.count_documents(&self.namespace, filter))
    }

    /// Inserts one document.
    pub fn insert_one(&self, document: &Document) -> EngineResult<InsertOneResult> {
        self.executor
            .run("insert_one", |c| c.insert_one(&self.namespace, document))
    }

    /// Inserts documents in order, stopping at the first failure.
    pub fn insert_many(&self, documents: &[Document]) -> EngineResult<InsertManyResult> {
        self.executor
            .run("insert_many", |c| c.insert_many(&self.namespace, documents))
    }

    /// Updates the first matching document.
    pub fn update_one(&self, filter: &Document, update: &Document) -> EngineResult<UpdateResult> {
        self.executor
            .run("update_one", |c| c.update_one(&self.namespace, filter, update, false))
    }

    /// Updates every matching document.
    pub fn update_many(&self, filter: &Document, update: &Document) -> EngineResult<UpdateResult> {
        self.executor
            .run("update_many", |c| c.update_many(&self.namespace, filter, update, false))
    }

    /// Updates the first matching document, inserting one when none matches.
    pub fn upsert_one(&self, filter: &Document, update: &Document) -> EngineResult<UpdateResult> {
        self.executor
            .run("upsert_one", |c| c.update_one(&self.namespace, filter, update, true))
    }

    /// Updates the first matching document and returns it.
    pub fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
    ) -> EngineResult<Option<Document>> {
        self.executor.run("find_one_and_update", |c| {
            c.find_one_and_update(&self.namespace, filter, update, options)
        })
    }

    /// Deletes the first matching document.
    pub fn delete_one(&self, filter: &Document) -> EngineResult<DeleteResult> {
        self.executor
            .run("delete_one", |c| c.delete_one(&self.namespace, filter))
    }

    /// Deletes every matching document.
    pub fn delete_many(&self, filter: &Document) -> EngineResult<DeleteResult> {
        self.executor
            .run("delete_many", |c| c.delete_many(&self.namespace, filter))
    }

    /// Lists the indexes of the collection.
    pub fn list_indexes(&self) -> EngineResult<Vec<IndexModel>> {
        self.executor
            .run("list_indexes", |c| c.list_indexes(&self.namespace))
    }
}

impl<E: Executor> Clone for Collection<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            namespace: self.namespace.clone(),
            generation: Arc::clone(&self.generation),
        }
    }
}

impl<E: Executor> fmt::Debug for Collection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.full_name())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsentry_driver::{doc, ClientFactory, ConnectionOptions, MemoryServer, ReturnDocument};
    use docsentry_engine::DirectExecutor;
    use serde_json::json;

    fn game() -> (MemoryServer, Collection<DirectExecutor>) {
        let server = MemoryServer::new();
        let executor = DirectExecutor::new(server.connect(&ConnectionOptions::default()).unwrap());
        let collection = Collection::bind(Arc::new(executor), Namespace::new("gaming", "game"));
        (server, collection)
    }

    #[test]
    fn names() {
        let (_server, game) = game();
        assert_eq!(game.name(), "game");
        assert_eq!(game.full_name(), "gaming.game");
        assert_eq!(game.generation(), 0);
    }

    #[test]
    fn crud_passes_through() {
        let (server, game) = game();
        game.insert_many(&[
            doc(json!({"_id": "tails_of_iron", "genre": "adventure", "rating": 8})),
            doc(json!({"_id": "hades", "genre": "roguelike", "rating": 9})),
        ])
        .unwrap();
        game.insert_one(&doc(json!({"_id": "celeste", "genre": "platformer"})))
            .unwrap();
        assert_eq!(game.count_documents(&doc(json!({}))).unwrap(), 3);

        let found = game
            .find(
                &doc(json!({"rating": {"$gte": 8}})),
                &FindOptions::default().with_projection(doc(json!({"genre": 1}))),
            )
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| !d.contains_key("rating")));

        let updated = game
            .update_many(&doc(json!({"rating": {"$exists": true}})), &doc(json!({"$inc": {"rating": 1}})))
            .unwrap();
        assert_eq!(updated.modified_count, 2);

        let after = game
            .find_one_and_update(
                &doc(json!({"_id": "hades"})),
                &doc(json!({"$set": {"genre": "action"}})),
                &FindOneAndUpdateOptions {
                    return_document: ReturnDocument::After,
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(after["genre"], json!("action"));
        assert_eq!(after["rating"], json!(10));

        assert_eq!(game.delete_one(&doc(json!({"_id": "celeste"}))).unwrap().deleted_count, 1);
        assert_eq!(game.delete_many(&doc(json!({}))).unwrap().deleted_count, 2);
        assert!(server.snapshot(game.namespace()).is_empty());
    }

    #[test]
    fn aggregate_passes_through() {
        let (server, game) = game();
        game.insert_many(&[
            doc(json!({"_id": "root", "genre": "board", "rating": 9})),
            doc(json!({"_id": "azul", "genre": "board", "rating": 7})),
            doc(json!({"_id": "hades", "genre": "roguelike", "rating": 9})),
        ])
        .unwrap();

        let top = game
            .aggregate(&[
                doc(json!({"$match": {"genre": "board"}})),
                doc(json!({"$sort": {"rating": -1}})),
                doc(json!({"$project": {"genre": 0, "rating": 0}})),
            ])
            .unwrap();
        assert_eq!(top, vec![doc(json!({"_id": "root"})), doc(json!({"_id": "azul"}))]);

        server.sever();
        assert!(game.aggregate(&[]).unwrap_err().is_connectivity());
    }

    #[test]
    fn upsert_one_inserts_once() {
        let (server, game) = game();
        let filter = doc(json!({"_id": "hades"}));
        let update = doc(json!({"$setOnInsert": {"genre": "roguelike"}}));
        assert!(game.upsert_one(&filter, &update).unwrap().upserted_id.is_some());
        assert!(game.upsert_one(&filter, &update).unwrap().upserted_id.is_none());
        assert_eq!(server.snapshot(game.namespace()).len(), 1);
        assert_eq!(game.update_one(&filter, &doc(json!({"$set": {"x": 1}}))).unwrap().modified_count, 1);
    }

    #[test]
    fn clones_share_binding() {
        let (_server, game) = game();
        let other = game.clone();
        game.rebind(4);
        assert_eq!(other.generation(), 4);
        assert!(format!("{other:?}").contains("gaming.game"));
    }
}
