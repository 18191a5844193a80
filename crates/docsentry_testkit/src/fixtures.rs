//! Test fixtures and deployment helpers.
//!
//! A [`TestDeployment`] is one in-memory database server. Every engine built
//! from it stands in for a separate process connected to the same database.

use docsentry_driver::{doc, ConnectionOptions, IndexKey, MemoryServer};
use docsentry_engine::{Engine, EngineConfig};
use docsentry_schema::{CollectionDefinition, Database, DatabaseConfig, Document, Index};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Database name used by the sample topology.
pub const GAMING: &str = "gaming";

/// `game` collection with an ascending index on `genre`.
pub fn game_definition() -> CollectionDefinition {
    CollectionDefinition::new("game").with_index(Index::ascending("genre"))
}

/// `player` collection with a unique `player_id` and one seed row.
pub fn player_definition() -> CollectionDefinition {
    CollectionDefinition::new("player")
        .with_index(Index::new([("player_id", IndexKey::Ascending)]).unique())
        .with_default_doc(Document::keyed(
            doc(json!({"player_id": 1})),
            doc(json!({"player_id": 1, "name": "A"})),
        ))
}

/// `score` collection with a compound index and two seed rows.
pub fn score_definition() -> CollectionDefinition {
    CollectionDefinition::new("score")
        .with_index(Index::new([
            ("player_id", IndexKey::Ascending),
            ("points", IndexKey::Descending),
        ]))
        .with_default_doc(Document::keyed(
            doc(json!({"player_id": 1, "level": 1})),
            doc(json!({"player_id": 1, "level": 1, "points": 0})),
        ))
        .with_default_doc(Document::new(doc(json!({"player_id": 0, "level": 0, "points": 0}))))
}

/// `game` and `player`.
pub fn gaming_topology() -> Vec<CollectionDefinition> {
    vec![game_definition(), player_definition()]
}

/// Engine configuration without reconnect pauses.
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig::new(ConnectionOptions::new("memory", 27017))
        .with_reconnect_delay(Duration::ZERO)
        .with_max_wait(Duration::from_secs(10))
        .with_ping_timeout(Duration::from_millis(300))
}

/// Database configuration with millisecond polling.
pub fn fast_database_config() -> DatabaseConfig {
    DatabaseConfig::new()
        .max_wait(Duration::from_secs(10))
        .wait_step(Duration::from_millis(2))
        .max_wait_step(Duration::from_millis(20))
}

/// A shared in-memory deployment.
#[derive(Debug, Clone, Default)]
pub struct TestDeployment {
    /// The server every engine connects to.
    pub server: MemoryServer,
}

impl TestDeployment {
    /// Creates an empty deployment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a new engine, as a new process would.
    pub fn engine(&self) -> Arc<Engine> {
        self.engine_with(fast_engine_config())
    }

    /// Connects a new engine with `config`.
    pub fn engine_with(&self, config: EngineConfig) -> Arc<Engine> {
        Arc::new(Engine::connect(config, self.server.clone()).expect("Failed to connect engine"))
    }

    /// Database over a new engine.
    pub fn database(
        &self,
        name: &str,
        definitions: impl IntoIterator<Item = CollectionDefinition>,
    ) -> Database<Engine> {
        self.database_with(name, fast_database_config(), definitions)
    }

    /// Database over a new engine with `config`.
    pub fn database_with(
        &self,
        name: &str,
        config: DatabaseConfig,
        definitions: impl IntoIterator<Item = CollectionDefinition>,
    ) -> Database<Engine> {
        Database::new(name, self.engine(), config, definitions).expect("Failed to declare topology")
    }

    /// The sample gaming database over a new engine.
    pub fn gaming(&self) -> Database<Engine> {
        self.database(GAMING, gaming_topology())
    }
}

impl std::ops::Deref for TestDeployment {
    type Target = MemoryServer;

    fn deref(&self) -> &Self::Target {
        &self.server
    }
}
