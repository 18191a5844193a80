//! Declarative collection, index and seed document definitions.

use crate::error::{SchemaError, SchemaResult};
use docsentry_driver::{Document as RawDocument, IndexKey, IndexModel};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

/// Index declared on a collection.
///
/// Field order is the key order of a compound index. Fields serialize as a
/// list of `[field, token]` pairs so the order survives a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Ordered key pattern.
    #[serde(with = "index_fields")]
    pub fields: Vec<(String, IndexKey)>,
    /// Explicit name; generated from the collection and fields when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    /// Creates a non-unique index over `fields`, in order.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, IndexKey)>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(|(f, k)| (f.into(), k)).collect(),
            name: None,
            unique: false,
        }
    }

    /// Single-field ascending index.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new([(field.into(), IndexKey::Ascending)])
    }

    /// Sets an explicit name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Name the index is created under on `collection`.
    ///
    /// Unnamed indexes get `ix__<collection>__<f1>_<f2>`, or `ux__...` when
    /// unique.
    pub fn resolved_name(&self, collection: &str) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let prefix = if self.unique { "ux" } else { "ix" };
        let fields: Vec<&str> = self.fields.iter().map(|(f, _)| f.as_str()).collect();
        format!("{prefix}__{collection}__{}", fields.join("_"))
    }

    /// Driver form of the index on `collection`.
    pub fn to_model(&self, collection: &str) -> IndexModel {
        IndexModel {
            keys: self.fields.clone(),
            name: self.resolved_name(collection),
            unique: self.unique,
        }
    }
}

/// A seed row inserted when a collection is materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Fields identifying the row; the upsert predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_key: Option<RawDocument>,
    /// Full body of the row.
    pub data: RawDocument,
}

impl Document {
    /// Seed row matched by its whole body.
    pub fn new(data: RawDocument) -> Self {
        Self {
            unique_key: None,
            data,
        }
    }

    /// Seed row matched by `unique_key`.
    pub fn keyed(unique_key: RawDocument, data: RawDocument) -> Self {
        Self {
            unique_key: Some(unique_key),
            data,
        }
    }

    /// Filter used to find an existing copy of the row.
    pub fn filter(&self) -> RawDocument {
        self.unique_key.clone().unwrap_or_else(|| self.data.clone())
    }

    /// Update inserting `data` only when no row matches.
    pub fn upsert_update(&self) -> RawDocument {
        let mut update = RawDocument::new();
        update.insert("$setOnInsert".into(), Value::Object(self.data.clone()));
        update
    }
}

/// Declarative description of one collection.
///
/// # Example
///
/// ```rust
/// use docsentry_driver::{doc, IndexKey};
/// use docsentry_schema::{CollectionDefinition, Document, Index};
/// use serde_json::json;
///
/// let player = CollectionDefinition::new("player")
///     .with_index(Index::new([("player_id", IndexKey::Ascending)]).unique())
///     .with_default_doc(Document::keyed(
///         doc(json!({"player_id": 1})),
///         doc(json!({"player_id": 1, "name": "A"})),
///     ));
/// assert!(player.validate().is_ok());
/// assert_eq!(player.index_names(), vec!["ux__player__player_id"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    /// Collection name, unique within a topology.
    pub name: String,
    /// Indexes to create.
    #[serde(default)]
    pub indices: Vec<Index>,
    /// Seed rows to upsert.
    #[serde(default)]
    pub default_docs: Vec<Document>,
}

impl CollectionDefinition {
    /// Creates a definition without indexes or seed rows.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indices: Vec::new(),
            default_docs: Vec::new(),
        }
    }

    /// Adds an index.
    #[must_use]
    pub fn with_index(mut self, index: Index) -> Self {
        self.indices.push(index);
        self
    }

    /// Adds a seed row.
    #[must_use]
    pub fn with_default_doc(mut self, document: Document) -> Self {
        self.default_docs.push(document);
        self
    }

    /// Resolved names of all declared indexes, in declaration order.
    pub fn index_names(&self) -> Vec<String> {
        self.indices
            .iter()
            .map(|i| i.resolved_name(&self.name))
            .collect()
    }

    /// Checks the definition can be materialized.
    pub fn validate(&self) -> SchemaResult<()> {
        let invalid = |reason: String| SchemaError::InvalidDefinition {
            name: self.name.clone(),
            reason,
        };
        if self.name.is_empty() {
            return Err(invalid("collection name is empty".into()));
        }
        if self.name.contains('$') || self.name.starts_with("system.") {
            return Err(invalid(format!("collection name {:?} is reserved", self.name)));
        }

        let mut names = HashSet::new();
        for index in &self.indices {
            let name = index.resolved_name(&self.name);
            if index.fields.is_empty() {
                return Err(invalid(format!("index {name} has no fields")));
            }
            let mut fields = HashSet::new();
            if let Some((field, _)) = index.fields.iter().find(|(f, _)| !fields.insert(f)) {
                return Err(invalid(format!("index {name} repeats field {field}")));
            }
            if !names.insert(name.clone()) {
                return Err(invalid(format!("index {name} is declared twice")));
            }
        }

        if let Some(seed) = self.default_docs.iter().find(|d| d.data.is_empty()) {
            return Err(invalid(format!(
                "seed document with key {} has no data",
                json!(seed.unique_key)
            )));
        }
        Ok(())
    }
}

mod index_fields {
    use docsentry_driver::IndexKey;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        fields: &[(String, IndexKey)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&str, Value)> = fields
            .iter()
            .map(|(field, key)| (field.as_str(), key.to_value()))
            .collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, IndexKey)>, D::Error> {
        let pairs = Vec::<(String, Value)>::deserialize(deserializer)?;
        pairs
            .into_iter()
            .map(|(field, token)| {
                IndexKey::from_value(&token)
                    .map(|key| (field, key))
                    .ok_or_else(|| D::Error::custom(format!("unknown index key {token}")))
            })
            .collect()
    }
}
