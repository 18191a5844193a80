//! Documents, namespaces, index models and operation results.

use serde_json::Value;
use std::fmt;

/// A document: an ordered mapping of field names to values.
pub type Document = serde_json::Map<String, Value>;

/// Builds a [`Document`] from a `serde_json::json!` object literal.
///
/// Non-object values produce an empty document.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Fully qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
}

impl Namespace {
    /// Creates a namespace.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Direction or type of one index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// Ascending order (`1`).
    Ascending,
    /// Descending order (`-1`).
    Descending,
    /// Full text index (`"text"`).
    Text,
    /// Hashed index (`"hashed"`).
    Hashed,
    /// Spherical geometry index (`"2dsphere"`).
    Geo2dSphere,
}

impl IndexKey {
    /// Returns the token the server uses for this key.
    pub fn to_value(self) -> Value {
        match self {
            IndexKey::Ascending => Value::from(1),
            IndexKey::Descending => Value::from(-1),
            IndexKey::Text => Value::from("text"),
            IndexKey::Hashed => Value::from("hashed"),
            IndexKey::Geo2dSphere => Value::from("2dsphere"),
        }
    }

    /// Parses a server token.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) if v > 0.0 => Some(IndexKey::Ascending),
                Some(v) if v < 0.0 => Some(IndexKey::Descending),
                _ => None,
            },
            Value::String(s) => match s.as_str() {
                "text" => Some(IndexKey::Text),
                "hashed" => Some(IndexKey::Hashed),
                "2dsphere" => Some(IndexKey::Geo2dSphere),
                _ => None,
            },
            _ => None,
        }
    }

    /// Short suffix used in generated index names.
    pub fn suffix(self) -> &'static str {
        match self {
            IndexKey::Ascending => "1",
            IndexKey::Descending => "-1",
            IndexKey::Text => "text",
            IndexKey::Hashed => "hashed",
            IndexKey::Geo2dSphere => "2dsphere",
        }
    }
}

/// An index as created on, or listed from, a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexModel {
    /// Key pattern; order is significant for compound indexes.
    pub keys: Vec<(String, IndexKey)>,
    /// Index name.
    pub name: String,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl IndexModel {
    /// The index every collection has on `_id`.
    pub fn primary() -> Self {
        Self {
            keys: vec![("_id".into(), IndexKey::Ascending)],
            name: "_id_".into(),
            unique: true,
        }
    }

    /// Returns true if the key pattern and uniqueness match `other`.
    pub fn same_definition(&self, other: &IndexModel) -> bool {
        self.keys == other.keys && self.unique == other.unique
    }

    /// Renders the key pattern as a document.
    pub fn key_document(&self) -> Document {
        self.keys
            .iter()
            .map(|(field, key)| (field.clone(), key.to_value()))
            .collect()
    }
}

/// Options for `find`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Fields to include (`1`) or exclude (`0`).
    pub projection: Option<Document>,
    /// Number of matching documents to skip.
    pub skip: usize,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
}

impl FindOptions {
    /// Sets the projection.
    #[must_use]
    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Sets the limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the skip.
    #[must_use]
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
}

/// Which version of a document `find_one_and_update` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    /// The document as it was before the update.
    #[default]
    Before,
    /// The document after the update.
    After,
}

/// Options for `find_one_and_update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOneAndUpdateOptions {
    /// Insert a document when nothing matches.
    pub upsert: bool,
    /// Which version to return.
    pub return_document: ReturnDocument,
}

/// Result of `insert_one`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// `_id` of the inserted document.
    pub inserted_id: Value,
}

/// Result of `insert_many`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    /// `_id`s of the inserted documents, in input order.
    pub inserted_ids: Vec<Value>,
}

/// Result of `update_one` and `update_many`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateResult {
    /// Documents matched by the filter.
    pub matched_count: u64,
    /// Documents actually changed.
    pub modified_count: u64,
    /// `_id` of the inserted document when the update upserted.
    pub upserted_id: Option<Value>,
}

/// Result of `delete_one` and `delete_many`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteResult {
    /// Documents removed.
    pub deleted_count: u64,
}
