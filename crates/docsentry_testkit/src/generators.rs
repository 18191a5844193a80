//! Property-based test generators using proptest.
//!
//! Generated topologies are always valid: collection names are unique and
//! index fields are distinct within an index.

use docsentry_driver::{doc, IndexKey};
use docsentry_schema::{CollectionDefinition, Document, Index};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;

/// Strategy for collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for index key tokens usable in compound indexes.
pub fn index_key_strategy() -> impl Strategy<Value = IndexKey> {
    prop_oneof![Just(IndexKey::Ascending), Just(IndexKey::Descending)]
}

/// Strategy for non-unique indexes over one to three distinct fields.
///
/// Seed rows lack the indexed fields, so a unique index would reject the
/// second one.
pub fn index_strategy() -> impl Strategy<Value = Index> {
    (
        prop::collection::btree_set("[a-z]{1,6}", 1..4),
        prop::collection::vec(index_key_strategy(), 3),
    )
        .prop_map(|(fields, keys)| Index::new(fields.into_iter().zip(keys)))
}

/// Strategy for seed documents keyed by a distinct `seed` number.
pub fn seeds_strategy() -> impl Strategy<Value = Vec<Document>> {
    prop::collection::btree_set(0u32..1000, 0..4).prop_map(|ids| {
        ids.into_iter()
            .map(|id| Document::keyed(doc(json!({"seed": id})), doc(json!({"seed": id, "label": format!("row {id}")}))))
            .collect()
    })
}

/// Strategy for one collection definition named `name`.
pub fn definition_strategy(name: String) -> impl Strategy<Value = CollectionDefinition> {
    (prop::collection::vec(index_strategy(), 0..3), seeds_strategy()).prop_map(
        move |(indices, seeds)| {
            let mut definition = CollectionDefinition::new(name.clone());
            let mut names = BTreeSet::new();
            for index in indices {
                // Only the first index over a given field list survives.
                let fields: Vec<String> = index.fields.iter().map(|(f, _)| f.clone()).collect();
                if names.insert(fields) {
                    definition = definition.with_index(index);
                }
            }
            definition.default_docs = seeds;
            definition
        },
    )
}

/// Strategy for topologies of one to four collections.
pub fn topology_strategy() -> impl Strategy<Value = Vec<CollectionDefinition>> {
    prop::collection::btree_set(collection_name_strategy(), 1..5).prop_flat_map(|names| {
        names
            .into_iter()
            .map(definition_strategy)
            .collect::<Vec<_>>()
    })
}
