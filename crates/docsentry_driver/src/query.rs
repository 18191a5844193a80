//! Filter matching and update application for the in-memory server.
//!
//! Supports the subset of the query language the schema layer and typical
//! callers rely on:
//!
//! - equality on top-level and dotted fields (arrays match by element)
//! - `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`
//! - top-level `$and` / `$or`
//! - updates with `$set`, `$unset`, `$inc`, `$setOnInsert`, or a replacement
//! - aggregation stages `$match`, `$sort`, `$skip`, `$limit`, `$project`,
//!   `$count`

use crate::document::Document;
use crate::error::{DriverError, DriverResult};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Looks up a dotted path.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Compares two values for equality, treating `1` and `1.0` as equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn is_operator_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

/// Returns true if `doc` satisfies `filter`.
///
/// # Errors
///
/// Returns `BadValue` for unknown operators or malformed operands.
pub fn matches(doc: &Document, filter: &Document) -> DriverResult<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let clauses = clause_list(key, condition)?;
                let mut all = true;
                for clause in clauses {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let clauses = clause_list(key, condition)?;
                let mut any = false;
                for clause in clauses {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(DriverError::bad_value(format!(
                    "unknown top level operator: {op}"
                )))
            }
            path => matches_condition(lookup(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clause_list<'a>(operator: &str, value: &'a Value) -> DriverResult<Vec<&'a Document>> {
    let Value::Array(items) = value else {
        return Err(DriverError::bad_value(format!("{operator} needs an array")));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            _ => Err(DriverError::bad_value(format!(
                "{operator} entries must be objects"
            ))),
        })
        .collect()
}

fn equals_or_contains(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
        // A missing field matches `null`.
        None => expected.is_null(),
    }
}

fn matches_condition(value: Option<&Value>, condition: &Value) -> DriverResult<bool> {
    let Value::Object(operators) = condition else {
        return Ok(equals_or_contains(value, condition));
    };
    if !is_operator_object(condition) {
        return Ok(equals_or_contains(value, condition));
    }

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => equals_or_contains(value, operand),
            "$ne" => !equals_or_contains(value, operand),
            "$gt" => ordered(value, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(value, operand, |o| o != Ordering::Less),
            "$lt" => ordered(value, operand, |o| o == Ordering::Less),
            "$lte" => ordered(value, operand, |o| o != Ordering::Greater),
            "$in" => in_list(op, value, operand)?,
            "$nin" => !in_list(op, value, operand)?,
            "$exists" => {
                let wanted = match operand {
                    Value::Bool(b) => *b,
                    Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
                    _ => return Err(DriverError::bad_value("$exists needs a boolean")),
                };
                value.is_some() == wanted
            }
            other => {
                return Err(DriverError::bad_value(format!("unknown operator: {other}")));
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn ordered(value: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| compare(item, operand).is_some_and(&accept)),
        Some(actual) => compare(actual, operand).is_some_and(accept),
        None => false,
    }
}

fn in_list(op: &str, value: Option<&Value>, operand: &Value) -> DriverResult<bool> {
    let Value::Array(candidates) = operand else {
        return Err(DriverError::bad_value(format!("{op} needs an array")));
    };
    Ok(candidates
        .iter()
        .any(|candidate| equals_or_contains(value, candidate)))
}

/// Sets a dotted path, creating intermediate objects.
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> DriverResult<()> {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return Err(DriverError::bad_value("empty field path"));
    };
    let mut current = doc;
    for part in parts {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => {
                return Err(DriverError::bad_value(format!(
                    "cannot create field {path}: {part} is not an object"
                )))
            }
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

fn unset_path(doc: &mut Document, path: &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };
    let mut current = doc;
    for part in parts {
        current = match current.get_mut(part) {
            Some(Value::Object(map)) => map,
            _ => return,
        };
    }
    current.remove(last);
}

/// Returns true if `update` uses update operators rather than replacing the document.
pub fn is_operator_update(update: &Document) -> DriverResult<bool> {
    let operators = update.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        return Ok(false);
    }
    if operators != update.len() {
        return Err(DriverError::bad_value(
            "update mixes operators and replacement fields",
        ));
    }
    Ok(true)
}

/// Applies `update` to `doc`. `inserting` enables `$setOnInsert`.
///
/// The `_id` of an existing document cannot change.
pub fn apply_update(doc: &mut Document, update: &Document, inserting: bool) -> DriverResult<()> {
    let original_id = doc.get("_id").cloned();

    if !is_operator_update(update)? {
        let mut replacement = update.clone();
        if let Some(id) = &original_id {
            match replacement.get("_id") {
                Some(new_id) if !values_equal(new_id, id) => {
                    return Err(DriverError::bad_value("_id field is immutable"));
                }
                _ => {
                    replacement.insert("_id".into(), id.clone());
                }
            }
        }
        *doc = replacement;
        return Ok(());
    }

    for (op, fields) in update {
        let Value::Object(fields) = fields else {
            return Err(DriverError::bad_value(format!("{op} needs an object")));
        };
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (path, value) in fields {
                        set_path(doc, path, value.clone())?;
                    }
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    unset_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    let current = lookup(doc, path).cloned().unwrap_or(Value::from(0));
                    let next = add_numbers(&current, delta).ok_or_else(|| {
                        DriverError::bad_value(format!("cannot apply $inc to field {path}"))
                    })?;
                    set_path(doc, path, next)?;
                }
            }
            other => {
                return Err(DriverError::bad_value(format!(
                    "unknown update operator: {other}"
                )));
            }
        }
    }

    if !inserting {
        if let Some(id) = original_id {
            match doc.get("_id") {
                Some(new_id) if values_equal(new_id, &id) => {}
                _ => return Err(DriverError::bad_value("_id field is immutable")),
            }
        }
    }
    Ok(())
}

fn add_numbers(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x.checked_add(y).map(Value::from);
            }
            serde_json::Number::from_f64(x.as_f64()? + y.as_f64()?).map(Value::Number)
        }
        _ => None,
    }
}

/// Builds the document an upsert starts from: the equality predicates of `filter`.
pub fn upsert_seed(filter: &Document) -> DriverResult<Document> {
    let mut seed = Document::new();
    collect_equalities(filter, &mut seed)?;
    Ok(seed)
}

fn collect_equalities(filter: &Document, seed: &mut Document) -> DriverResult<()> {
    for (key, condition) in filter {
        if key == "$and" {
            for clause in clause_list(key, condition)? {
                collect_equalities(clause, seed)?;
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        if is_operator_object(condition) {
            if let Some(value) = condition.get("$eq") {
                set_path(seed, key, value.clone())?;
            }
            continue;
        }
        set_path(seed, key, condition.clone())?;
    }
    Ok(())
}

/// Applies an inclusion or exclusion projection.
pub fn project(doc: &Document, projection: &Document) -> DriverResult<Document> {
    let truthy = |v: &Value| match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        _ => true,
    };
    let include_id = projection.get("_id").map_or(true, |v| truthy(v));
    let fields: Vec<(&String, bool)> = projection
        .iter()
        .filter(|(k, _)| k.as_str() != "_id")
        .map(|(k, v)| (k, truthy(v)))
        .collect();

    if fields.is_empty() {
        let mut out = doc.clone();
        if !include_id {
            out.remove("_id");
        }
        return Ok(out);
    }

    let inclusion = fields[0].1;
    if fields.iter().any(|(_, flag)| *flag != inclusion) {
        return Err(DriverError::bad_value(
            "projection cannot mix inclusion and exclusion",
        ));
    }

    let mut out = if inclusion {
        let mut out = Document::new();
        for (path, _) in &fields {
            if let Some(value) = lookup(doc, path) {
                set_path(&mut out, path, value.clone())?;
            }
        }
        if include_id {
            if let Some(id) = doc.get("_id") {
                out.insert("_id".into(), id.clone());
            }
        }
        out
    } else {
        let mut out = doc.clone();
        for (path, _) in &fields {
            unset_path(&mut out, path);
        }
        out
    };
    if !include_id {
        out.remove("_id");
    }
    Ok(out)
}

fn stage_count(stage: &str, operand: &Value) -> DriverResult<usize> {
    operand
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| DriverError::bad_value(format!("{stage} needs a non-negative integer")))
}

fn stage_document<'a>(stage: &str, operand: &'a Value) -> DriverResult<&'a Document> {
    match operand {
        Value::Object(map) => Ok(map),
        _ => Err(DriverError::bad_value(format!("{stage} needs a document"))),
    }
}

fn sort_documents(docs: &mut [Document], keys: &Document) -> DriverResult<()> {
    let mut order = Vec::with_capacity(keys.len());
    for (path, direction) in keys {
        match direction.as_i64() {
            Some(1) => order.push((path.as_str(), false)),
            Some(-1) => order.push((path.as_str(), true)),
            _ => {
                return Err(DriverError::bad_value(format!(
                    "$sort direction for {path} must be 1 or -1"
                )))
            }
        }
    }
    if order.is_empty() {
        return Err(DriverError::bad_value("$sort needs at least one key"));
    }
    docs.sort_by(|a, b| {
        for (path, descending) in &order {
            let left = lookup(a, path).unwrap_or(&Value::Null);
            let right = lookup(b, path).unwrap_or(&Value::Null);
            // Missing fields sort first, like null.
            let ordering = match (left.is_null(), right.is_null()) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => compare(left, right).unwrap_or(Ordering::Equal),
            };
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

/// Runs an aggregation pipeline over `docs`.
///
/// # Errors
///
/// Returns `BadValue` for unknown stages or malformed operands.
pub fn aggregate(mut docs: Vec<Document>, pipeline: &[Document]) -> DriverResult<Vec<Document>> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, operand)), None) = (entries.next(), entries.next()) else {
            return Err(DriverError::bad_value(
                "a pipeline stage must have exactly one field",
            ));
        };
        docs = match name.as_str() {
            "$match" => {
                let filter = stage_document(name, operand)?;
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$sort" => {
                sort_documents(&mut docs, stage_document(name, operand)?)?;
                docs
            }
            "$skip" => docs.into_iter().skip(stage_count(name, operand)?).collect(),
            "$limit" => docs.into_iter().take(stage_count(name, operand)?).collect(),
            "$project" => {
                let projection = stage_document(name, operand)?;
                docs.iter()
                    .map(|doc| project(doc, projection))
                    .collect::<DriverResult<_>>()?
            }
            "$count" => {
                let Some(field) = operand.as_str().filter(|f| !f.is_empty() && !f.starts_with('$'))
                else {
                    return Err(DriverError::bad_value("$count needs a field name"));
                };
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut out = Document::new();
                    out.insert(field.to_string(), Value::from(docs.len() as u64));
                    vec![out]
                }
            }
            other => {
                return Err(DriverError::bad_value(format!(
                    "unsupported pipeline stage: {other}"
                )))
            }
        };
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::doc;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample() -> Document {
        doc(json!({
            "_id": 1,
            "name": "Pratchett",
            "books": 41,
            "genres": ["fantasy", "satire"],
            "address": {"city": "Beaconsfield"}
        }))
    }

    #[test]
    fn equality_and_paths() {
        let d = sample();
        assert!(matches(&d, &doc(json!({"name": "Pratchett"}))).unwrap());
        assert!(matches(&d, &doc(json!({"address.city": "Beaconsfield"}))).unwrap());
        assert!(matches(&d, &doc(json!({"genres": "satire"}))).unwrap());
        assert!(matches(&d, &doc(json!({"books": 41.0}))).unwrap());
        assert!(!matches(&d, &doc(json!({"name": "Gaiman"}))).unwrap());
        assert!(matches(&d, &doc(json!({"missing": null}))).unwrap());
        assert!(matches(&d, &doc(json!({}))).unwrap());
    }

    #[test]
    fn comparison_operators() {
        let d = sample();
        assert!(matches(&d, &doc(json!({"books": {"$gt": 40, "$lte": 41}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"books": {"$lt": 41}}))).unwrap());
        assert!(matches(&d, &doc(json!({"name": {"$in": ["Gaiman", "Pratchett"]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"name": {"$nin": ["Gaiman"]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"name": {"$ne": "Gaiman"}}))).unwrap());
        assert!(matches(&d, &doc(json!({"missing": {"$exists": false}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"books": {"$gt": "forty"}}))).unwrap());
    }

    #[test]
    fn logical_operators() {
        let d = sample();
        let or = doc(json!({"$or": [{"name": "Gaiman"}, {"books": {"$gte": 41}}]}));
        assert!(matches(&d, &or).unwrap());
        let and = doc(json!({"$and": [{"name": "Pratchett"}, {"books": 40}]}));
        assert!(!matches(&d, &and).unwrap());
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let d = sample();
        assert!(matches!(
            matches(&d, &doc(json!({"books": {"$regex": "4"}}))),
            Err(DriverError::BadValue(_))
        ));
        assert!(matches!(
            matches(&d, &doc(json!({"$where": "true"}))),
            Err(DriverError::BadValue(_))
        ));
    }

    #[test]
    fn update_operators() {
        let mut d = sample();
        apply_update(
            &mut d,
            &doc(json!({"$set": {"address.zip": "HP9"}, "$inc": {"books": 1}, "$unset": {"genres": ""}})),
            false,
        )
        .unwrap();
        assert_eq!(lookup(&d, "address.zip"), Some(&json!("HP9")));
        assert_eq!(d.get("books"), Some(&json!(42)));
        assert!(!d.contains_key("genres"));
    }

    #[test]
    fn set_on_insert_only_applies_when_inserting() {
        let mut d = sample();
        apply_update(&mut d, &doc(json!({"$setOnInsert": {"seeded": true}})), false).unwrap();
        assert!(!d.contains_key("seeded"));
        apply_update(&mut d, &doc(json!({"$setOnInsert": {"seeded": true}})), true).unwrap();
        assert_eq!(d.get("seeded"), Some(&json!(true)));
    }

    #[test]
    fn replacement_keeps_id() {
        let mut d = sample();
        apply_update(&mut d, &doc(json!({"name": "Gaiman"})), false).unwrap();
        assert_eq!(d.get("_id"), Some(&json!(1)));
        assert_eq!(d.len(), 2);

        let err = apply_update(&mut d, &doc(json!({"_id": 2, "name": "x"})), false);
        assert!(matches!(err, Err(DriverError::BadValue(_))));
    }

    #[test]
    fn mixed_update_is_rejected() {
        let mut d = sample();
        let err = apply_update(&mut d, &doc(json!({"$set": {"a": 1}, "b": 2})), false);
        assert!(matches!(err, Err(DriverError::BadValue(_))));
    }

    #[test]
    fn upsert_seed_takes_equalities() {
        let filter = doc(json!({
            "_id": "master",
            "expires_at": {"$lte": 10},
            "kind": {"$eq": "lock"},
            "$and": [{"scope.name": "schema"}]
        }));
        let seed = upsert_seed(&filter).unwrap();
        assert_eq!(seed.get("_id"), Some(&json!("master")));
        assert_eq!(seed.get("kind"), Some(&json!("lock")));
        assert_eq!(lookup(&seed, "scope.name"), Some(&json!("schema")));
        assert!(!seed.contains_key("expires_at"));
    }

    #[test]
    fn projections() {
        let d = sample();
        let only_id = project(&d, &doc(json!({"_id": 1}))).unwrap();
        assert_eq!(only_id, d);

        let name = project(&d, &doc(json!({"name": 1}))).unwrap();
        assert_eq!(name, doc(json!({"_id": 1, "name": "Pratchett"})));

        let without = project(&d, &doc(json!({"genres": 0, "address": 0, "_id": 0}))).unwrap();
        assert_eq!(without, doc(json!({"name": "Pratchett", "books": 41})));

        assert!(project(&d, &doc(json!({"name": 1, "books": 0}))).is_err());
    }

    fn games() -> Vec<Document> {
        vec![
            doc(json!({"_id": 1, "title": "Root", "genre": "board", "players": 4})),
            doc(json!({"_id": 2, "title": "Hades", "genre": "action", "players": 1})),
            doc(json!({"_id": 3, "title": "Azul", "genre": "board", "players": 2})),
            doc(json!({"_id": 4, "title": "Tetris", "genre": "puzzle"})),
        ]
    }

    #[test]
    fn aggregate_match_sort_limit_project() {
        let pipeline = [
            doc(json!({"$match": {"genre": "board"}})),
            doc(json!({"$sort": {"players": 1}})),
            doc(json!({"$limit": 1})),
            doc(json!({"$project": {"title": 1, "_id": 0}})),
        ];
        let out = aggregate(games(), &pipeline).unwrap();
        assert_eq!(out, vec![doc(json!({"title": "Azul"}))]);
    }

    #[test]
    fn aggregate_sort_places_missing_fields_first() {
        let out = aggregate(games(), &[doc(json!({"$sort": {"players": -1, "_id": 1}}))]).unwrap();
        let ids: Vec<_> = out.iter().map(|d| d["_id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(3), json!(2), json!(4)]);
    }

    #[test]
    fn aggregate_skip_and_count() {
        let out = aggregate(
            games(),
            &[doc(json!({"$skip": 1})), doc(json!({"$count": "rest"}))],
        )
        .unwrap();
        assert_eq!(out, vec![doc(json!({"rest": 3}))]);

        let none = aggregate(
            games(),
            &[doc(json!({"$match": {"genre": "rpg"}})), doc(json!({"$count": "n"}))],
        )
        .unwrap();
        assert!(none.is_empty());
        assert_eq!(aggregate(games(), &[]).unwrap().len(), 4);
    }

    #[test]
    fn aggregate_rejects_malformed_stages() {
        for stage in [
            json!({"$group": {"_id": "$genre"}}),
            json!({"$limit": -1}),
            json!({"$sort": {"players": 2}}),
            json!({"$count": ""}),
            json!({"$match": {"a": 1}, "$limit": 1}),
        ] {
            let err = aggregate(games(), &[doc(stage.clone())]).unwrap_err();
            assert!(matches!(err, DriverError::BadValue(_)), "{stage}");
        }
    }

    proptest! {
        #[test]
        fn document_matches_its_own_fields(n in any::<i64>(), s in "[a-z]{0,12}") {
            let d = doc(json!({"n": n, "s": s}));
            prop_assert!(matches(&d, &d).unwrap());
            prop_assert!(matches(&d, &upsert_seed(&d).unwrap()).unwrap());
        }

        #[test]
        fn gt_and_lte_partition(a in -1000i64..1000, b in -1000i64..1000) {
            let d = doc(json!({"v": a}));
            let gt = matches(&d, &doc(json!({"v": {"$gt": b}}))).unwrap();
            let lte = matches(&d, &doc(json!({"v": {"$lte": b}}))).unwrap();
            prop_assert!(gt != lte);
        }
    }
}
