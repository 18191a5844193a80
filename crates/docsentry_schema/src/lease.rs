//! Lease stored in the target database, serializing initialization across
//! processes.
//!
//! A lease is one document in the lock collection:
//!
//! ```text
//! { _id: "master", owner: "<uuid>" | null, acquired_at: <ms>, expires_at: <ms>, host, pid }
//! ```
//!
//! - Acquire: conditional update matching `expires_at <= now` or our own
//!   owner token, or insert when the record does not exist yet. A duplicate
//!   key on insert means the record exists; it is ours when it carries our
//!   token (the first insert was applied but its reply was lost and the
//!   engine retried it).
//! - Renew: push `expires_at` forward, matching on `owner`.
//! - Release: clear `owner` and set `expires_at` to 0, matching on `owner`.
//!
//! A holder that crashed stops renewing; its lease becomes claimable once
//! `expires_at` has passed.

use crate::error::{SchemaError, SchemaResult};
use chrono::{DateTime, Utc};
use docsentry_driver::{doc, DriverError, FindOneAndUpdateOptions, Namespace};
use docsentry_engine::Executor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lock record as stored in the lock collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Lock id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Owner token, `None` when released.
    #[serde(default)]
    pub owner: Option<String>,
    /// Acquisition time in epoch milliseconds.
    #[serde(default)]
    pub acquired_at: i64,
    /// Expiry in epoch milliseconds.
    #[serde(default)]
    pub expires_at: i64,
    /// Host name of the owner.
    #[serde(default)]
    pub host: Option<String>,
    /// Process id of the owner.
    #[serde(default)]
    pub pid: Option<u32>,
}

impl LeaseRecord {
    /// Returns true if an owner holds the lease at `now`.
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        self.owner.is_some() && self.expires_at > now.timestamp_millis()
    }

    /// Expiry as a timestamp.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expires_at)
    }
}

/// Outcome of one acquisition attempt.
#[derive(Debug)]
pub(crate) enum Claim {
    Acquired(Lease),
    Held(Option<LeaseRecord>),
}

/// A lease held by this process.
#[derive(Debug)]
pub(crate) struct Lease {
    namespace: Namespace,
    id: String,
    owner: String,
    ttl: Duration,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// A fresh owner token.
pub(crate) fn new_owner() -> String {
    Uuid::new_v4().to_string()
}

impl Lease {
    /// Makes one attempt to take the lease for `owner`.
    ///
    /// The same `owner` must be used for every attempt of one acquisition,
    /// so a write that was applied but reported as failed is recognised.
    pub(crate) fn try_acquire<E: Executor>(
        executor: &E,
        namespace: &Namespace,
        id: &str,
        owner: &str,
        ttl: Duration,
    ) -> SchemaResult<Claim> {
        let now = now_ms();
        let claim = json!({
            "owner": owner,
            "acquired_at": now,
            "expires_at": now.saturating_add(ttl_ms(ttl)),
            "host": std::env::var("HOSTNAME").ok(),
            "pid": std::process::id(),
        });

        let reclaimed = executor.run("lease_acquire", |client| {
            client.find_one_and_update(
                namespace,
                &doc(json!({
                    "_id": id,
                    "$or": [{"expires_at": {"$lte": now}}, {"owner": owner}],
                })),
                &doc(json!({"$set": claim})),
                &FindOneAndUpdateOptions::default(),
            )
        })?;

        let holder = match reclaimed {
            Some(previous) => {
                let previous_owner = previous.get("owner").and_then(Value::as_str);
                if let Some(stale) = previous_owner.filter(|o| *o != owner) {
                    warn!(lock = id, previous_owner = stale, "reclaimed expired lease");
                }
                None
            }
            None => {
                let mut record = doc(claim.clone());
                record.insert("_id".into(), Value::from(id));
                let created = executor.run("lease_create", |client| {
                    match client.insert_one(namespace, &record) {
                        Ok(_) => Ok(true),
                        Err(DriverError::DuplicateKey { .. }) => Ok(false),
                        Err(e) => Err(e),
                    }
                })?;
                if created {
                    None
                } else {
                    let current = read(executor, namespace, id)?;
                    if current.as_ref().and_then(|r| r.owner.as_deref()) == Some(owner) {
                        debug!(lock = id, owner, "lease record already carries our token");
                        None
                    } else {
                        Some(current)
                    }
                }
            }
        };

        if let Some(holder) = holder {
            return Ok(Claim::Held(holder));
        }
        debug!(lock = id, owner, "lease acquired");
        Ok(Claim::Acquired(Lease {
            namespace: namespace.clone(),
            id: id.to_string(),
            owner: owner.to_string(),
            ttl,
        }))
    }

    /// Owner token of this lease.
    pub(crate) fn owner(&self) -> &str {
        &self.owner
    }

    /// Extends the lease by its ttl.
    pub(crate) fn renew<E: Executor>(&self, executor: &E) -> SchemaResult<()> {
        let expires_at = now_ms().saturating_add(ttl_ms(self.ttl));
        let result = executor.run("lease_renew", |client| {
            client.update_one(
                &self.namespace,
                &doc(json!({"_id": self.id, "owner": self.owner})),
                &doc(json!({"$set": {"expires_at": expires_at}})),
                false,
            )
        })?;
        if result.matched_count == 0 {
            warn!(lock = %self.id, owner = %self.owner, "lease lost");
            return Err(SchemaError::LeaseLost {
                lock: self.id.clone(),
                owner: self.owner.clone(),
            });
        }
        Ok(())
    }

    /// Gives the lease up. Returns false if it was no longer ours.
    pub(crate) fn release<E: Executor>(&self, executor: &E) -> SchemaResult<bool> {
        let result = executor.run("lease_release", |client| {
            client.update_one(
                &self.namespace,
                &doc(json!({"_id": self.id, "owner": self.owner})),
                &doc(json!({"$set": {"owner": null, "expires_at": 0}})),
                false,
            )
        })?;
        let released = result.matched_count > 0;
        if released {
            debug!(lock = %self.id, owner = %self.owner, "lease released");
        } else {
            info!(lock = %self.id, owner = %self.owner, "lease was taken over before release");
        }
        Ok(released)
    }
}

/// Clears the record if it carries `owner`.
///
/// Used when an acquisition attempt fails after its write may have reached
/// the server.
pub(crate) fn abandon<E: Executor>(
    executor: &E,
    namespace: &Namespace,
    id: &str,
    owner: &str,
) -> SchemaResult<bool> {
    let result = executor.run("lease_abandon", |client| {
        client.update_one(
            namespace,
            &doc(json!({"_id": id, "owner": owner})),
            &doc(json!({"$set": {"owner": null, "expires_at": 0}})),
            false,
        )
    })?;
    Ok(result.matched_count > 0)
}

/// Reads the lock record, if any.
pub(crate) fn read<E: Executor>(
    executor: &E,
    namespace: &Namespace,
    id: &str,
) -> SchemaResult<Option<LeaseRecord>> {
    let found = executor.run("lease_read", |client| {
        client.find_one(namespace, &doc(json!({"_id": id})))
    })?;
    Ok(found.and_then(|d| serde_json::from_value(Value::Object(d)).ok()))
}
