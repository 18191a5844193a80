//! # docsentry schema
//!
//! Schema coordination for docsentry.
//!
//! This crate provides:
//! - Declarative collection, index and seed document definitions
//! - [`Database`], which materializes a topology exactly once across
//!   processes sharing a database
//! - A lease stored in the database itself, serializing initialization
//! - [`Collection`] handles that follow client replacements
//!
//! ## Key Invariants
//!
//! - `create_all` creates every index and seed document at most once, however
//!   many processes race on it
//! - The lease is released on every exit path of `create_all`; a crashed
//!   holder's lease expires after `lease_ttl`
//! - A reconnect rebinds collection handles and never repeats schema work
//! - Seed documents are upserted by their unique key; rerunning never
//!   duplicates rows

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod database;
mod definition;
mod error;
mod lease;

pub use collection::Collection;
pub use config::DatabaseConfig;
pub use database::{Database, InitReport};
pub use definition::{CollectionDefinition, Document, Index};
pub use error::{SchemaError, SchemaResult};
pub use lease::LeaseRecord;
