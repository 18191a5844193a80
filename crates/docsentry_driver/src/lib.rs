//! # docsentry driver
//!
//! Document database client contract for docsentry.
//!
//! This crate is the lowest layer of docsentry. It describes what the upper
//! layers need from a document database driver and nothing more:
//!
//! - [`Client`] - a live connection handle running single operations
//! - [`ClientFactory`] - builds clients from [`ConnectionOptions`]; called
//!   again on every reconnect
//! - [`DriverError`] - failures, split into connectivity errors (worth a
//!   reconnect) and data errors (never retried)
//!
//! ## Design Principles
//!
//! - Clients never retry; recovery belongs to the engine above
//! - Clients are replaced, not repaired
//! - Must be `Send + Sync` for use from many threads
//!
//! ## Available Clients
//!
//! - [`MemoryServer`] / [`MemoryClient`] - an in-process deployment shared by
//!   many clients, with fault injection for failover tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod document;
mod error;
mod memory;
mod options;
pub mod query;

pub use client::{Client, ClientFactory};
pub use document::{
    doc, DeleteResult, Document, FindOneAndUpdateOptions, FindOptions, IndexKey, IndexModel,
    InsertManyResult, InsertOneResult, Namespace, ReturnDocument, UpdateResult,
};
pub use error::{DriverError, DriverResult, RETRYABLE_WRITE_CODES};
pub use memory::{MemoryClient, MemoryServer};
pub use options::{ConnectionOptions, Credentials};
