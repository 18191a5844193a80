//! # docsentry engine
//!
//! Reconnecting connection manager for docsentry.
//!
//! This crate provides:
//! - The [`Executor`] capability contract (run, hooks, reconnect, dispose)
//! - [`Engine`], the production executor with its retry state machine
//! - [`DirectExecutor`], an executor without recovery for tests
//! - Ordered reconnect hooks with failure isolation
//!
//! ## Architecture
//!
//! The engine runs each operation against a snapshot of its client. A
//! connectivity failure triggers one recovery cycle:
//! 1. Take the transition lock (bounded by `max_wait`)
//! 2. Build a fresh client and swap it in
//! 3. Notify reconnect hooks in registration order
//! 4. Run the operation once more
//!
//! ## Key Invariants
//!
//! - At most one reconnect or dispose in flight
//! - Concurrent failures observed on the same client cause one replacement
//! - A disposed engine stays disposed
//! - `ping` never triggers a reconnect and never blocks past its timeout

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod direct;
mod engine;
mod error;
mod executor;
mod hooks;

pub use config::EngineConfig;
pub use direct::DirectExecutor;
pub use engine::{Engine, EngineStats};
pub use error::{EngineError, EngineResult};
pub use executor::{EngineState, Executor, HookResult};
pub use hooks::HookRegistry;
