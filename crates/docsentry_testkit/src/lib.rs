//! # docsentry testkit
//!
//! Test utilities for docsentry.
//!
//! This crate provides:
//! - Fixtures: sample topologies and a shared in-memory deployment
//! - Per-operation fault injection
//! - A harness racing `create_all` across simulated processes
//! - Property-based generators for topologies
//! - Tracing setup and log capture for tests
//!
//! ## Usage
//!
//! ```rust
//! use docsentry_testkit::prelude::*;
//!
//! let deployment = TestDeployment::new();
//! let result = race_create_all(&deployment, &gaming_topology(), &RaceConfig::default());
//! assert_eq!(result.workers_that_did_work(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod race;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::race::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use race::*;
