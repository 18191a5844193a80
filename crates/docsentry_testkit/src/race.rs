//! Concurrency harness racing `create_all` across simulated processes.
//!
//! Every simulated process gets its own engine and database handle over the
//! shared deployment; its threads share that handle. All workers start
//! together behind a barrier.

use crate::fixtures::TestDeployment;
use docsentry_engine::Engine;
use docsentry_schema::{CollectionDefinition, Database, DatabaseConfig, InitReport, SchemaError};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for a race.
#[derive(Debug, Clone)]
pub struct RaceConfig {
    /// Number of simulated processes.
    pub processes: usize,
    /// Threads per process.
    pub threads_per_process: usize,
    /// Argument passed to `create_all`.
    pub skip_existing: bool,
    /// Database name.
    pub database: String,
    /// Database configuration of every process.
    pub config: DatabaseConfig,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            processes: 4,
            threads_per_process: 2,
            skip_existing: true,
            database: crate::fixtures::GAMING.into(),
            config: crate::fixtures::fast_database_config(),
        }
    }
}

/// Outcome of one worker.
#[derive(Debug)]
pub struct WorkerOutcome {
    /// Index of the simulated process.
    pub process: usize,
    /// Index of the thread within the process.
    pub thread: usize,
    /// What `create_all` returned.
    pub result: Result<InitReport, SchemaError>,
}

/// Result of a race.
#[derive(Debug)]
pub struct RaceResult {
    /// Per-worker outcomes, in completion order.
    pub outcomes: Vec<WorkerOutcome>,
    /// Database handle of each process.
    pub databases: Vec<Database<Engine>>,
    /// Wall time of the race.
    pub duration: Duration,
}

impl RaceResult {
    /// Successful reports.
    pub fn reports(&self) -> impl Iterator<Item = &InitReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Errors returned by workers.
    pub fn errors(&self) -> impl Iterator<Item = &SchemaError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    /// Number of workers whose call created anything.
    pub fn workers_that_did_work(&self) -> usize {
        self.reports().filter(|r| r.did_work()).count()
    }

    /// Total seed documents inserted across workers.
    pub fn documents_inserted(&self) -> u64 {
        self.reports().map(|r| r.documents_inserted).sum()
    }

    /// Total indexes created across workers.
    pub fn indexes_created(&self) -> usize {
        self.reports().map(|r| r.indexes_created.len()).sum()
    }
}

/// Runs `create_all` from every worker at once.
pub fn race_create_all(
    deployment: &TestDeployment,
    topology: &[CollectionDefinition],
    config: &RaceConfig,
) -> RaceResult {
    let databases: Vec<Database<Engine>> = (0..config.processes)
        .map(|_| {
            deployment.database_with(&config.database, config.config.clone(), topology.to_vec())
        })
        .collect();

    let workers = config.processes * config.threads_per_process;
    let barrier = Arc::new(Barrier::new(workers));
    let start = Instant::now();

    let handles: Vec<_> = databases
        .iter()
        .enumerate()
        .flat_map(|(process, db)| {
            let barrier = Arc::clone(&barrier);
            let skip_existing = config.skip_existing;
            (0..config.threads_per_process).map(move |worker| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    WorkerOutcome {
                        process,
                        thread: worker,
                        result: db.create_all(skip_existing),
                    }
                })
            })
        })
        .collect();

    let outcomes = handles
        .into_iter()
        .map(|h| h.join().expect("Worker panicked"))
        .collect();

    RaceResult {
        outcomes,
        databases,
        duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::gaming_topology;

    #[test]
    fn single_worker() {
        let deployment = TestDeployment::new();
        let result = race_create_all(
            &deployment,
            &gaming_topology(),
            &RaceConfig {
                processes: 1,
                threads_per_process: 1,
                ..RaceConfig::default()
            },
        );
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.workers_that_did_work(), 1);
        assert_eq!(result.documents_inserted(), 1);
        assert_eq!(result.errors().count(), 0);
    }
}
