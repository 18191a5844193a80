//! Failover tests for the engine.

use docsentry_driver::{doc, Client, ClientFactory, ConnectionOptions, DriverResult, MemoryServer, Namespace};
use docsentry_engine::{Engine, EngineConfig, EngineError, EngineState, Executor};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn config() -> EngineConfig {
    EngineConfig::new(ConnectionOptions::new("replica-a", 27017))
        .with_reconnect_delay(Duration::ZERO)
        .with_max_wait(Duration::from_secs(10))
        .with_ping_timeout(Duration::from_millis(300))
}

fn ns() -> Namespace {
    Namespace::new("gaming", "game")
}

#[test]
fn one_reconnect_per_failure() {
    let server = MemoryServer::new();
    let engine = Engine::connect(config(), server.clone()).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    for n in 0..4 {
        let order = Arc::clone(&order);
        engine.register_hook(move |_: &Engine| {
            order.lock().push(n);
            Ok(())
        });
    }

    server.step_down();
    let inserted = engine
        .run("insert_one", |c| c.insert_one(&ns(), &doc(json!({"genre": "rpg"}))))
        .unwrap();
    assert!(inserted.inserted_id.is_string());

    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    assert_eq!(engine.stats().reconnects, 1);
    assert_eq!(server.connection_count(), 2);
    assert_eq!(server.snapshot(&ns()).len(), 1);
}

#[test]
fn retried_operation_runs_on_new_client() {
    let server = MemoryServer::new();
    let engine = Engine::connect(config(), server.clone()).unwrap();
    let first = engine.client().unwrap();
    let seen: Mutex<Vec<*const ()>> = Mutex::new(Vec::new());

    server.fail_next(1);
    engine
        .run("count_documents", |c| {
            seen.lock().push(std::ptr::from_ref(c).cast::<()>());
            c.count_documents(&ns(), &doc(json!({})))
        })
        .unwrap();

    let seen = seen.into_inner();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], Arc::as_ptr(&first).cast::<()>());
    assert_ne!(seen[0], seen[1]);
}

#[test]
fn concurrent_failures_replace_client_once() {
    let server = MemoryServer::new();
    let engine = Arc::new(Engine::connect(config(), server.clone()).unwrap());
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let hooks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hooks);
    engine.register_hook(move |_: &Engine| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    // Every thread observes the stale client before any of them recovers.
    server.step_down();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.run("count_documents", |c| c.count_documents(&ns(), &doc(json!({}))))
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 0);
    }
    assert_eq!(engine.generation(), 1);
    assert_eq!(hooks.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 2);
}

#[test]
fn persistent_outage_surfaces_after_one_retry() {
    let server = MemoryServer::new();
    let engine = Engine::connect(config(), server.clone()).unwrap();
    server.sever();

    let attempts = AtomicUsize::new(0);
    let err = engine
        .run("delete_many", |c| {
            attempts.fetch_add(1, Ordering::SeqCst);
            c.delete_many(&ns(), &doc(json!({})))
        })
        .unwrap_err();

    assert!(err.is_connectivity());
    assert!(matches!(err, EngineError::Connectivity { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    server.restore();
    assert_eq!(
        engine
            .run("delete_many", |c| c.delete_many(&ns(), &doc(json!({}))))
            .unwrap()
            .deleted_count,
        0
    );
}

#[test]
fn reconnect_and_dispose_race() {
    for _ in 0..20 {
        let server = MemoryServer::new();
        let engine = Arc::new(Engine::connect(config(), server.clone()).unwrap());
        let barrier = Arc::new(Barrier::new(2));

        let reconnecting = {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.reconnect()
            })
        };
        let disposing = {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.dispose()
            })
        };

        let reconnected = reconnecting.join().unwrap();
        disposing.join().unwrap().unwrap();

        assert!(matches!(reconnected, Ok(()) | Err(EngineError::Disposed)));
        assert_eq!(engine.state(), EngineState::Disposed);
        assert!(engine.client().is_err());
        assert!(!engine.ping(None));
    }
}

#[test]
fn ping_on_severed_connection_is_bounded() {
    let server = MemoryServer::new();
    let engine = Engine::connect(config(), server.clone()).unwrap();
    server.sever();
    let started = Instant::now();
    assert!(!engine.ping(Some("gaming")));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(engine.generation(), 0);
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn ping_does_not_wait_for_a_hung_driver() {
    let server = MemoryServer::new();
    let engine = Engine::connect(config(), server.clone()).unwrap();
    server.delay_ping(Some(Duration::from_secs(2)));
    let started = Instant::now();
    assert!(!engine.ping(None));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn failed_recovery_keeps_engine_usable() {
    let server = MemoryServer::new();
    let engine = Engine::connect(config(), server.clone()).unwrap();
    server.fail_next(1);
    server.refuse_connections(true);

    let err = engine
        .run("find_one", |c| c.find_one(&ns(), &doc(json!({}))))
        .unwrap_err();
    assert!(matches!(err, EngineError::Reconnect { .. }));
    assert_eq!(engine.state(), EngineState::Connected);

    server.refuse_connections(false);
    assert!(engine
        .run("find_one", |c| c.find_one(&ns(), &doc(json!({}))))
        .unwrap()
        .is_none());
    assert_eq!(engine.generation(), 0);
}

#[test]
fn closure_factory() {
    let server = MemoryServer::new();
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let factory = move |options: &ConnectionOptions| -> DriverResult<Arc<dyn Client>> {
        counter.fetch_add(1, Ordering::SeqCst);
        server.connect(options)
    };

    let engine = Engine::connect(config(), factory).unwrap();
    engine.reconnect().unwrap();
    engine.reconnect().unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 3);
    assert_eq!(engine.generation(), 2);
}
