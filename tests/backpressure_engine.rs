use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use streamgate::{
    BackpressureEngine, EngineConfig, Observability, PipelineActivity, ProcessFault, ProcessFn,
    StreamRecord, SubmitError,
};

fn record(offset: i64) -> StreamRecord {
    StreamRecord::new("orders", 0, offset, format!("payload-{offset}"))
}

fn config(workers: usize, capacity: usize) -> EngineConfig {
    EngineConfig {
        max_concurrency: workers,
        queue_capacity: capacity,
        dequeue_interval: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(2),
    }
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let limit = Instant::now() + deadline;
    while Instant::now() < limit {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn submit_blocks_at_capacity_and_unblocks_on_dequeue() {
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let process: ProcessFn = Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let engine = Arc::new(BackpressureEngine::new(
        "orders",
        config(1, 2),
        process,
        Observability::new("orders", "orders"),
    ));

    engine.submit(record(0)).unwrap();
    engine.submit(record(1)).unwrap();
    assert_eq!(engine.depth(), 2);

    let submitted = Arc::new(AtomicBool::new(false));
    let producer_flag = Arc::clone(&submitted);
    let producer_engine = Arc::clone(&engine);
    let producer = thread::spawn(move || {
        producer_engine.submit(record(2)).unwrap();
        producer_flag.store(true, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(150));
    assert!(
        !submitted.load(Ordering::SeqCst),
        "third submit must block while the queue is full"
    );

    // Workers start draining; the blocked producer must complete.
    engine.start();
    assert!(wait_until(Duration::from_secs(2), || {
        submitted.load(Ordering::SeqCst)
    }));
    producer.join().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        processed.load(Ordering::SeqCst) == 3
    }));
    engine.stop();
}

#[test]
fn worker_pool_processes_all_submitted_records() {
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let process: ProcessFn = Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let engine = BackpressureEngine::new(
        "orders",
        config(3, 4),
        process,
        Observability::new("orders", "orders"),
    );
    engine.start();
    for offset in 0..12 {
        engine.submit(record(offset)).unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || {
        processed.load(Ordering::SeqCst) == 12
    }));
    engine.stop();
    assert_eq!(engine.depth(), 0);
}

#[test]
fn recoverable_fault_is_recorded_and_worker_continues() {
    let process: ProcessFn = Arc::new(|record| {
        if record.offset == 1 {
            Err(ProcessFault::Recoverable("handler exploded".to_string()))
        } else {
            Ok(())
        }
    });
    let observability = Observability::new("orders", "orders");
    let engine = BackpressureEngine::new("orders", config(1, 8), process, observability.clone());
    engine.start();
    for offset in 0..3 {
        engine.submit(record(offset)).unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || {
        observability.telemetry().failed() == 1
    }));
    engine.stop();

    let failures: Vec<_> = observability
        .activity()
        .snapshot()
        .into_iter()
        .filter(|activity| matches!(activity, PipelineActivity::MessageFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        PipelineActivity::MessageFailed { offset, error, .. } => {
            assert_eq!(*offset, 1);
            assert_eq!(error, "handler exploded");
        }
        other => panic!("expected MessageFailed, got {other:?}"),
    }
}

#[test]
fn fatal_fault_reaches_hook_without_stopping_the_worker() {
    let fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let hook_slot = Arc::clone(&fatal);
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let process: ProcessFn = Arc::new(move |record| {
        if record.offset == 0 {
            Err(ProcessFault::Fatal("audit trail lost".to_string()))
        } else {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    let engine = BackpressureEngine::new(
        "orders",
        config(1, 4),
        process,
        Observability::new("orders", "orders"),
    )
    .with_fatal_hook(move |error| {
        *hook_slot.lock().unwrap() = Some(error);
    });
    engine.start();
    engine.submit(record(0)).unwrap();
    engine.submit(record(1)).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        processed.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(
        fatal.lock().unwrap().as_deref(),
        Some("audit trail lost"),
        "fatal hook must receive the fault description"
    );
    engine.stop();
}

#[test]
fn submit_after_stop_hands_the_record_back() {
    let process: ProcessFn = Arc::new(|_| Ok(()));
    let engine = BackpressureEngine::new(
        "orders",
        config(1, 2),
        process,
        Observability::new("orders", "orders"),
    );
    engine.start();
    engine.stop();
    match engine.submit(record(7)) {
        Err(SubmitError::Closed(returned)) => assert_eq!(returned.offset, 7),
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[test]
fn stop_waits_for_in_flight_work() {
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let process: ProcessFn = Arc::new(move |_| {
        thread::sleep(Duration::from_millis(100));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let engine = BackpressureEngine::new(
        "orders",
        config(1, 2),
        process,
        Observability::new("orders", "orders"),
    );
    engine.start();
    engine.submit(record(0)).unwrap();
    // Give the worker time to dequeue before stopping.
    thread::sleep(Duration::from_millis(30));
    engine.stop();
    assert_eq!(
        processed.load(Ordering::SeqCst),
        1,
        "in-flight message must finish within the grace period"
    );
}

#[test]
fn worker_lifecycle_is_observable() {
    let process: ProcessFn = Arc::new(|_| Ok(()));
    let observability = Observability::new("orders", "orders");
    let engine = BackpressureEngine::new("orders", config(2, 2), process, observability.clone());
    engine.start();
    assert!(wait_until(Duration::from_secs(2), || {
        observability
            .activity()
            .snapshot()
            .iter()
            .filter(|activity| matches!(activity, PipelineActivity::WorkerStarted { .. }))
            .count()
            == 2
    }));
    engine.stop();
    let stopped = observability
        .activity()
        .snapshot()
        .iter()
        .filter(|activity| matches!(activity, PipelineActivity::WorkerStopped { .. }))
        .count();
    assert_eq!(stopped, 2);
}
