//! Maintenance scheduling through the engine: registered tasks run under the
//! store-backed lock, record stats, and honor timeouts. Two engines sharing
//! one store must never double-run the same task.

mod helpers;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::test_engine;
use mnema::db;
use mnema::scheduler::{recent_stats, Scheduler, SqliteLock, StubLock, TaskFn, TaskOptions};

fn counting_task(counter: Arc<AtomicU64>) -> TaskFn {
    Arc::new(move || {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
    })
}

#[tokio::test]
async fn engine_tasks_run_and_append_stats() {
    let engine = test_engine();
    let counter = Arc::new(AtomicU64::new(0));

    engine.register_maintenance_task(
        "custom",
        Duration::from_millis(15),
        TaskOptions::default(),
        counting_task(Arc::clone(&counter)),
    );

    tokio::time::sleep(Duration::from_millis(90)).await;
    engine.stop_maintenance();

    assert!(counter.load(Ordering::SeqCst) >= 2);

    let stats = engine.maintenance_stats();
    let custom = &stats["custom"];
    assert!(custom.total_runs >= 2);
    assert_eq!(custom.failures, 0);
    assert!(custom.last_error.is_none());

    let conn = engine.connection();
    let guard = conn.lock().unwrap();
    let rows = recent_stats(&guard, 20).unwrap();
    assert!(rows.iter().any(|(task, _, _)| task == "custom"));
}

#[tokio::test]
async fn timeout_is_recorded_and_task_stays_schedulable() {
    let engine = test_engine();
    let attempts = Arc::new(AtomicU64::new(0));

    let attempts_clone = Arc::clone(&attempts);
    let task: TaskFn = Arc::new(move || {
        let attempts = Arc::clone(&attempts_clone);
        Box::pin(async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(1)
        })
    });
    engine.register_maintenance_task(
        "stuck",
        Duration::from_millis(20),
        TaskOptions {
            timeout: Some(Duration::from_millis(50)),
        },
        task,
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.stop_maintenance();

    let stats = engine.maintenance_stats();
    let stuck = &stats["stuck"];
    assert!(stuck.failures >= 1);
    assert_eq!(stuck.last_error.as_deref(), Some("Task timeout"));
    // The task ran again after timing out.
    assert!(attempts.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn shared_store_runs_each_task_on_one_instance_only() {
    // Two schedulers, two lock owners, one database: the distributed lock
    // admits exactly one concurrent holder per task name.
    let conn = Arc::new(Mutex::new(db::open_memory_database(8).unwrap()));

    let scheduler_a = Scheduler::new(Arc::new(SqliteLock::new(Arc::clone(&conn))));
    let scheduler_b = Scheduler::new(Arc::new(SqliteLock::new(Arc::clone(&conn))));

    let in_flight = Arc::new(AtomicU64::new(0));
    let overlaps = Arc::new(AtomicU64::new(0));

    let make_task = || -> TaskFn {
        let in_flight = Arc::clone(&in_flight);
        let overlaps = Arc::clone(&overlaps);
        Arc::new(move || {
            let in_flight = Arc::clone(&in_flight);
            let overlaps = Arc::clone(&overlaps);
            Box::pin(async move {
                if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(30)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(1)
            })
        })
    };

    // Generous timeout so the lock TTL comfortably covers a 30ms run.
    let opts = TaskOptions {
        timeout: Some(Duration::from_millis(200)),
    };
    scheduler_a.register_interval("decay", Duration::from_millis(10), opts.clone(), make_task());
    scheduler_b.register_interval("decay", Duration::from_millis(10), opts, make_task());

    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler_a.stop_all();
    scheduler_b.stop_all();

    assert_eq!(
        overlaps.load(Ordering::SeqCst),
        0,
        "the same task ran on both instances at once"
    );
}

#[tokio::test]
async fn stock_maintenance_tasks_register() {
    let engine = test_engine();
    engine.start_maintenance();

    let stats = engine.maintenance_stats();
    for task in ["decay", "reflect", "consolidate"] {
        assert!(stats.contains_key(task), "missing stock task {task}");
    }
    engine.stop_maintenance();
}

#[tokio::test]
async fn skipped_ticks_are_not_queued() {
    let scheduler = Scheduler::new(Arc::new(StubLock));
    let counter = Arc::new(AtomicU64::new(0));

    let counter_clone = Arc::clone(&counter);
    let task: TaskFn = Arc::new(move || {
        let counter = Arc::clone(&counter_clone);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        })
    });
    scheduler.register_interval("slow", Duration::from_millis(20), TaskOptions::default(), task);

    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.stop_all();

    let runs = counter.load(Ordering::SeqCst);
    // 10 ticks fit in the window but a 50ms callback bounds execution count.
    assert!(runs <= 5, "expected skipped ticks, got {runs} runs");
    assert!(runs >= 2);
}
