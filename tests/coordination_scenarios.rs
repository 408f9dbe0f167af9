// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-crate coordination scenarios: primitives, pools, executors, and
//! cancellation working together.

use corun::prelude::*;
use corun_cancel::CancelReason;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("corun=debug")),
        )
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn sequential_executor_preserves_order_end_to_end() {
    init_tracing();
    let executor = Arc::new(SequentialExecutor::new());
    let recorded = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..10 {
        let executor = Arc::clone(&executor);
        let recorded = Arc::clone(&recorded);
        handles.push(tokio::spawn(async move {
            executor
                .execute(
                    move || async move {
                        recorded.lock().unwrap().push(i);
                    },
                    &CancellationToken::none(),
                )
                .await
                .unwrap();
        }));
        tokio::task::yield_now().await;
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*recorded.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn worker_pool_bounds_concurrency_under_a_gate() {
    let pool = WorkerPool::new(WorkerPoolConfig {
        max_concurrency: 3,
        max_queue_length: 32,
    })
    .unwrap();
    let gate = Arc::new(Signal::new());
    let observed = Arc::new(AtomicUsize::new(0));
    let group = Arc::new(WaitGroup::new());
    for _ in 0..10 {
        let gate = Arc::clone(&gate);
        let observed = Arc::clone(&observed);
        let group = Arc::clone(&group);
        group.add(1);
        pool.submit(async move {
            observed.fetch_add(1, Ordering::SeqCst);
            gate.wait().await;
            group.done();
        })
        .unwrap();
    }
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    // Before the gate opens, at most max_concurrency tasks have started.
    assert_eq!(observed.load(Ordering::SeqCst), 3);
    gate.notify();
    group.wait().await;
    assert_eq!(observed.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn waitgroup_tracks_jobs_across_a_pool() {
    let jobs = JobPool::with_defaults();
    let group = Arc::new(WaitGroup::new());
    let sum = Arc::new(AtomicUsize::new(0));
    let mut submitted = Vec::new();
    for i in 1..=5usize {
        group.add(1);
        let group = Arc::clone(&group);
        let sum = Arc::clone(&sum);
        submitted.push(
            jobs.submit(
                move || async move {
                    sum.fetch_add(i, Ordering::SeqCst);
                    group.done();
                    Ok(i)
                },
                &CancellationToken::none(),
            )
            .unwrap(),
        );
    }
    group.wait().await;
    assert_eq!(sum.load(Ordering::SeqCst), 15);
    for job in submitted {
        assert!(job.result().await.is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn combined_timeout_drives_a_deferred() {
    // The farthest timeout wins the combine.
    let combined = CancellationToken::combine([
        CancellationToken::with_timeout(Duration::from_millis(1)),
        CancellationToken::with_timeout(Duration::from_millis(5)),
        CancellationToken::with_timeout(Duration::from_millis(10)),
    ]);
    let deferred: Deferred<i32> = Deferred::bound_to(&combined);
    tokio::time::sleep(Duration::from_millis(12)).await;
    assert_eq!(deferred.status(), DeferredStatus::RejectedCancelled);
    match deferred.wait().await {
        Err(corun_sync::DeferredError::Cancelled(err)) => {
            assert_eq!(err.token_id(), combined.id());
            assert!(matches!(err.reason(), CancelReason::Timeout(_)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn semaphore_gates_shared_resource_access() {
    let semaphore = Arc::new(Semaphore::new(2));
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let semaphore = Arc::clone(&semaphore);
        let in_use = Arc::clone(&in_use);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            semaphore.acquire().await;
            let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            in_use.fetch_sub(1, Ordering::SeqCst);
            semaphore.release(1);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(semaphore.permits(), 2);
}

#[tokio::test]
async fn monitor_coordinates_producer_and_consumers() {
    let monitor = Arc::new(Monitor::new());
    let ready = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..3 {
        let monitor = Arc::clone(&monitor);
        let ready = Arc::clone(&ready);
        handles.push(tokio::spawn(async move {
            monitor.wait().await;
            ready.fetch_add(1, Ordering::SeqCst);
        }));
    }
    tokio::task::yield_now().await;
    assert_eq!(monitor.pulse_all(), 3);
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(ready.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn delay_respects_deadline_and_cancellation() {
    let deadline = Deadline::after(Duration::from_millis(50));
    delay(Duration::from_millis(10), &CancellationToken::none())
        .await
        .unwrap();
    assert!(!deadline.is_expired());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(deadline.is_expired());
}

#[tokio::test]
async fn mutex_hands_off_across_suspension_points() {
    let mutex = Arc::new(Mutex::new());
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..4 {
        let mutex = Arc::clone(&mutex);
        let log = Arc::clone(&log);
        handles.push(tokio::spawn(async move {
            mutex.lock().await;
            log.lock().unwrap().push(format!("enter {i}"));
            tokio::task::yield_now().await;
            log.lock().unwrap().push(format!("exit {i}"));
            mutex.unlock();
        }));
        tokio::task::yield_now().await;
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let log = log.lock().unwrap();
    // Every enter is immediately followed by the matching exit.
    for pair in log.chunks(2) {
        assert_eq!(
            pair[0].replace("enter", "exit"),
            pair[1],
            "critical sections interleaved: {log:?}"
        );
    }
}
