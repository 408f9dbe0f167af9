// SPDX-License-Identifier: MIT OR Apache-2.0
//! Primitive invariants under contention and cancellation.

use corun_cancel::{CancellationSource, CancellationToken};
use corun_sync::{Deferred, DeferredError, DeferredStatus, Monitor, Mutex, Semaphore, Signal, WaitGroup, WaitHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn semaphore_permits_are_zero_while_anyone_waits() {
    let semaphore = Arc::new(Semaphore::new(2));
    semaphore.acquire().await;
    semaphore.acquire().await;

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let semaphore = Arc::clone(&semaphore);
        waiters.push(tokio::spawn(async move { semaphore.acquire().await }));
        tokio::task::yield_now().await;
    }
    // Waiters exist, so the visible balance must be zero.
    assert_eq!(semaphore.permits(), 0);

    // Each release feeds exactly one queued waiter, never the balance.
    for _ in 0..3 {
        semaphore.release(1);
        tokio::task::yield_now().await;
        assert_eq!(semaphore.permits(), 0);
    }
    for waiter in waiters {
        waiter.await.unwrap();
    }
    semaphore.release(2);
    assert_eq!(semaphore.permits(), 2);
}

#[tokio::test]
async fn waitgroup_counter_is_the_sum_of_deltas() {
    let group = Arc::new(WaitGroup::new());
    group.add(3);
    group.add(2);
    assert_eq!(group.count(), 5);

    let done = Arc::new(AtomicUsize::new(0));
    let waiter = {
        let group = Arc::clone(&group);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            group.wait().await;
            done.store(1, Ordering::SeqCst);
        })
    };
    for _ in 0..4 {
        group.done();
        tokio::task::yield_now().await;
        assert_eq!(done.load(Ordering::SeqCst), 0, "woke before zero");
    }
    group.done();
    waiter.await.unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn signal_wakes_every_current_waiter_at_once() {
    let signal = Arc::new(Signal::new());
    let released = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..5 {
        let signal = Arc::clone(&signal);
        let released = Arc::clone(&released);
        handles.push(tokio::spawn(async move {
            signal.wait().await;
            released.fetch_add(1, Ordering::SeqCst);
        }));
    }
    tokio::task::yield_now().await;
    assert_eq!(released.load(Ordering::SeqCst), 0);
    signal.notify();
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn mutex_lock_until_leaves_no_residue_on_cancellation() {
    let mutex = Arc::new(Mutex::new());
    mutex.lock().await;

    let source = CancellationSource::new();
    let token = source.token();
    let blocked = {
        let mutex = Arc::clone(&mutex);
        tokio::spawn(async move { mutex.lock_until(&token).await })
    };
    tokio::task::yield_now().await;
    source.cancel();
    assert!(blocked.await.unwrap().is_err());

    // The cancelled waiter must not have disturbed the lock.
    assert!(mutex.is_locked());
    mutex.unlock();
    assert!(mutex.try_lock());
}

#[tokio::test]
async fn monitor_pulse_is_not_retained_between_rounds() {
    let monitor = Arc::new(Monitor::new());
    assert_eq!(monitor.pulse_all(), 0);

    let first_round = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.wait().await })
    };
    tokio::task::yield_now().await;
    assert_eq!(monitor.waiter_count(), 1);
    assert!(monitor.pulse_one());
    first_round.await.unwrap();
    assert_eq!(monitor.waiter_count(), 0);
}

#[tokio::test]
async fn deferred_status_is_terminal_for_every_observer() {
    let deferred: Deferred<u32> = Deferred::new();
    let statuses = Arc::new(std::sync::Mutex::new(Vec::new()));
    for _ in 0..3 {
        let statuses = Arc::clone(&statuses);
        deferred.on_done(move |status| statuses.lock().unwrap().push(status));
    }
    deferred.reject(anyhow::anyhow!("failed"));
    assert!(!deferred.resolve(1));
    assert_eq!(
        *statuses.lock().unwrap(),
        vec![DeferredStatus::Rejected; 3]
    );
    for _ in 0..2 {
        assert!(matches!(
            deferred.wait().await,
            Err(DeferredError::Rejected(_))
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn wait_timeout_is_equivalent_to_a_timeout_token() {
    let signal = Signal::new();
    let by_timeout = signal.wait_timeout(Duration::from_millis(10)).await;
    assert!(by_timeout.is_err());

    let token = CancellationToken::with_timeout(Duration::from_millis(10));
    let by_token = signal.wait_until(&token).await;
    assert!(by_token.is_err());
}

#[tokio::test]
async fn mixed_primitive_pipeline_rendezvous() {
    // Producers push through a gate, a wait group tracks completion, and
    // a monitor signals the consumer that a batch is ready.
    let gate = Arc::new(Signal::new());
    let group = Arc::new(WaitGroup::new());
    let monitor = Arc::new(Monitor::new());
    let produced = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        group.add(1);
        let gate = Arc::clone(&gate);
        let group = Arc::clone(&group);
        let produced = Arc::clone(&produced);
        tokio::spawn(async move {
            gate.wait().await;
            produced.fetch_add(1, Ordering::SeqCst);
            group.done();
        });
    }
    let consumer = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.wait().await })
    };
    tokio::task::yield_now().await;

    gate.notify();
    group.wait().await;
    assert_eq!(produced.load(Ordering::SeqCst), 4);
    assert!(monitor.pulse_one());
    consumer.await.unwrap();
}
