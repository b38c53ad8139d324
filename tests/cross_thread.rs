//! Handles cloned into threads and async tasks.
//!
//! The borrow rule is checked with one atomic compare-and-swap per attempt, so
//! clones used concurrently must never observe a writer together with any
//! other view, and the payload must still be destroyed exactly once.

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use anyhandle::prelude::*;

/// Payload that detects overlapping exclusive access.
#[derive(Default)]
struct Guarded {
    writing: AtomicBool,
    total: u64,
}

#[test]
fn test_concurrent_writers_never_overlap() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 2_000;

    let handle = AnyHandle::new(Guarded::default());
    let barrier = Arc::new(Barrier::new(THREADS));
    let successes = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let handle = handle.clone();
            let barrier = Arc::clone(&barrier);
            let successes = Arc::clone(&successes);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let Some(mut guarded) = handle.try_borrow_exclusive::<Guarded>() else {
                        continue;
                    };
                    assert!(!guarded.writing.swap(true, Ordering::SeqCst));
                    guarded.total += 1;
                    guarded.writing.store(false, Ordering::SeqCst);
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let guarded = handle.try_borrow_shared::<Guarded>().unwrap();
    assert_eq!(guarded.total, successes.load(Ordering::SeqCst) as u64);
    assert_eq!(handle.handle_count(), 2);
}

#[test]
fn test_readers_and_writers_exclude_each_other() {
    const THREADS: usize = 6;

    let handle = AnyHandle::new(vec![0u32; 16]);
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|index| {
            let handle = handle.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..1_000u32 {
                    if index % 2 == 0 {
                        if let Some(mut values) = handle.try_borrow_exclusive::<Vec<u32>>() {
                            values.iter_mut().for_each(|value| *value = round);
                        }
                    } else if let Some(values) = handle.try_borrow_shared::<Vec<u32>>() {
                        // A writer never runs while this view exists, so the
                        // vector is never half-updated.
                        assert!(values.iter().all(|value| *value == values[0]));
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert!(handle.borrow_state().is_unborrowed());
}

#[test]
fn test_last_clone_dropped_on_another_thread() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    struct Payload;

    impl Drop for Payload {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let handle = AnyHandle::new(Payload);
    let view = handle.try_borrow_shared::<Payload>().unwrap();
    drop(handle);

    thread::spawn(move || view.release()).join().unwrap();
    assert_eq!(DROPS.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clones_in_async_tasks() {
    let handle = AnyHandle::new(0u64);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move {
                loop {
                    if let Some(mut counter) = handle.try_borrow_exclusive::<u64>() {
                        *counter += 1;
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(*handle.try_borrow_shared::<u64>().unwrap(), 32);
    assert!(handle.has_no_copies());
}

#[tokio::test]
async fn test_view_held_across_await() {
    let handle = AnyHandle::new(String::from("state"));
    let view = handle.try_borrow_shared::<String>().unwrap();

    let length = tokio::spawn(async move {
        tokio::task::yield_now().await;
        view.len()
    })
    .await
    .unwrap();

    assert_eq!(length, 5);
    assert!(handle.try_borrow_exclusive::<String>().is_some());
}
