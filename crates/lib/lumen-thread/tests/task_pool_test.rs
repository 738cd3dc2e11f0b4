use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lumen_thread::TaskPool;

#[test]
fn task_pool_runs_every_task() {
    let mut pool = TaskPool::new(num_cpus::get());
    pool.spawn_workers();

    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let counter = counter.clone();
            pool.schedule(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();

    while !handles[50].is_complete() {
        pool.help_once();
    }

    pool.terminate_until_finished();

    for handle in &handles {
        assert!(handle.is_complete());
    }
    assert_eq!(counter.load(Ordering::Relaxed), 100);
}

#[test]
fn task_handle_wait_blocks_until_done() {
    let mut pool = TaskPool::new((num_cpus::get() / 2).max(1));
    pool.spawn_workers();

    let handle = pool.schedule(|| {
        std::thread::sleep(std::time::Duration::from_millis(10));
    });

    handle.wait();
    assert!(handle.is_complete());

    pool.terminate_until_finished();
}

#[test]
fn worker_count_is_clamped_to_the_machine() {
    // asking for more workers than cores must not panic
    let mut pool = TaskPool::new(num_cpus::get() + 8);
    assert!(pool.num_workers() <= num_cpus::get());
    assert!(pool.num_workers() >= 1);

    pool.spawn_workers();
    let handle = pool.schedule(|| {});
    handle.wait();
    pool.terminate_until_finished();

    // zero is bumped up to one
    assert_eq!(TaskPool::new(0).num_workers(), 1);
}

#[test]
fn shutdown_joins_idle_workers() {
    // workers that never saw a task must still terminate promptly
    let mut pool = TaskPool::new(num_cpus::get());
    pool.spawn_workers();
    pool.terminate_until_finished();

    // and a pool that ran tasks right before shutdown joins cleanly too
    let mut pool = TaskPool::new(2);
    pool.spawn_workers();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..16 {
        let counter = counter.clone();
        pool.schedule(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }
    pool.terminate_until_finished();
    assert_eq!(counter.load(Ordering::Relaxed), 16);
}
