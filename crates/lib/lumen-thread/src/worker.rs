use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_deque::{Injector, Stealer, Worker as LocalQueue};

use crate::task_pool::Task;

/// One worker thread of a [`TaskPool`](crate::TaskPool).
///
/// Each worker owns a local deque and falls back to stealing, first a batch
/// from the global injector and then single tasks from its coworkers.
pub(crate) struct Worker {
    idle: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stealer: Stealer<Task>,
    /// Moved into the thread on launch.
    local_queue: Option<LocalQueue<Task>>,
    global_queue: Arc<Injector<Task>>,
    name: String,
}

impl Worker {
    pub(crate) fn new(global_queue: Arc<Injector<Task>>, name: String) -> Self {
        let local_queue: LocalQueue<Task> = LocalQueue::new_fifo();

        Self {
            idle: Arc::new(AtomicBool::new(true)),
            handle: None,
            stealer: local_queue.stealer(),
            local_queue: Some(local_queue),
            global_queue,
            name,
        }
    }

    pub(crate) fn stealer(&self) -> Stealer<Task> {
        self.stealer.clone()
    }

    /// Spawn the thread and begin pulling tasks.
    ///
    /// The thread re-checks `stop` between tasks, so shutdown never races a
    /// parked worker: an idle worker yields instead of blocking.
    pub(crate) fn launch(&mut self, coworkers: Vec<Stealer<Task>>, stop: Arc<AtomicBool>) {
        let local_queue = match self.local_queue.take() {
            Some(queue) => queue,
            // already launched
            None => return,
        };
        let global_queue = self.global_queue.clone();
        let idle = self.idle.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    // busy while scanning, so shutdown never observes an idle
                    // worker that is about to come up with a task
                    idle.store(false, Ordering::SeqCst);

                    let next = local_queue.pop().or_else(|| {
                        std::iter::repeat_with(|| {
                            global_queue
                                .steal_batch_and_pop(&local_queue)
                                .or_else(|| coworkers.iter().map(|s| s.steal()).collect())
                        })
                        .find(|steal| !steal.is_retry())
                        .and_then(|steal| steal.success())
                    });

                    match next {
                        Some(mut task) => task.execute(),
                        None => {
                            idle.store(true, Ordering::SeqCst);
                            thread::yield_now();
                        }
                    }
                }
                log::trace!("{} terminated", thread::current().name().unwrap_or("worker"));
            })
            .expect("Failed to spawn task pool worker thread!");

        self.handle = Some(handle);
    }

    /// Idle means the local deque is drained and the last steal came up dry.
    pub(crate) fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    pub(crate) fn join(self) {
        if let Some(handle) = self.handle {
            handle.join().expect("Task pool worker thread panicked!");
        }
    }
}
