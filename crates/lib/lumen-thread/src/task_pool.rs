use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_deque::Injector as GlobalQueue;

use crate::worker::Worker;

type TaskFunc = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Task {
    func: Option<TaskFunc>,
    complete: Arc<AtomicBool>,
}

impl Task {
    fn new(func: TaskFunc) -> Self {
        Self {
            func: Some(func),
            complete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn execute(&mut self) {
        // function call only be executed once.
        if let Some(func) = self.func.take() {
            func();
        }
        self.complete.store(true, Ordering::Release);
    }

    fn handle(&self) -> TaskHandle {
        TaskHandle {
            complete: self.complete.clone(),
        }
    }
}

/// Task handle to check if a scheduled task is done.
#[derive(Clone)]
pub struct TaskHandle {
    complete: Arc<AtomicBool>,
}

impl TaskHandle {
    /// If the task is completed.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Wait for current task to complete.
    /// It will block current thread until the pool finished the task.
    pub fn wait(&self) {
        while !self.is_complete() {
            std::thread::yield_now();
        }
    }
}

/// Work-stealing worker pool scheduling frame execution and renderpack
/// loading.
///
/// Tasks land in a global injector queue; every worker drains its own local
/// deque first and steals from the injector or its coworkers when that runs
/// dry. "Suspension" in the engine is nothing more than a task waiting on
/// another task's [`TaskHandle`]; cancellation is a task that never gets
/// scheduled.
pub struct TaskPool {
    /// Shared by all the worker threads, which steal tasks from it.
    global_queue: Arc<GlobalQueue<Task>>,
    stop: Arc<AtomicBool>,
    workers: Vec<Worker>,
    num_workers: usize,
}

impl TaskPool {
    /// Requests beyond the core count are clamped, more workers than cores
    /// buys nothing.
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.clamp(1, num_cpus::get().max(1));

        Self {
            global_queue: Arc::new(GlobalQueue::new()),
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            num_workers,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Spawn the worker threads.
    /// Until you call this function, no thread will be created by the pool.
    pub fn spawn_workers(&mut self) {
        if !self.workers.is_empty() {
            return;
        }

        for index in 0..self.num_workers {
            self.workers.push(Worker::new(
                self.global_queue.clone(),
                format!("lumen worker {}", index),
            ));
        }

        for index in 0..self.num_workers {
            let coworkers: Vec<_> = self
                .workers
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != index)
                .map(|(_, worker)| worker.stealer())
                .collect();
            self.workers[index].launch(coworkers, self.stop.clone());
        }
    }

    /// Schedule a task that will be consumed by the worker threads.
    pub fn schedule<F>(&self, func: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(!self.workers.is_empty(), "No worker threads in this task pool!");

        let task = Task::new(Box::new(func));
        let handle = task.handle();

        self.global_queue.push(task);
        handle
    }

    /// Try pop one task from the pool and execute it in current thread.
    /// This can be useful to avoid deadlock scenarios when a task is waiting
    /// for another task to finish.
    pub fn help_once(&self) {
        if let Some(mut task) = self.global_queue.steal().success() {
            task.execute();
        }
    }

    /// Terminate all worker threads, blocking until the queued tasks are done
    /// and every worker is joined.
    pub fn terminate_until_finished(&mut self) {
        while !self.global_queue.is_empty() {
            self.help_once();
        }

        // a worker may still hold stolen tasks in its local deque
        while self.workers.iter().any(|worker| !worker.is_idle()) {
            self.help_once();
        }

        self.stop.store(true, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new((num_cpus::get() / 2).max(1))
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.terminate_until_finished();
        }
    }
}
