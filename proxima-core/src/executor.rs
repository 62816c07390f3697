//! Background task executor
//!
//! A fixed pool of worker threads draining a multi-producer multi-consumer
//! FIFO channel. `submit` enqueues a closure and hands back a handle that
//! resolves once the closure has run; `shutdown` closes the queue, lets
//! already-queued work finish, and joins the workers.
//!
//! Within one producer thread, tasks are dequeued in submit order. Tasks
//! from distinct producers carry no ordering relative to each other.

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::thread;
use tracing::debug;

use crate::{Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a submitted task. Resolves when the task has executed.
pub struct TaskHandle<R> {
    result: Receiver<R>,
}

impl<R> TaskHandle<R> {
    /// Block until the task completes and yield its result.
    ///
    /// Fails with a background error if the task was dropped without
    /// running, e.g. because it was submitted after `shutdown`.
    pub fn wait(self) -> Result<R> {
        self.result
            .recv()
            .map_err(|_| Error::Background("task dropped before completion".to_string()))
    }
}

/// Fixed-size worker pool over an MPMC FIFO queue.
pub struct Executor {
    queue: Option<Sender<Task>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl Executor {
    /// Spawn `workers` background threads (at least one) draining the
    /// shared queue.
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = unbounded::<Task>();
        let handles = (0..workers.max(1))
            .map(|_| {
                let rx: Receiver<Task> = rx.clone();
                thread::spawn(move || {
                    while let Ok(task) = rx.recv() {
                        task();
                    }
                })
            })
            .collect();
        Self {
            queue: Some(tx),
            workers: handles,
        }
    }

    /// Enqueue a work unit and return a handle to its result.
    ///
    /// After `shutdown` the job is discarded and the handle's `wait`
    /// reports a background error.
    pub fn submit<F, R>(&self, job: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let task: Task = Box::new(move || {
            // The handle may have been dropped; the result is discarded then.
            let _ = tx.send(job());
        });
        if let Some(queue) = &self.queue {
            // The receiving side stays open until shutdown, so the send only
            // fails if every worker already exited; the handle then reports
            // a background error on wait.
            let _ = queue.send(task);
        }
        TaskHandle { result: rx }
    }

    /// Close the queue and join the workers. Work already queued completes
    /// before the workers exit.
    pub fn shutdown(&mut self) {
        if let Some(queue) = self.queue.take() {
            drop(queue);
            debug!(workers = self.workers.len(), "executor shutting down");
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_submit_and_wait() {
        let executor = Executor::new(2);
        let handle = executor.submit(|| 21 * 2);
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn test_all_submitted_tasks_complete() {
        let executor = Executor::new(4);
        let handles: Vec<_> = (0..64).map(|i| executor.submit(move || i * i)).collect();
        let results: Vec<i32> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        for (i, r) in results.iter().enumerate() {
            assert_eq!(*r, (i * i) as i32);
        }
    }

    #[test]
    fn test_shutdown_completes_pending_work() {
        let mut executor = Executor::new(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..100)
            .map(|i| {
                let log = Arc::clone(&log);
                executor.submit(move || log.lock().unwrap().push(i))
            })
            .collect();
        executor.shutdown();
        assert_eq!(log.lock().unwrap().len(), 100);
        for handle in handles {
            assert!(handle.wait().is_ok());
        }
    }

    #[test]
    fn test_submit_after_shutdown_reports_background_error() {
        let mut executor = Executor::new(1);
        executor.shutdown();
        let handle = executor.submit(|| 1);
        match handle.wait() {
            Err(Error::Background(_)) => {}
            other => panic!("expected background error, got {other:?}"),
        }
    }

    #[test]
    fn test_single_producer_fifo() {
        let executor = Executor::new(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..500)
            .map(|i| {
                let log = Arc::clone(&log);
                executor.submit(move || log.lock().unwrap().push(i))
            })
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }
        let log = log.lock().unwrap();
        assert_eq!(*log, (0..500).collect::<Vec<_>>());
    }

    // Four producer threads, a thousand jobs; each producer's entries must
    // appear in its submit order in the shared log.
    #[test]
    fn test_per_producer_fifo() {
        let executor = Arc::new(Executor::new(1));
        let log: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));

        let producers: Vec<_> = (0..4)
            .map(|producer| {
                let executor = Arc::clone(&executor);
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    let handles: Vec<_> = (0..250)
                        .map(|seq| {
                            let log = Arc::clone(&log);
                            executor.submit(move || log.lock().unwrap().push((producer, seq)))
                        })
                        .collect();
                    for handle in handles {
                        handle.wait().unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1000);
        for producer in 0..4 {
            let entries: Vec<usize> = log
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, seq)| *seq)
                .collect();
            assert_eq!(entries, (0..250).collect::<Vec<_>>());
        }
    }
}
