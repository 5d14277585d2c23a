//! Fixed-size task pool the reactor dispatches handler work onto.
//!
//! Deliberately plain: a bounded set of OS threads pulling boxed
//! closures off a shared channel. No queue-depth accounting, no
//! timeouts, no priorities -- the reactor's busy flag is what bounds
//! concurrency per descriptor, not this pool.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct TaskPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Spawn `size` worker threads. `size` is
    /// `per_process_max_thread_count` from configuration.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "task pool must have at least one worker");
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(std::sync::Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("sokd-worker-{id}"))
                .spawn(move || loop {
                    let job = {
                        let guard = receiver.lock().unwrap();
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })
                .expect("failed to spawn task pool worker");
            workers.push(handle);
        }

        Self { sender: Some(sender), workers }
    }

    /// Enqueue a unit of work. Never blocks the reactor thread beyond an
    /// uncontended channel send.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn runs_every_submitted_job() {
        let pool = TaskPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(11));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            let barrier = Arc::clone(&barrier);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                barrier.wait();
            });
        }
        barrier.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
