use crossbeam::channel;
use std::thread;

/*
    Fixed-size worker pool used for the parallelisable operator phases
    (per-column histogram construction, per-chunk sort materialisation).
    Callers submit closures and join through their own result channel.
    Dropping the pool closes the job channel and joins all workers.
*/

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    workers: Vec<Worker>,
    sender: Option<channel::Sender<Job>>,
}

struct Worker {
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> WorkerPool {
        assert!(size > 0, "worker pool needs at least one thread");
        let (sender, receiver) = channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let receiver = receiver.clone();
            let thread = thread::spawn(move || loop {
                match receiver.recv() {
                    Ok(job) => job(),
                    Err(_) => break, // channel closed, exit loop
                }
            });
            workers.push(Worker { thread: Some(thread) });
        }

        WorkerPool { workers, sender: Some(sender) }
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .as_ref()
            .expect("pool already shut down")
            .send(Box::new(f))
            .expect("worker pool channel closed");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
    use std::sync::Arc;

    #[test]
    fn runs_all_jobs() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel::unbounded();
        for _ in 0..64 {
            let counter = counter.clone();
            let tx = tx.clone();
            pool.execute(move || {
                counter.fetch_add(1, Relaxed);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..64 {
            rx.recv().unwrap();
        }
        assert_eq!(counter.load(Relaxed), 64);
    }

    #[test]
    fn drop_joins_workers() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            pool.execute(move || {
                counter.fetch_add(1, Relaxed);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Relaxed), 8);
    }
}
