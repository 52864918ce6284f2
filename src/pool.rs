//! # Summary
//!
//! Fixed-size pool of long-lived worker threads draining one shared FIFO
//! queue. Jobs are plain closures, so the pool knows nothing about the
//! requests it runs. The queue is unbounded: under sustained overload it
//! grows without backpressure.

use std::collections::VecDeque;
use std::panic;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::error::{KvError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Pool {
    name: String,
    #[derivative(Debug = "ignore")]
    shared: Arc<Shared>,
    size: usize,
    #[derivative(Debug = "ignore")]
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

struct State {
    jobs: VecDeque<Job>,
    stopped: bool,
}

impl Pool {
    /// Spawns `size` workers named `<name>-<index>`.
    pub fn new<N: Into<String>>(name: N, size: usize) -> Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        });
        let workers = (0..size.max(1))
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("{}-{}", name, index))
                    .spawn(move || work(&shared))
                    .map_err(|error| KvError::CouldNotSpawn(error.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("started {} with {} workers", name, workers.len());
        Ok(Pool {
            name,
            shared,
            size: workers.len(),
            workers: Mutex::new(workers),
        })
    }

    /// Enqueues `job` and wakes one idle worker.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where F: FnOnce() + Send + 'static
    {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return Err(KvError::ShuttingDown)
        }
        state.jobs.push_back(Box::new(job));
        self.shared.available.notify_one();
        Ok(())
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stops every worker once its current job finishes, drops queued
    /// jobs, and joins the worker threads. Must not be called from a job.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            let dropped = state.jobs.len();
            state.jobs.clear();
            if dropped > 0 {
                warn!("{} dropping {} queued jobs", self.name, dropped);
            }
            self.shared.available.notify_all();
        }
        let workers = std::mem::replace(&mut *self.workers.lock(), Vec::new());
        for worker in workers {
            worker.join().ok();
        }
        debug!("stopped {}", self.name);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if state.stopped { return }
                if let Some(job) = state.jobs.pop_front() { break job }
                shared.available.wait(&mut state);
            }
        };
        if panic::catch_unwind(panic::AssertUnwindSafe(job)).is_err() {
            error!("job panicked in {:?}", thread::current().name());
        }
    }
}
