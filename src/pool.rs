//! Background workers behind a counted gate.
//!
//! The dispatch thread is the only producer. Before each submission it takes a
//! [`Permit`] from the [`Gate`], which blocks while the number of jobs in
//! flight has reached the ceiling. The permit travels with the job and is
//! released when the job finishes, waking the producer.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
};

use tracing::trace;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Gate {
    ceiling: usize,
    in_flight: Mutex<usize>,
    cond: Condvar,
    peak: AtomicUsize,
}

impl Gate {
    pub fn new(ceiling: usize) -> Result<Self> {
        if ceiling == 0 {
            return Err(Error::Config("in-flight ceiling must be at least 1".to_owned()));
        }
        Ok(Self {
            ceiling,
            in_flight: Mutex::new(0),
            cond: Condvar::new(),
            peak: AtomicUsize::new(0),
        })
    }

    // the counter stays consistent even if a job panicked while holding it
    fn count(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until fewer than `ceiling` jobs are in flight, then counts one more.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut in_flight = self.count();
        while *in_flight >= self.ceiling {
            trace!(in_flight = *in_flight, "waiting for a free slot");
            in_flight = self
                .cond
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_flight += 1;
        self.peak.fetch_max(*in_flight, Ordering::Relaxed);
        Permit {
            gate: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut in_flight = self.count();
        *in_flight -= 1;
        self.cond.notify_all();
    }

    pub fn in_flight(&self) -> usize {
        *self.count()
    }

    /// The most jobs ever in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Blocks until no job is in flight.
    pub fn wait_idle(&self) {
        let mut in_flight = self.count();
        while *in_flight > 0 {
            in_flight = self
                .cond
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// One counted slot of a [`Gate`], released on drop.
#[derive(Debug)]
pub struct Permit {
    gate: Arc<Gate>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// A fixed set of worker threads fed through a [`Gate`].
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    gate: Arc<Gate>,
}

impl WorkerPool {
    pub fn new(threads: usize, ceiling: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::Config("pool size must be at least 1".to_owned()));
        }
        let gate = Arc::new(Gate::new(ceiling)?);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gateway-worker-{i}"))
            .build()?;
        Ok(Self { pool, gate })
    }

    /// Queues `job`, blocking first while the gate is closed.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let permit = self.gate.acquire();
        self.pool.spawn(move || {
            job();
            drop(permit);
        });
    }

    /// Blocks until every submitted job has finished.
    pub fn drain(&self) {
        self.gate.wait_idle();
    }

    pub fn peak_in_flight(&self) -> usize {
        self.gate.peak()
    }

    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }
}
