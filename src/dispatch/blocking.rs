//! The round-robin loop shared by the serial and preemptive dispatchers.
//!
//! The loop owns every device's blocking session. A device is polled only
//! while its `is_processed` flag is set; offloaded workloads clear the flag
//! on submission and set it again from the worker once done, which keeps
//! `status`, `next_event`, the workload and the next `status` strictly
//! ordered per device.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Instant,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::{
    config::Config,
    error::{Error, Result},
    lifecycle::{LifecycleSink, Stage},
    poll::{self, Device, EventId},
    pool::WorkerPool,
    session::sync::SyncSession,
    workload::Workload,
};

use super::RunReport;

/// Set while a device may be polled again.
#[derive(Debug)]
pub struct Processed(Mutex<bool>);

impl Processed {
    fn new() -> Self {
        Self(Mutex::new(true))
    }

    pub fn get(&self) -> bool {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, processed: bool) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = processed;
    }
}

/// A device as the loop sees it.
#[derive(Debug)]
pub struct DeviceSlot {
    pub device: Device,
    pub index: usize,
    pub processed: Arc<Processed>,
    session: SyncSession,
}

impl DeviceSlot {
    fn new(index: usize, device: Device) -> Self {
        Self {
            session: SyncSession::new(device.addr),
            device,
            index,
            processed: Arc::new(Processed::new()),
        }
    }
}

/// The part of a blocking dispatcher that differs between strategies.
pub trait DispatchStrategy {
    /// One pass of the poll protocol against the slot's device.
    fn poll_once(&mut self, slot: &mut DeviceSlot) -> Result<Option<EventId>> {
        poll::poll_once(&mut slot.session, &slot.device)
    }

    /// Executes or schedules the workload of `event`. Reports `Done` once
    /// the work has actually finished.
    fn run_workload(&mut self, event: EventId, slot: &DeviceSlot) -> Result<()>;

    /// Surfaces failures of work running elsewhere.
    fn check(&mut self) -> Result<()> {
        Ok(())
    }

    /// Waits for outstanding work and returns the peak number of jobs that
    /// were in flight.
    fn finish(&mut self) -> Result<usize>;
}

/// Runs each workload on the loop thread.
pub struct Inline {
    workload: Workload,
    sink: Arc<dyn LifecycleSink>,
}

impl Inline {
    pub fn new(workload: Workload, sink: Arc<dyn LifecycleSink>) -> Self {
        Self { workload, sink }
    }
}

impl DispatchStrategy for Inline {
    fn run_workload(&mut self, event: EventId, slot: &DeviceSlot) -> Result<()> {
        self.workload.run(&self.workload.scratch_for(slot.index))?;
        self.sink.record(Stage::Done, &event);
        Ok(())
    }

    fn finish(&mut self) -> Result<usize> {
        Ok(0)
    }
}

/// Hands each workload to the gated worker pool.
pub struct Offload {
    pool: WorkerPool,
    workload: Arc<Workload>,
    sink: Arc<dyn LifecycleSink>,
    faults_tx: Sender<Error>,
    faults_rx: Receiver<Error>,
}

impl Offload {
    pub fn new(config: &Config, sink: Arc<dyn LifecycleSink>) -> Result<Self> {
        let (faults_tx, faults_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            pool: WorkerPool::new(config.pool_size, config.max_in_flight)?,
            workload: Arc::new(config.workload()),
            sink,
            faults_tx,
            faults_rx,
        })
    }
}

impl DispatchStrategy for Offload {
    fn run_workload(&mut self, event: EventId, slot: &DeviceSlot) -> Result<()> {
        let scratch: PathBuf = self.workload.scratch_for(slot.index);
        let workload = Arc::clone(&self.workload);
        let sink = Arc::clone(&self.sink);
        let processed = Arc::clone(&slot.processed);
        let faults = self.faults_tx.clone();

        processed.set(false);
        self.pool.submit(move || match workload.run(&scratch) {
            Ok(()) => {
                sink.record(Stage::Done, &event);
                processed.set(true);
            }
            Err(e) => {
                // the device stays unprocessed; the loop stops at its next check
                let _ = faults.send(e);
            }
        });
        Ok(())
    }

    fn check(&mut self) -> Result<()> {
        match self.faults_rx.try_recv() {
            Ok(e) => Err(e),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<usize> {
        self.pool.drain();
        self.check()?;
        Ok(self.pool.peak_in_flight())
    }
}

/// Round-robins over `roster` until `limit` events were retrieved, or
/// forever without a limit.
pub fn run<D>(
    strategy: &mut D,
    roster: Vec<Device>,
    limit: Option<u64>,
    sink: Arc<dyn LifecycleSink>,
) -> Result<RunReport>
where
    D: DispatchStrategy,
{
    let started = Instant::now();
    let mut slots: Vec<DeviceSlot> = roster
        .into_iter()
        .enumerate()
        .map(|(index, device)| DeviceSlot::new(index, device))
        .collect();
    if slots.is_empty() {
        warn!("empty roster, nothing to poll");
        return Ok(RunReport::finish(0, started, 0));
    }

    let mut events = 0u64;
    'dispatch: loop {
        let mut polled = false;
        for slot in &mut slots {
            if limit.is_some_and(|limit| events >= limit) {
                break 'dispatch;
            }
            strategy.check()?;
            if !slot.processed.get() {
                continue;
            }
            polled = true;
            let Some(event) = strategy.poll_once(slot)? else {
                continue;
            };
            events += 1;
            debug!(device = %slot.device, %event, "event retrieved");
            sink.record(Stage::Retrieved, &event);
            sink.record(Stage::Dispatched, &event);
            strategy.run_workload(event, slot)?;
        }
        if !polled {
            // every device is waiting on a worker
            thread::yield_now();
        }
    }

    let peak = strategy.finish()?;
    Ok(RunReport::finish(events, started, peak))
}
