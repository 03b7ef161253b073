//! The three dispatchers. All of them run the same poll protocol over the
//! roster and differ only in how they schedule polling and workloads:
//!
//! * `serial`: one thread, blocking sessions, round-robin over devices.
//! * `preemptive`: the same loop, with every workload offloaded to the gated
//!   worker pool.
//! * `cooperative`: one state graph per device, multiplexed on a
//!   single-threaded event loop.

pub mod blocking;
pub mod cooperative;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::info;

use crate::{
    config::{Config, DispatcherKind, HandlerKind},
    error::{Error, Result},
    lifecycle::LifecycleSink,
    poll::Device,
};

/// What a finished, bounded run achieved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunReport {
    /// Events retrieved from devices.
    pub events: u64,
    pub elapsed: Duration,
    /// Most background jobs ever in flight at once. Zero when nothing was
    /// offloaded.
    pub peak_in_flight: usize,
}

impl RunReport {
    fn finish(events: u64, started: Instant, peak_in_flight: usize) -> Self {
        Self {
            events,
            elapsed: started.elapsed(),
            peak_in_flight,
        }
    }

    /// Events per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.events as f64 / secs
        } else {
            0.0
        }
    }
}

/// Polls `roster` with the configured dispatcher until the event limit, if
/// any, is reached.
pub fn run(
    config: &Config,
    roster: Vec<Device>,
    sink: Arc<dyn LifecycleSink>,
) -> Result<RunReport> {
    let handler = config.effective_handler();
    info!(
        dispatcher = %config.dispatcher,
        %handler,
        devices = roster.len(),
        "dispatching"
    );
    match (config.dispatcher, handler) {
        (DispatcherKind::Cooperative, _) => cooperative::run(config, roster, sink),
        (_, HandlerKind::Serial) => {
            let mut inline = blocking::Inline::new(config.workload(), sink.clone());
            blocking::run(&mut inline, roster, config.event_limit, sink)
        }
        (_, HandlerKind::Preemptive) => {
            let mut offload = blocking::Offload::new(config, sink.clone())?;
            blocking::run(&mut offload, roster, config.event_limit, sink)
        }
        (dispatcher, HandlerKind::Cooperative) => Err(Error::Config(format!(
            "the cooperative event handler needs the cooperative dispatcher, not {dispatcher}"
        ))),
    }
}
