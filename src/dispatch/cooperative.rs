//! The cooperative dispatcher: one state graph per device, all of them
//! multiplexed on a single-threaded event loop.
//!
//! ```text
//! coop_status --status--> [session] --done--> coop_session_done
//! coop_session_done --status_not_ok--> coop_status
//! coop_session_done --status_ok--> coop_next_event --next_event--> [session]
//! coop_session_done --process--> coop_process
//! coop_process --done--> coop_status
//! coop_process --handle_io--> coop_handle_io --handle_io--> coop_handle_io
//! coop_handle_io --done--> coop_status
//! ```
//!
//! A graph only suspends on network I/O, a file append or an offloaded
//! workload, so a device never polls `status` again before its previous
//! event's work has completed.

use std::{cell::Cell, path::PathBuf, rc::Rc, sync::Arc, time::Instant};

use futures::{future::LocalBoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use tokio::{sync::oneshot, task::LocalSet};
use tracing::{debug, trace};

use crate::{
    config::{Config, HandlerKind},
    error::{Error, Result},
    lifecycle::{LifecycleSink, Stage},
    poll::{self, Device, EventId},
    pool::WorkerPool,
    protocol::Method,
    runtime::{drive, Cooperative},
    session::{self, HasSession, NetOp, SessionContext},
    state::{Blueprint, EdgeDef, StateDef, StateMachine, Transition},
    workload::{self, IoMode, Workload},
};

use super::RunReport;

const STATUS: &str = "coop_status";
const NEXT_EVENT: &str = "coop_next_event";
const SESSION_DONE: &str = "coop_session_done";
const PROCESS: &str = "coop_process";
const HANDLE_IO: &str = "coop_handle_io";

/// What a device graph can be suspended on.
#[derive(Debug)]
pub enum CoopOp {
    Net(NetOp),
    /// One asynchronous I/O round.
    Append,
    /// A workload running on the worker pool.
    Offload,
}

impl From<NetOp> for CoopOp {
    fn from(op: NetOp) -> Self {
        CoopOp::Net(op)
    }
}

/// State shared by every device graph on the loop.
struct Shared {
    workload: Arc<Workload>,
    handler: HandlerKind,
    sink: Arc<dyn LifecycleSink>,
    pool: Option<WorkerPool>,
    limit: Option<u64>,
    /// Events claimed so far. A device claims one before asking for it.
    claimed: Cell<u64>,
}

impl Shared {
    fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.claimed.get() >= limit)
    }
}

pub struct CoopContext {
    session: SessionContext,
    device: Device,
    scratch: PathBuf,
    shared: Rc<Shared>,
    event: Option<EventId>,
    io_left: u64,
    offloaded: Option<oneshot::Receiver<Result<()>>>,
}

impl CoopContext {
    fn new(index: usize, device: Device, shared: Rc<Shared>) -> Self {
        Self {
            session: SessionContext::new(device.addr),
            scratch: shared.workload.scratch_for(index),
            device,
            shared,
            event: None,
            io_left: 0,
            offloaded: None,
        }
    }

    fn event(&self) -> Result<&EventId> {
        self.event
            .as_ref()
            .ok_or_else(|| Error::NotFound("event".to_owned()))
    }
}

impl HasSession for CoopContext {
    fn session(&mut self) -> &mut SessionContext {
        &mut self.session
    }
}

impl Cooperative for CoopContext {
    type Pending = CoopOp;

    fn complete(&mut self, op: CoopOp) -> LocalBoxFuture<'_, Result<&'static str>> {
        match op {
            CoopOp::Net(op) => self.session.complete(op).boxed_local(),
            CoopOp::Append => async move {
                workload::append_round_async(&self.scratch).await?;
                Ok::<_, Error>("handle_io")
            }
            .boxed_local(),
            CoopOp::Offload => async move {
                let done = self
                    .offloaded
                    .take()
                    .ok_or_else(|| Error::Aborted("no offloaded workload".to_owned()))?;
                done.await
                    .map_err(|_| Error::Aborted("worker dropped its result".to_owned()))??;
                Ok::<_, Error>("done")
            }
            .boxed_local(),
        }
    }
}

fn status(ctx: &mut CoopContext) -> Result<Transition<CoopOp>> {
    if ctx.shared.exhausted() {
        trace!(device = %ctx.device, "event limit reached");
        return Ok(Transition::Halt);
    }
    ctx.session.request(ctx.device.status_request());
    Ok(Transition::Fire("status"))
}

fn next_event(ctx: &mut CoopContext) -> Result<Transition<CoopOp>> {
    ctx.session.request(ctx.device.next_event_request());
    Ok(Transition::Fire("next_event"))
}

fn session_done(ctx: &mut CoopContext) -> Result<Transition<CoopOp>> {
    let method = ctx
        .session
        .write_payload
        .as_ref()
        .map(|request| request.method.clone())
        .ok_or_else(|| Error::NotFound("request".to_owned()))?;
    let response = ctx.session.take_response()?;

    match Method::try_from(method.as_str())? {
        Method::Status => {
            if !poll::is_ready(response)? {
                return Ok(Transition::Fire("status_not_ok"));
            }
            if ctx.shared.exhausted() {
                return Ok(Transition::Halt);
            }
            let shared = &ctx.shared;
            shared.claimed.set(shared.claimed.get() + 1);
            Ok(Transition::Fire("status_ok"))
        }
        Method::NextEvent => {
            ctx.event = Some(poll::event_id(response)?);
            Ok(Transition::Fire("process"))
        }
        other => Err(Error::Protocol(format!(
            "device session answered unexpected method {other}"
        ))),
    }
}

fn process(ctx: &mut CoopContext) -> Result<Transition<CoopOp>> {
    let shared = Rc::clone(&ctx.shared);
    let event = ctx.event()?.clone();
    debug!(device = %ctx.device, %event, "event retrieved");
    shared.sink.record(Stage::Retrieved, &event);
    shared.sink.record(Stage::Dispatched, &event);

    match shared.handler {
        HandlerKind::Serial => {
            shared.workload.run(&ctx.scratch)?;
            shared.sink.record(Stage::Done, &event);
            Ok(Transition::Fire("done"))
        }
        // a buffer write is a single blocking call, so only rounds go async
        HandlerKind::Cooperative if shared.workload.mode == IoMode::Buffer => {
            shared.workload.run(&ctx.scratch)?;
            shared.sink.record(Stage::Done, &event);
            Ok(Transition::Fire("done"))
        }
        HandlerKind::Cooperative => {
            workload::do_cpu(shared.workload.cpu)?;
            ctx.io_left = shared.workload.io_rounds()?;
            Ok(Transition::Fire("handle_io"))
        }
        HandlerKind::Preemptive => {
            let pool = shared
                .pool
                .as_ref()
                .ok_or_else(|| Error::Pool("no worker pool for the preemptive handler".to_owned()))?;
            let (tx, rx) = oneshot::channel();
            let workload = Arc::clone(&shared.workload);
            let sink = Arc::clone(&shared.sink);
            let scratch = ctx.scratch.clone();
            // blocks the loop while the gate is closed
            pool.submit(move || {
                let result = workload.run(&scratch);
                if result.is_ok() {
                    sink.record(Stage::Done, &event);
                }
                let _ = tx.send(result);
            });
            ctx.offloaded = Some(rx);
            Ok(Transition::Suspend(CoopOp::Offload))
        }
    }
}

fn handle_io(ctx: &mut CoopContext) -> Result<Transition<CoopOp>> {
    if ctx.io_left > 0 {
        ctx.io_left -= 1;
        return Ok(Transition::Suspend(CoopOp::Append));
    }
    ctx.shared.sink.record(Stage::Done, ctx.event()?);
    Ok(Transition::Fire("done"))
}

/// The per-device graph with the session sub-graph plugged in.
pub fn machine() -> Result<StateMachine<CoopContext, CoopOp>> {
    Blueprint::<CoopContext, CoopOp>::new()
        .states(&[
            StateDef::new(STATUS, status),
            StateDef::new(NEXT_EVENT, next_event),
            StateDef::new(SESSION_DONE, session_done),
            StateDef::new(PROCESS, process),
            StateDef::new(HANDLE_IO, handle_io),
        ])
        .include(session::blueprint())
        .edges(&[
            EdgeDef::new("status", STATUS, session::CONNECTING),
            EdgeDef::new("next_event", NEXT_EVENT, session::CONNECTING),
            EdgeDef::new("done", session::CLOSING, SESSION_DONE),
            EdgeDef::new("status_ok", SESSION_DONE, NEXT_EVENT),
            EdgeDef::new("status_not_ok", SESSION_DONE, STATUS),
            EdgeDef::new("process", SESSION_DONE, PROCESS),
            EdgeDef::new("done", PROCESS, STATUS),
            EdgeDef::new("handle_io", PROCESS, HANDLE_IO),
            EdgeDef::new("handle_io", HANDLE_IO, HANDLE_IO),
            EdgeDef::new("done", HANDLE_IO, STATUS),
        ])
        .build()
}

/// Runs one device graph per roster entry on a current-thread event loop.
/// The first failing device ends the run.
pub fn run(
    config: &Config,
    roster: Vec<Device>,
    sink: Arc<dyn LifecycleSink>,
) -> Result<RunReport> {
    let started = Instant::now();
    let handler = config.effective_handler();
    let pool = match handler {
        HandlerKind::Preemptive => Some(WorkerPool::new(config.pool_size, config.max_in_flight)?),
        _ => None,
    };
    let shared = Rc::new(Shared {
        workload: Arc::new(config.workload()),
        handler,
        sink,
        pool,
        limit: config.event_limit,
        claimed: Cell::new(0),
    });
    let machine = Rc::new(machine()?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::EventLoop)?;
    let local = LocalSet::new();
    local.block_on(&runtime, async {
        let mut devices: FuturesUnordered<_> = roster
            .into_iter()
            .enumerate()
            .map(|(index, device)| {
                let machine = Rc::clone(&machine);
                let mut ctx = CoopContext::new(index, device, Rc::clone(&shared));
                tokio::task::spawn_local(async move {
                    drive(&*machine, &mut ctx).await.map(|_| ())
                })
            })
            .collect();
        while let Some(joined) = devices.next().await {
            joined??;
        }
        Ok::<_, Error>(())
    })?;

    let peak = match &shared.pool {
        Some(pool) => {
            pool.drain();
            pool.peak_in_flight()
        }
        None => 0,
    };
    Ok(RunReport::finish(shared.claimed.get(), started, peak))
}
