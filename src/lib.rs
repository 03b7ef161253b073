//! A gateway testbed that polls simulated field devices for events and runs a
//! simulated workload per event, under one of three concurrency
//! architectures: a blocking loop, a loop offloading to a gated worker pool,
//! and a cooperative single-threaded scheduler built on explicit state graphs.
//!
//! Every architecture speaks the same poll protocol, so the throughput of a
//! bounded run can be compared across them. A run boots against the name
//! service, which checks the configuration and hands out the device roster,
//! and then dispatches until the event limit is reached.
//!
//! Errors are never handled inside the core. They travel up to [`run`] and
//! its caller decides what a failure means; the `gateway` binary logs the
//! error and exits.

pub mod boot;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod poll;
pub mod pool;
pub mod preview;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod session;
pub mod state;
pub mod workload;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use tracing::info;

pub use config::Config;
pub use dispatch::RunReport;
pub use error::{Error, Result};

use lifecycle::{LifecycleSink, TracingSink};
use server::GatewayServer;

/// Boots against the name service and dispatches with lifecycle events
/// logged through `tracing`.
pub fn run(config: &Config) -> Result<RunReport> {
    run_with_sink(config, Arc::new(TracingSink))
}

/// [`run`] with lifecycle events delivered to `sink`.
pub fn run_with_sink(config: &Config, sink: Arc<dyn LifecycleSink>) -> Result<RunReport> {
    config.validate()?;
    let server = GatewayServer::spawn(config.listen)?;
    let own_addr = advertised(server.local_addr());

    let roster = boot::run(config, own_addr)?;
    let report = dispatch::run(config, roster, sink)?;
    info!(
        events = report.events,
        elapsed = ?report.elapsed,
        throughput = report.throughput(),
        peak_in_flight = report.peak_in_flight,
        "run finished"
    );
    Ok(report)
}

/// A wildcard listen address is advertised as loopback.
fn advertised(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
    } else {
        addr
    }
}
