//! Gateway testbed CLI
//!
//! Boots against a name service and polls its devices with one dispatcher.
//!
//! # Example
//!
//! ```bash
//! # 10000 events with the cooperative dispatcher and offloaded workloads
//! gateway --nameservice 127.0.0.1:50000 --dispatcher cooperative \
//!     --event-handler preemptive --cpu 0.1 --io 0.01 --events 10000
//! ```

use std::{net::SocketAddr, path::PathBuf, process};

use clap::Parser;
use gateway::{
    config::{parse_address, DispatcherKind, HandlerKind},
    workload::IoMode,
    Config,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(version, about, long_about = None)]
struct Args {
    /// Name service address (a.b.c.d:port)
    #[arg(long, value_parser = parse_address)]
    nameservice: SocketAddr,

    /// serial, cooperative or preemptive
    #[arg(short = 'd', long, default_value = "serial")]
    dispatcher: DispatcherKind,

    /// How event workloads run: serial, cooperative or preemptive
    #[arg(short = 'e', long, default_value = "serial")]
    event_handler: HandlerKind,

    /// CPU intensity (0.0-1.0)
    #[arg(long, default_value = "0")]
    cpu: f64,

    /// I/O intensity (0.0-1.0)
    #[arg(long, default_value = "0")]
    io: f64,

    /// rounds, or the deprecated single-buffer mode
    #[arg(long, default_value = "rounds")]
    io_mode: IoMode,

    /// Worker threads for offloaded workloads
    #[arg(short = 'p', long, default_value = "10")]
    pool_size: usize,

    /// Offloaded jobs allowed in flight at once
    #[arg(long, default_value = "1")]
    max_in_flight: usize,

    /// Address the gateway's own server listens on
    #[arg(long, value_parser = parse_address, default_value = "0.0.0.0:0")]
    listen: SocketAddr,

    /// Directory for I/O workload scratch files. Defaults to the OS temp dir.
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Stop after this many events. Runs forever when omitted.
    #[arg(short = 'n', long)]
    events: Option<u64>,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config::builder()
            .nameservice(args.nameservice)
            .dispatcher(args.dispatcher)
            .event_handler(args.event_handler)
            .cpu(args.cpu)
            .io(args.io)
            .io_mode(args.io_mode)
            .pool_size(args.pool_size)
            .max_in_flight(args.max_in_flight)
            .listen(args.listen)
            .scratch_dir(args.scratch_dir.unwrap_or_else(std::env::temp_dir))
            .event_limit(args.events)
            .build()
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from(Args::parse());
    info!(
        dispatcher = %config.dispatcher,
        event_handler = %config.effective_handler(),
        cpu = config.cpu,
        io = config.io,
        pool_size = config.pool_size,
        nameservice = %config.nameservice,
        "starting gateway"
    );

    match gateway::run(&config) {
        Ok(report) => info!(
            events = report.events,
            throughput = report.throughput(),
            "done"
        ),
        Err(err) => {
            error!(kind = err.kind(), "{err}");
            process::exit(1);
        }
    }
}
