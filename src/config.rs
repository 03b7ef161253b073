use std::{
    fmt,
    net::{SocketAddr, SocketAddrV4},
    path::PathBuf,
    str::FromStr,
};

use typed_builder::TypedBuilder;

use crate::{
    error::{Error, Result},
    protocol::Value,
    workload::{check_intensity, IoMode, Workload},
};

/// Which concurrency architecture polls the devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatcherKind {
    #[default]
    Serial,
    Cooperative,
    Preemptive,
}

/// How the workload of a retrieved event is executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandlerKind {
    #[default]
    Serial,
    Cooperative,
    Preemptive,
}

impl DispatcherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatcherKind::Serial => "serial",
            DispatcherKind::Cooperative => "cooperative",
            DispatcherKind::Preemptive => "preemptive",
        }
    }
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Serial => "serial",
            HandlerKind::Cooperative => "cooperative",
            HandlerKind::Preemptive => "preemptive",
        }
    }
}

impl FromStr for DispatcherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "serial" => Ok(DispatcherKind::Serial),
            "cooperative" => Ok(DispatcherKind::Cooperative),
            "preemptive" => Ok(DispatcherKind::Preemptive),
            other => Err(Error::Config(format!("unknown dispatcher {other:?}"))),
        }
    }
}

impl FromStr for HandlerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "serial" => Ok(HandlerKind::Serial),
            "cooperative" => Ok(HandlerKind::Cooperative),
            "preemptive" => Ok(HandlerKind::Preemptive),
            other => Err(Error::Config(format!("unknown event handler {other:?}"))),
        }
    }
}

impl fmt::Display for DispatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a gateway run needs. Fixed once boot starts.
#[derive(Clone, Debug, TypedBuilder)]
pub struct Config {
    #[builder(default)]
    pub dispatcher: DispatcherKind,
    #[builder(default)]
    pub event_handler: HandlerKind,
    /// CPU intensity in `[0, 1]`.
    #[builder(default)]
    pub cpu: f64,
    /// I/O intensity in `[0, 1]`.
    #[builder(default)]
    pub io: f64,
    #[builder(default)]
    pub io_mode: IoMode,
    /// Worker threads behind the gate.
    #[builder(default = 10)]
    pub pool_size: usize,
    /// Jobs allowed in flight before submission blocks.
    #[builder(default = 1)]
    pub max_in_flight: usize,
    pub nameservice: SocketAddr,
    /// Where the gateway's own server listens.
    #[builder(default = SocketAddr::from(([0, 0, 0, 0], 0)))]
    pub listen: SocketAddr,
    #[builder(default = std::env::temp_dir())]
    pub scratch_dir: PathBuf,
    /// Stop after this many retrieved events. `None` runs forever.
    #[builder(default)]
    pub event_limit: Option<u64>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        check_intensity(self.cpu)?;
        check_intensity(self.io)?;
        if self.pool_size == 0 {
            return Err(Error::Config("pool size must be at least 1".to_owned()));
        }
        if self.max_in_flight == 0 {
            return Err(Error::Config(
                "in-flight ceiling must be at least 1".to_owned(),
            ));
        }
        if self.effective_handler() == HandlerKind::Cooperative
            && self.dispatcher != DispatcherKind::Cooperative
        {
            return Err(Error::Config(format!(
                "the cooperative event handler needs the cooperative dispatcher, not {}",
                self.dispatcher
            )));
        }
        Ok(())
    }

    /// The handler actually used: the preemptive dispatcher always offloads.
    pub fn effective_handler(&self) -> HandlerKind {
        match self.dispatcher {
            DispatcherKind::Preemptive => HandlerKind::Preemptive,
            _ => self.event_handler,
        }
    }

    pub fn workload(&self) -> Workload {
        Workload {
            cpu: self.cpu,
            io: self.io,
            mode: self.io_mode,
            scratch_dir: self.scratch_dir.clone(),
        }
    }

    /// The configuration object sent along with `verify_gateway`.
    pub fn to_value(&self) -> Value {
        Value::object([
            ("DISPATCHER", Value::from(self.dispatcher.as_str())),
            ("EVENT_HANDLER", Value::from(self.effective_handler().as_str())),
            ("CPU_INTENSITY", Value::from(self.cpu)),
            ("IO_INTENSITY", Value::from(self.io)),
            ("POOL_SIZE", Value::Int(self.pool_size as i64)),
        ])
    }
}

/// Parses a dotted IPv4 `a.b.c.d:port` literal.
pub fn parse_address(s: &str) -> Result<SocketAddr> {
    s.parse::<SocketAddrV4>()
        .map(SocketAddr::V4)
        .map_err(|_| Error::Config(format!("expected a.b.c.d:port, got {s:?}")))
}
