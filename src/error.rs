use std::{fmt, io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The transport call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    Connect,
    Read,
    Write,
    Listen,
    Shutdown,
}

impl fmt::Display for TransportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportOp::Connect => "connect",
            TransportOp::Read => "read",
            TransportOp::Write => "write",
            TransportOp::Listen => "listen",
            TransportOp::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{op} {addr} failed: {source}")]
    Transport {
        op: TransportOp,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("bad wire payload: {0}")]
    Protocol(String),
    #[error("key {0:?} not found")]
    NotFound(String),
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },
    #[error("message of {len} bytes exceeds the {limit} byte session buffer")]
    MessageTooLarge { len: usize, limit: usize },
    #[error("bad configuration: {0}")]
    Config(String),
    #[error("peer answered {name}: {message}")]
    Remote { name: String, message: String },
    #[error("name service rejected the gateway configuration")]
    VerificationRejected,
    #[error("state {state:?} has no edge {edge:?}")]
    MissingEdge { state: &'static str, edge: String },
    #[error("edge references undeclared state {0:?}")]
    UndeclaredState(String),
    #[error("state {0:?} declared twice")]
    DuplicateState(String),
    #[error("state machine has no states")]
    EmptyGraph,
    #[error("scratch file {path:?}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("worker pool: {0}")]
    Pool(String),
    #[error("event loop: {0}")]
    EventLoop(#[source] io::Error),
    #[error("aborted: {0}")]
    Aborted(String),
}

impl Error {
    pub fn transport(op: TransportOp, addr: SocketAddr, source: io::Error) -> Self {
        Self::Transport { op, addr, source }
    }

    pub fn scratch(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Scratch {
            path: path.into(),
            source,
        }
    }

    /// The error family this falls into, as named in fatal log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport { .. } => "TransportError",
            Error::Protocol(_) => "ProtocolError",
            Error::NotFound(_) => "NotFound",
            Error::OutOfBounds { .. } | Error::MessageTooLarge { .. } => "OutOfBounds",
            Error::Config(_) => "ConfigError",
            Error::Remote { .. } | Error::VerificationRejected => "RemoteError",
            Error::MissingEdge { .. }
            | Error::UndeclaredState(_)
            | Error::DuplicateState(_)
            | Error::EmptyGraph => "StateError",
            Error::Scratch { .. } => "WorkloadError",
            Error::Pool(_) | Error::EventLoop(_) | Error::Aborted(_) => "RuntimeError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::Pool(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Aborted(e.to_string())
    }
}
