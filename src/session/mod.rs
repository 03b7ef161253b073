//! One request/response exchange as a reusable state sub-graph:
//! `session_connecting -> session_writing -> session_reading -> session_closing`.
//!
//! Each state starts a transport operation and suspends; the driver awaits it
//! through [`SessionContext::complete`] and fires the edge stored when the
//! state suspended. Leaving `session_closing` fires `done`, which by default
//! reaches `session_done` and halts. An embedding graph includes
//! [`blueprint`] and then registers its own `done` edge from
//! [`CLOSING`] to continue with the response.

pub mod sync;

use std::{io, net::SocketAddr};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;

use crate::{
    error::{Error, Result, TransportOp},
    preview::PreviewExt,
    protocol::{self, Request, Response, Value, MAX_MESSAGE_SIZE, TERMINATOR},
    state::{Blueprint, EdgeDef, StateDef, Transition},
};

pub const CONNECTING: &str = "session_connecting";
pub const WRITING: &str = "session_writing";
pub const READING: &str = "session_reading";
pub const CLOSING: &str = "session_closing";
pub const DONE: &str = "session_done";

const READ_CHUNK: usize = 4096;

/// The transport operation a session state is waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetOp {
    Connect,
    Write,
    Read,
    Shutdown,
}

/// Per-connection state owned by exactly one session.
#[derive(Debug)]
pub struct SessionContext {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    /// The request sent by the next exchange.
    pub write_payload: Option<Request>,
    /// The parsed response of the last exchange.
    pub read_payload: Option<Value>,
    buf: Vec<u8>,
    resume: &'static str,
    eof_edge: Option<&'static str>,
}

impl SessionContext {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            stream: None,
            write_payload: None,
            read_payload: None,
            buf: Vec::with_capacity(READ_CHUNK),
            resume: "done",
            eof_edge: None,
        }
    }

    /// Fire `edge` instead of failing when the peer closes without answering.
    pub fn with_eof_edge(mut self, edge: &'static str) -> Self {
        self.eof_edge = Some(edge);
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queues `request` for the next pass through the sub-graph.
    pub fn request(&mut self, request: Request) {
        self.write_payload = Some(request);
        self.read_payload = None;
    }

    /// Takes the response read by the last exchange.
    pub fn take_response(&mut self) -> Result<Response> {
        let value = self
            .read_payload
            .take()
            .ok_or_else(|| Error::NotFound("response".to_owned()))?;
        Response::from_value(value)
    }

    /// Suspends the calling state on `op`; `edge` fires once it completes.
    pub fn suspend<S>(&mut self, op: NetOp, edge: &'static str) -> Transition<S>
    where
        S: From<NetOp>,
    {
        self.resume = edge;
        Transition::Suspend(S::from(op))
    }

    /// Performs `op` and returns the edge to fire.
    pub async fn complete(&mut self, op: NetOp) -> Result<&'static str> {
        let Self {
            addr,
            stream,
            buf,
            read_payload,
            resume,
            eof_edge,
            ..
        } = self;
        let addr = *addr;

        match op {
            NetOp::Connect => {
                let s = TcpStream::connect(addr)
                    .await
                    .map_err(|e| Error::transport(TransportOp::Connect, addr, e))?;
                s.set_nodelay(true)
                    .map_err(|e| Error::transport(TransportOp::Connect, addr, e))?;
                *stream = Some(s);
            }
            NetOp::Write => {
                connected(stream, addr, TransportOp::Write)?
                    .write_all(buf)
                    .await
                    .map_err(|e| Error::transport(TransportOp::Write, addr, e))?;
            }
            NetOp::Read => {
                let s = connected(stream, addr, TransportOp::Read)?;
                buf.clear();
                let mut chunk = [0u8; READ_CHUNK];
                loop {
                    let n = s
                        .read(&mut chunk)
                        .await
                        .map_err(|e| Error::transport(TransportOp::Read, addr, e))?;
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.len() > MAX_MESSAGE_SIZE {
                        return Err(Error::MessageTooLarge {
                            len: buf.len(),
                            limit: MAX_MESSAGE_SIZE,
                        });
                    }
                    if chunk[..n].contains(&TERMINATOR) {
                        break;
                    }
                }
                if buf.is_empty() {
                    return match eof_edge {
                        Some(edge) => {
                            debug!(%addr, edge = *edge, "peer closed without answering");
                            Ok(*edge)
                        }
                        None => Err(Error::transport(
                            TransportOp::Read,
                            addr,
                            io::ErrorKind::UnexpectedEof.into(),
                        )),
                    };
                }
                let end = buf
                    .iter()
                    .position(|&b| b == TERMINATOR)
                    .map_or(buf.len(), |i| i + 1);
                debug!(%addr, payload = %buf[..end].preview(), "received response");
                *read_payload = Some(protocol::decode(&buf[..end])?);
            }
            NetOp::Shutdown => {
                if let Some(mut s) = stream.take() {
                    match s.shutdown().await {
                        Err(e) if e.kind() != io::ErrorKind::NotConnected => {
                            return Err(Error::transport(TransportOp::Shutdown, addr, e))
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(*resume)
    }
}

fn connected(
    stream: &mut Option<TcpStream>,
    addr: SocketAddr,
    op: TransportOp,
) -> Result<&mut TcpStream> {
    stream
        .as_mut()
        .ok_or_else(|| Error::transport(op, addr, io::ErrorKind::NotConnected.into()))
}

/// A graph payload that embeds a session.
pub trait HasSession {
    fn session(&mut self) -> &mut SessionContext;
}

pub fn connecting<C, S>(ctx: &mut C) -> Result<Transition<S>>
where
    C: HasSession,
    S: From<NetOp>,
{
    Ok(ctx.session().suspend(NetOp::Connect, "connect"))
}

pub fn writing<C, S>(ctx: &mut C) -> Result<Transition<S>>
where
    C: HasSession,
    S: From<NetOp>,
{
    let session = ctx.session();
    let request = session
        .write_payload
        .as_ref()
        .ok_or_else(|| Error::NotFound("request".to_owned()))?;
    session.buf = request.encode()?;
    debug!(addr = %session.addr, payload = %session.buf.preview(), "sending request");
    Ok(session.suspend(NetOp::Write, "done"))
}

pub fn reading<C, S>(ctx: &mut C) -> Result<Transition<S>>
where
    C: HasSession,
    S: From<NetOp>,
{
    Ok(ctx.session().suspend(NetOp::Read, "done"))
}

pub fn closing<C, S>(ctx: &mut C) -> Result<Transition<S>>
where
    C: HasSession,
    S: From<NetOp>,
{
    Ok(ctx.session().suspend(NetOp::Shutdown, "done"))
}

pub fn finished<C, S>(_: &mut C) -> Result<Transition<S>> {
    Ok(Transition::Halt)
}

/// The session sub-graph, ready to be included into an embedding graph.
pub fn blueprint<C, S>() -> Blueprint<C, S>
where
    C: HasSession,
    S: From<NetOp>,
{
    Blueprint::new()
        .states(&[
            StateDef::new(CONNECTING, connecting::<C, S>),
            StateDef::new(WRITING, writing::<C, S>),
            StateDef::new(READING, reading::<C, S>),
            StateDef::new(CLOSING, closing::<C, S>),
            StateDef::new(DONE, finished::<C, S>),
        ])
        .edges(&[
            EdgeDef::new("connect", CONNECTING, WRITING),
            EdgeDef::new("done", WRITING, READING),
            EdgeDef::new("done", READING, CLOSING),
            EdgeDef::new("done", CLOSING, DONE),
        ])
}
