//! The blocking flavor of a session: connect, write, read and close run
//! back to back on the calling thread.

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
};

use tracing::{debug, debug_span};

use crate::{
    error::{Error, Result, TransportOp},
    preview::PreviewExt,
    protocol::{Request, Response, MAX_MESSAGE_SIZE, TERMINATOR},
};

#[derive(Debug)]
pub struct SyncSession {
    addr: SocketAddr,
    buf: Vec<u8>,
}

impl SyncSession {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            buf: Vec::new(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sends `request` over a fresh connection and waits for the answer.
    /// Any failing call ends the exchange.
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        let addr = self.addr;
        let span = debug_span!("session", %addr, method = %request.method);
        let _enter = span.enter();

        let payload = request.encode()?;
        let mut stream = TcpStream::connect(addr)
            .map_err(|e| Error::transport(TransportOp::Connect, addr, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::transport(TransportOp::Connect, addr, e))?;

        debug!(payload = %payload.preview(), "sending request");
        stream
            .write_all(&payload)
            .map_err(|e| Error::transport(TransportOp::Write, addr, e))?;

        self.buf.clear();
        // one byte past the limit tells an oversized message from a full one
        let limit = MAX_MESSAGE_SIZE as u64 + 1;
        BufReader::new((&stream).take(limit))
            .read_until(TERMINATOR, &mut self.buf)
            .map_err(|e| Error::transport(TransportOp::Read, addr, e))?;
        if self.buf.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge {
                len: self.buf.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }
        if self.buf.is_empty() {
            return Err(Error::transport(
                TransportOp::Read,
                addr,
                io::ErrorKind::UnexpectedEof.into(),
            ));
        }
        debug!(payload = %self.buf.preview(), "received response");

        match stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => {
                return Err(Error::transport(TransportOp::Shutdown, addr, e))
            }
            _ => {}
        }
        Response::decode(&self.buf)
    }
}
