//! The gateway's own request server, advertised to the name service during
//! boot. It answers one request per connection.

use std::{
    net::SocketAddr,
    thread::{self, JoinHandle},
};

use chrono::Utc;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::oneshot,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{Error, Result, TransportOp},
    preview::PreviewExt,
    protocol::{build_error, build_success, encode, Method, Request, Value, MAX_MESSAGE_SIZE},
};

/// A running server. Dropping it stops the server.
pub struct GatewayServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl GatewayServer {
    /// Binds `listen` and serves on a background thread with its own event
    /// loop.
    pub fn spawn(listen: SocketAddr) -> Result<Self> {
        let listener = std::net::TcpListener::bind(listen)
            .map_err(|e| Error::transport(TransportOp::Listen, listen, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::transport(TransportOp::Listen, listen, e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::transport(TransportOp::Listen, listen, e))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::EventLoop)?;
        let (shutdown, stop) = oneshot::channel();
        let thread = thread::Builder::new()
            .name("gateway-server".to_owned())
            .spawn(move || runtime.block_on(serve(listener, stop)))
            .map_err(Error::EventLoop)?;

        info!(%addr, "gateway server listening");
        Ok(Self {
            addr,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn serve(listener: std::net::TcpListener, mut stop: oneshot::Receiver<()>) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!("gateway server could not start: {e}");
            return;
        }
    };
    loop {
        select! {
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(async move {
                        if let Err(e) = answer(stream, peer).await {
                            warn!(%peer, "request failed: {e}");
                        }
                    });
                }
                Err(e) => warn!("accept failed: {e}"),
            },
        }
    }
    debug!("gateway server stopped");
}

async fn answer(mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let (reader, mut writer) = stream.split();

    let mut line = Vec::new();
    BufReader::new(reader.take(MAX_MESSAGE_SIZE as u64))
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| Error::transport(TransportOp::Read, peer, e))?;
    debug!(%peer, request = %line.preview(), "request received");

    let reply = encode(&respond(&line))?;
    writer
        .write_all(&reply)
        .await
        .map_err(|e| Error::transport(TransportOp::Write, peer, e))?;
    writer
        .shutdown()
        .await
        .map_err(|e| Error::transport(TransportOp::Shutdown, peer, e))
}

/// The reply to one request line.
pub fn respond(line: &[u8]) -> Value {
    let Ok(request) = Request::decode(line) else {
        return build_error("ProtocolError", "Could not parse request");
    };
    match Method::try_from(request.method.as_str()) {
        Ok(Method::GetTimestamp) => build_success(Value::Int(Utc::now().timestamp_millis())),
        _ => build_error(
            "UnknownMethod",
            &format!("method {:?} is not served by the gateway", request.method),
        ),
    }
}
