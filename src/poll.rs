//! The device roster and the `status` / `next_event` exchange every
//! dispatcher runs against a device.

use std::{fmt, net::SocketAddr};

use crate::{
    error::{Error, Result},
    protocol::{Method, Request, Response, Value},
    session::sync::SyncSession,
};

/// How requests reach a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// The device listens itself; requests carry no arguments.
    Direct,
    /// The name service answers for the device; requests carry its id.
    Proxied(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// Where requests for this device are sent.
    pub addr: SocketAddr,
    pub route: Route,
}

impl Device {
    pub fn direct(addr: SocketAddr) -> Self {
        Self {
            addr,
            route: Route::Direct,
        }
    }

    pub fn proxied(nameservice: SocketAddr, id: impl Into<String>) -> Self {
        Self {
            addr: nameservice,
            route: Route::Proxied(id.into()),
        }
    }

    fn args(&self) -> Vec<Value> {
        match &self.route {
            Route::Direct => vec![],
            Route::Proxied(id) => vec![Value::from(id.as_str())],
        }
    }

    pub fn status_request(&self) -> Request {
        Request::new(Method::Status, self.args())
    }

    pub fn next_event_request(&self) -> Request {
        Request::new(Method::NextEvent, self.args())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.route {
            Route::Direct => write!(f, "{}", self.addr),
            Route::Proxied(id) => write!(f, "{id}@{}", self.addr),
        }
    }
}

/// An event id handed out by a device's `next_event`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventId(pub String);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads the `hostnames` result: `[addr, port]` pairs for devices that
/// listen themselves, id strings for devices behind the name service.
pub fn parse_roster(hostnames: &Value, nameservice: SocketAddr) -> Result<Vec<Device>> {
    let count = hostnames.len()?;
    let mut roster = Vec::with_capacity(count);
    for i in 0..count {
        let entry = hostnames.get_at(i)?;
        let device = match entry {
            Value::Str(id) => Device::proxied(nameservice, id.as_str()),
            Value::Array(_) => {
                let host = entry.get_at(0)?.as_str()?;
                let port = entry.get_at(1)?.as_int()?;
                let port = u16::try_from(port)
                    .map_err(|_| Error::Protocol(format!("port {port} out of range")))?;
                let ip = host
                    .parse()
                    .map_err(|_| Error::Protocol(format!("bad device address {host:?}")))?;
                Device::direct(SocketAddr::new(ip, port))
            }
            other => {
                return Err(Error::Protocol(format!(
                    "roster entry must be [addr, port] or an id, found {}",
                    other.kind()
                )))
            }
        };
        roster.push(device);
    }
    Ok(roster)
}

/// Interprets a `status` response.
pub fn is_ready(response: Response) -> Result<bool> {
    response.into_result()?.as_flag()
}

/// Interprets a `next_event` response.
pub fn event_id(response: Response) -> Result<EventId> {
    Ok(EventId(response.into_result()?.as_str()?.to_owned()))
}

/// One pass of the poll protocol over a blocking session: `status`, then
/// `next_event` when the device has something pending.
pub fn poll_once(session: &mut SyncSession, device: &Device) -> Result<Option<EventId>> {
    if !is_ready(session.call(&device.status_request())?)? {
        return Ok(None);
    }
    event_id(session.call(&device.next_event_request())?).map(Some)
}
