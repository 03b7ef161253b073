//! Fake peers speaking the wire protocol, after the Python device and name
//! service simulators, plus a shared journal that records what every peer
//! and the lifecycle sink saw, in order.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Write},
    net::{SocketAddr, TcpListener},
    sync::{Arc, Mutex},
    thread,
};

use gateway::{
    lifecycle::{LifecycleSink, Stage},
    poll::{Device, EventId},
    protocol::{build_error, build_success, encode, Request, Value},
};

/// Ordered record shared by peers and the sink.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// Records lifecycle events as `<MARKER>:<event id>`.
#[derive(Clone, Default)]
pub struct RecordingSink(pub Journal);

impl LifecycleSink for RecordingSink {
    fn record(&self, stage: Stage, event: &EventId) {
        self.0.push(format!("{}:{}", stage.marker(), event));
    }
}

/// A blocking listener answering one request per connection.
pub struct FakePeer {
    pub addr: SocketAddr,
}

impl FakePeer {
    pub fn spawn<F>(mut handler: F) -> Self
    where
        F: FnMut(&Request) -> Value + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut line = Vec::new();
                if BufReader::new(&stream).read_until(b'\n', &mut line).is_err() || line.is_empty() {
                    continue;
                }
                let reply = match Request::decode(&line) {
                    Ok(request) => handler(&request),
                    Err(_) => build_error("ProtocolError", "Could not parse request"),
                };
                let _ = stream.write_all(&encode(&reply).unwrap());
            }
        });
        Self { addr }
    }
}

/// A device with an event pending on every second `status`.
pub struct DeviceSim {
    name: String,
    polls: u64,
    events: u64,
    journal: Journal,
}

impl DeviceSim {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_owned(),
            polls: 0,
            events: 0,
            journal: journal.clone(),
        }
    }

    pub fn answer(&mut self, request: &Request) -> Value {
        match request.method.as_str() {
            "status" => {
                self.polls += 1;
                self.journal.push(format!("status:{}", self.name));
                build_success(Value::from(i64::from(self.polls % 2 == 0)))
            }
            "next_event" => {
                self.events += 1;
                let id = format!("{}-evt{}", self.name, self.events);
                self.journal.push(format!("event:{}:{}", self.name, id));
                build_success(Value::from(id))
            }
            other => build_error("UnknownMethod", other),
        }
    }
}

pub fn device(name: &str, journal: &Journal) -> FakePeer {
    let mut sim = DeviceSim::new(name, journal);
    FakePeer::spawn(move |request| sim.answer(request))
}

/// A device whose every answer is an application error.
pub fn failing_device() -> FakePeer {
    FakePeer::spawn(|_| build_error("Error", "boom"))
}

/// A name service accepting or rejecting the gateway, listing `direct`
/// devices by address and answering for `proxied` device ids itself.
pub fn nameservice(
    verify: bool,
    direct: &[SocketAddr],
    proxied: &[&str],
    journal: &Journal,
) -> FakePeer {
    let mut roster: Vec<Value> = direct
        .iter()
        .map(|addr| {
            Value::array([
                Value::from(addr.ip().to_string()),
                Value::from(addr.port()),
            ])
        })
        .collect();
    roster.extend(proxied.iter().map(|id| Value::from(*id)));
    let roster = Value::Array(roster);

    let mut sims: HashMap<String, DeviceSim> = proxied
        .iter()
        .map(|id| (id.to_string(), DeviceSim::new(id, journal)))
        .collect();
    let journal = journal.clone();

    FakePeer::spawn(move |request| match request.method.as_str() {
        "verify_gateway" => {
            journal.push(format!("verify_gateway:{}", Value::Array(request.args.clone())));
            build_success(Value::from(verify))
        }
        "hostnames" => {
            journal.push("hostnames".to_owned());
            build_success(roster.clone())
        }
        _ => {
            let sim = request
                .args
                .first()
                .and_then(|id| id.as_str().ok())
                .and_then(|id| sims.get_mut(id));
            match sim {
                Some(sim) => sim.answer(request),
                None => build_error("DeviceError", "unknown device"),
            }
        }
    })
}

pub fn direct_roster(peers: &[&FakePeer]) -> Vec<Device> {
    peers.iter().map(|peer| Device::direct(peer.addr)).collect()
}

/// Fails if any device was asked for `status` while the workload of its
/// previous event had not reported done.
pub fn assert_per_device_order(entries: &[String]) {
    let mut pending: HashMap<&str, &str> = HashMap::new();
    for entry in entries {
        if let Some(name) = entry.strip_prefix("status:") {
            assert!(
                !pending.contains_key(name),
                "{name} polled again before {:?} was done",
                pending.get(name)
            );
        } else if let Some(rest) = entry.strip_prefix("event:") {
            let (name, id) = rest.split_once(':').unwrap();
            pending.insert(name, id);
        } else if let Some(id) = entry.strip_prefix("EVENT_LIFECYCLE_DONE:") {
            pending.retain(|_, pending_id| *pending_id != id);
        }
    }
}
