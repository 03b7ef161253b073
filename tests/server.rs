use std::{
    io::{BufRead, BufReader, Write},
    net::TcpStream,
};

use chrono::Utc;
use gateway::{
    error::{Error, TransportOp},
    protocol::{Method, Request, Response},
    server::GatewayServer,
    session::sync::SyncSession,
};

fn server() -> GatewayServer {
    GatewayServer::spawn("127.0.0.1:0".parse().unwrap()).unwrap()
}

#[test]
fn test_get_timestamp() {
    let server = server();
    let before = Utc::now().timestamp_millis();

    let mut session = SyncSession::new(server.local_addr());
    let stamp = session
        .call(&Request::new(Method::GetTimestamp, vec![]))
        .unwrap()
        .into_result()
        .unwrap()
        .as_int()
        .unwrap();

    assert!(stamp >= before);
    assert!(stamp <= Utc::now().timestamp_millis());
}

#[test]
fn test_unknown_method() {
    let server = server();
    let mut session = SyncSession::new(server.local_addr());

    let response = session.call(&Request::new(Method::Hostnames, vec![])).unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.name, "UnknownMethod");
}

#[test]
fn test_unparsable_request() {
    let server = server();
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.write_all(b"hello\n").unwrap();

    let mut line = Vec::new();
    BufReader::new(&stream).read_until(b'\n', &mut line).unwrap();
    let error = Response::decode(&line).unwrap().error.unwrap();
    assert_eq!(error.name, "ProtocolError");
    assert_eq!(error.message, "Could not parse request");
}

#[test]
fn test_serves_many_connections() {
    let server = server();
    let mut session = SyncSession::new(server.local_addr());
    for _ in 0..20 {
        assert!(session
            .call(&Request::new(Method::GetTimestamp, vec![]))
            .unwrap()
            .into_result()
            .is_ok());
    }
}

#[test]
fn test_dropped_server_stops_listening() {
    let addr = server().local_addr();
    let mut session = SyncSession::new(addr);
    let result = session.call(&Request::new(Method::GetTimestamp, vec![]));
    assert!(matches!(
        result,
        Err(Error::Transport { op: TransportOp::Connect, .. })
    ));
}

#[test]
fn test_busy_address_is_a_listen_error() {
    let server = server();
    let result = GatewayServer::spawn(server.local_addr());
    assert!(matches!(
        result,
        Err(Error::Transport { op: TransportOp::Listen, .. })
    ));
}
