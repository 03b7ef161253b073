mod common;

use std::{net::SocketAddr, path::Path, sync::Arc};

use common::{
    assert_per_device_order, device, direct_roster, failing_device, nameservice, Journal,
    RecordingSink,
};
use gateway::{
    config::{DispatcherKind, HandlerKind},
    dispatch,
    poll::Device,
    Config, Error,
};

const LIMIT: u64 = 8;

fn config(
    nameservice: SocketAddr,
    dispatcher: DispatcherKind,
    handler: HandlerKind,
    scratch: &Path,
) -> Config {
    Config::builder()
        .nameservice(nameservice)
        .dispatcher(dispatcher)
        .event_handler(handler)
        .cpu(0.01)
        .io(0.001)
        .pool_size(4)
        .max_in_flight(1)
        .scratch_dir(scratch.to_owned())
        .event_limit(Some(LIMIT))
        .build()
}

/// Runs three direct devices to the event limit and checks the journal.
fn run_to_limit(dispatcher: DispatcherKind, handler: HandlerKind) -> dispatch::RunReport {
    let scratch = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let devices = [
        device("dev0", &journal),
        device("dev1", &journal),
        device("dev2", &journal),
    ];
    let roster = direct_roster(&devices.iter().collect::<Vec<_>>());
    let config = config(devices[0].addr, dispatcher, handler, scratch.path());
    let sink = RecordingSink(journal.clone());

    let report = dispatch::run(&config, roster, Arc::new(sink)).unwrap();

    assert_eq!(report.events, LIMIT);
    assert_eq!(journal.count("event:"), LIMIT as usize);
    for marker in [
        "EVENT_LIFECYCLE_RETRIEVED:",
        "EVENT_LIFECYCLE_DISPATCHED:",
        "EVENT_LIFECYCLE_DONE:",
    ] {
        assert_eq!(journal.count(marker), LIMIT as usize, "{marker}");
    }
    assert_per_device_order(&journal.entries());
    report
}

#[test]
fn test_serial_dispatcher_inline() {
    let report = run_to_limit(DispatcherKind::Serial, HandlerKind::Serial);
    assert_eq!(report.peak_in_flight, 0);
}

#[test]
fn test_serial_dispatcher_offloading() {
    let report = run_to_limit(DispatcherKind::Serial, HandlerKind::Preemptive);
    assert_eq!(report.peak_in_flight, 1);
}

#[test]
fn test_preemptive_dispatcher_respects_the_ceiling() {
    // the handler setting is ignored: this dispatcher always offloads
    let report = run_to_limit(DispatcherKind::Preemptive, HandlerKind::Serial);
    assert_eq!(report.peak_in_flight, 1);
}

#[test]
fn test_cooperative_dispatcher_serial_handler() {
    run_to_limit(DispatcherKind::Cooperative, HandlerKind::Serial);
}

#[test]
fn test_cooperative_dispatcher_cooperative_handler() {
    run_to_limit(DispatcherKind::Cooperative, HandlerKind::Cooperative);
}

#[test]
fn test_cooperative_dispatcher_preemptive_handler() {
    let report = run_to_limit(DispatcherKind::Cooperative, HandlerKind::Preemptive);
    assert_eq!(report.peak_in_flight, 1);
}

#[test]
fn test_proxied_devices_are_polled_through_the_nameservice() {
    let scratch = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let ns = nameservice(true, &[], &["dev-a", "dev-b"], &journal);
    let roster = vec![
        Device::proxied(ns.addr, "dev-a"),
        Device::proxied(ns.addr, "dev-b"),
    ];

    for dispatcher in [DispatcherKind::Serial, DispatcherKind::Cooperative] {
        let config = config(ns.addr, dispatcher, HandlerKind::Serial, scratch.path());
        let report =
            dispatch::run(&config, roster.clone(), Arc::new(RecordingSink(journal.clone())))
                .unwrap();
        assert_eq!(report.events, LIMIT);
    }
    assert_eq!(
        journal.count("event:dev-a:") + journal.count("event:dev-b:"),
        2 * LIMIT as usize
    );
    assert_per_device_order(&journal.entries());
}

#[test]
fn test_peer_error_is_fatal() {
    let scratch = tempfile::tempdir().unwrap();
    let broken = failing_device();
    let roster = vec![Device::direct(broken.addr)];

    for dispatcher in [
        DispatcherKind::Serial,
        DispatcherKind::Preemptive,
        DispatcherKind::Cooperative,
    ] {
        let config = config(broken.addr, dispatcher, HandlerKind::Serial, scratch.path());
        let result = dispatch::run(&config, roster.clone(), Arc::new(RecordingSink::default()));
        assert!(
            matches!(result, Err(Error::Remote { ref name, .. }) if name == "Error"),
            "{dispatcher}: {result:?}"
        );
    }
}

#[test]
fn test_vanished_device_is_a_transport_error() {
    let scratch = tempfile::tempdir().unwrap();
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    for dispatcher in [DispatcherKind::Serial, DispatcherKind::Cooperative] {
        let config = config(addr, dispatcher, HandlerKind::Serial, scratch.path());
        let err = dispatch::run(&config, vec![Device::direct(addr)], Arc::new(RecordingSink::default()))
            .unwrap_err();
        assert_eq!(err.kind(), "TransportError");
    }
}

#[test]
fn test_full_run_boots_and_dispatches() {
    let scratch = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let dev = device("dev0", &journal);
    let ns = nameservice(true, &[dev.addr], &["dev-a"], &journal);
    let config = Config::builder()
        .nameservice(ns.addr)
        .dispatcher(DispatcherKind::Preemptive)
        .listen("127.0.0.1:0".parse().unwrap())
        .scratch_dir(scratch.path().to_owned())
        .event_limit(Some(4))
        .build();

    let report = gateway::run_with_sink(&config, Arc::new(RecordingSink(journal.clone()))).unwrap();

    assert_eq!(report.events, 4);
    let entries = journal.entries();
    assert!(entries[0].starts_with("verify_gateway:"));
    assert_eq!(entries[1], "hostnames");
    assert_per_device_order(&entries);
}
