//! Stream-lifecycle scenarios: close idempotence, write completion, drain, and UDP
//! payload-size enforcement (§8 properties 8-11), driven against real sockets bound to
//! loopback/ephemeral ports.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use swazi_runtime::core::active_work::ActiveWorkRegistry;
use swazi_runtime::core::bridge::{self, CallbackPayload};
use swazi_runtime::core::reactor::Reactor;
use swazi_runtime::core::scheduler::Scheduler;
use swazi_runtime::streams::tcp::{TcpServer, TcpSocket};
use swazi_runtime::streams::udp::UdpHandle;
use swazi_runtime::CallbackHandle;

type NativeThunk = Box<dyn Fn() + Send + Sync>;

/// A runner grounded on [`swazi_runtime::test_support`]'s recording runner, but one
/// that actually invokes a boxed Rust closure stashed inside the `CallbackHandle`
/// instead of just logging it — every scenario here delivers native test closures, not
/// real script callbacks, so there's no evaluator to stand in for.
fn invoking_runner() -> Arc<dyn Fn(CallbackPayload) + Send + Sync> {
    Arc::new(|payload: CallbackPayload| {
        if let Some(cb) = payload.callback {
            if let Some(thunk) = cb.0.downcast_ref::<NativeThunk>() {
                thunk();
            }
        }
    })
}

fn native_callback(f: impl Fn() + Send + Sync + 'static) -> CallbackHandle {
    CallbackHandle::new(Box::new(f) as NativeThunk)
}

fn start_runtime() -> (Arc<Reactor>, Arc<Scheduler>) {
    let reactor = Reactor::start("stream-scenario-reactor").unwrap();
    let scheduler = Arc::new(Scheduler::new());
    bridge::register(Arc::clone(&scheduler), reactor.submitter(), invoking_runner());
    (reactor, scheduler)
}

/// Repeatedly drains the scheduler's queues (so deliveries made from the reactor thread
/// actually run) while waiting for `predicate` to become true.
fn wait_until(scheduler: &Scheduler, timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + timeout;
    loop {
        while scheduler.run_one() {}
        if predicate() {
            return true;
        }
        if Instant::now() >= end {
            return predicate();
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// §8 scenario D: a real client/server TCP round trip. The server accepts and the
/// client connects, writes, and its write-completion callback runs exactly once.
#[test]
fn tcp_write_completion_runs_exactly_once_on_successful_send() {
    let (reactor, scheduler) = start_runtime();
    let active_work = Arc::new(ActiveWorkRegistry::new());

    let accepted_count = Arc::new(AtomicUsize::new(0));
    let accepted_for_cb = Arc::clone(&accepted_count);
    let server = TcpServer::listen(
        &reactor,
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        0,
        native_callback(move || { accepted_for_cb.fetch_add(1, Ordering::SeqCst); }),
        None,
        None,
    );

    assert!(wait_until(&scheduler, Duration::from_secs(2), || server.local_addr().is_some()));
    let server_addr = server.local_addr().expect("server must have bound by now");

    let connected = Arc::new(AtomicUsize::new(0));
    let connected_for_cb = Arc::clone(&connected);
    let client = TcpSocket::connect(
        &reactor,
        &active_work,
        server_addr,
        native_callback(move || { connected_for_cb.fetch_add(1, Ordering::SeqCst); }),
        native_callback(|| {}),
    )
    .expect("non-blocking connect should not fail synchronously");

    assert!(wait_until(&scheduler, Duration::from_secs(2), || connected.load(Ordering::SeqCst) == 1));
    assert!(wait_until(&scheduler, Duration::from_secs(2), || accepted_count.load(Ordering::SeqCst) == 1));

    let write_completions = Arc::new(AtomicUsize::new(0));
    let write_completions_for_cb = Arc::clone(&write_completions);
    client.write(b"hello, server".to_vec(), Some(native_callback(move || { write_completions_for_cb.fetch_add(1, Ordering::SeqCst); })));

    assert!(wait_until(&scheduler, Duration::from_secs(2), || write_completions.load(Ordering::SeqCst) == 1));
    // Give any spurious extra completion a chance to land before the final assertion.
    std::thread::sleep(Duration::from_millis(50));
    while scheduler.run_one() {}
    assert_eq!(write_completions.load(Ordering::SeqCst), 1);
    assert!(!client.writable_needs_drain());

    client.close();
    server.close();
    reactor.shutdown();
    bridge::unregister();
}

/// §8 property 9: closing a socket with an unflushed write in flight fails that
/// write's completion callback instead of silently dropping it.
#[test]
fn tcp_close_fails_pending_write_completion_instead_of_dropping_it() {
    let (reactor, scheduler) = start_runtime();
    let active_work = Arc::new(ActiveWorkRegistry::new());

    let connect_errors = Arc::new(AtomicUsize::new(0));
    let connect_errors_for_cb = Arc::clone(&connect_errors);
    let client = TcpSocket::connect(
        &reactor,
        &active_work,
        "127.0.0.1:1".parse().unwrap(),
        native_callback(|| {}),
        native_callback(move || { connect_errors_for_cb.fetch_add(1, Ordering::SeqCst); }),
    )
    .expect("non-blocking connect should not fail synchronously");

    assert!(wait_until(&scheduler, Duration::from_secs(2), || connect_errors.load(Ordering::SeqCst) == 1));

    let failed = Arc::new(AtomicUsize::new(0));
    let failed_for_cb = Arc::clone(&failed);
    client.write(vec![0u8; 64], Some(native_callback(move || { failed_for_cb.fetch_add(1, Ordering::SeqCst); })));
    client.close();

    assert!(wait_until(&scheduler, Duration::from_secs(2), || failed.load(Ordering::SeqCst) == 1));
    reactor.shutdown();
    bridge::unregister();
}

/// §8 property 11: a UDP send over 65507 bytes rejects via the completion callback and
/// never reaches the OS socket call.
#[test]
fn udp_oversized_payload_rejects_without_sending() {
    let (reactor, scheduler) = start_runtime();
    let handle = UdpHandle::bind(&reactor, IpAddr::V4(Ipv4Addr::LOCALHOST), 0, None).unwrap();

    let rejected = Arc::new(AtomicUsize::new(0));
    let rejected_for_cb = Arc::clone(&rejected);
    let oversized = vec![0u8; 65_508];
    handle.send(
        oversized,
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        9,
        Some(native_callback(move || { rejected_for_cb.fetch_add(1, Ordering::SeqCst); })),
    );

    assert!(wait_until(&scheduler, Duration::from_millis(500), || rejected.load(Ordering::SeqCst) == 1));
    handle.close();
    reactor.shutdown();
    bridge::unregister();
}

/// A payload at or under the hard ceiling is accepted and actually sent.
#[test]
fn udp_send_at_the_size_ceiling_is_accepted() {
    let (reactor, scheduler) = start_runtime();
    let sender = UdpHandle::bind(&reactor, IpAddr::V4(Ipv4Addr::LOCALHOST), 0, None).unwrap();
    let receiver = UdpHandle::bind(&reactor, IpAddr::V4(Ipv4Addr::LOCALHOST), 0, None).unwrap();
    let receiver_addr = receiver.address();

    let sent = Arc::new(AtomicUsize::new(0));
    let sent_for_cb = Arc::clone(&sent);
    let payload = vec![7u8; 1024];
    sender.send(
        payload,
        receiver_addr.ip(),
        receiver_addr.port(),
        Some(native_callback(move || { sent_for_cb.fetch_add(1, Ordering::SeqCst); })),
    );

    assert!(wait_until(&scheduler, Duration::from_millis(500), || sent.load(Ordering::SeqCst) == 1));
    sender.close();
    receiver.close();
    reactor.shutdown();
    bridge::unregister();
}

/// §8 property 8: closing a socket multiple times produces exactly one `close`
/// delivery.
#[test]
fn udp_close_is_idempotent() {
    let (reactor, scheduler) = start_runtime();
    let handle = UdpHandle::bind(&reactor, IpAddr::V4(Ipv4Addr::LOCALHOST), 0, None).unwrap();

    let close_count = Arc::new(AtomicUsize::new(0));
    let close_count_for_cb = Arc::clone(&close_count);
    handle.on("close", native_callback(move || { close_count_for_cb.fetch_add(1, Ordering::SeqCst); }));

    handle.close();
    handle.close();
    handle.close();

    assert!(wait_until(&scheduler, Duration::from_millis(300), || close_count.load(Ordering::SeqCst) >= 1));
    // Give any spurious extra delivery a chance to land before the final assertion.
    std::thread::sleep(Duration::from_millis(50));
    while scheduler.run_one() {}
    assert_eq!(close_count.load(Ordering::SeqCst), 1);
    reactor.shutdown();
    bridge::unregister();
}
