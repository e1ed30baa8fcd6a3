#![cfg(test)]
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use latprobe_common::config::Config;
use latprobe_core::sink::{MemorySink, NullSink};
use latprobe_core::trace::TraceSession;
use latprobe_protocols::ObservedPacket;
use tokio_util::sync::CancellationToken;

use crate::fakes::{PathInjector, QueueCapture, time_exceeded};

const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
const CLIENT: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 40);
const GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const UPSTREAM: Ipv4Addr = Ipv4Addr::new(100, 64, 0, 1);

/// Two routers answer, one of them twice, plus a stray Time Exceeded for
/// someone else's traffic.
#[tokio::test(start_paused = true)]
async fn hops_are_collected_once_each() {
    let (capture, frames) = QueueCapture::new();
    let released = capture.released.clone();
    let injected = Arc::new(AtomicUsize::new(0));
    let injector = PathInjector {
        local: LOCAL,
        hops: vec![GATEWAY, UPSTREAM, GATEWAY],
        frames: frames.clone(),
        injected: injected.clone(),
    };

    // Quotes a datagram toward a different destination.
    let mut foreign = vec![0u8; 28];
    foreign[0] = 0x45;
    foreign[9] = 6;
    foreign[16..20].copy_from_slice(&[203, 0, 113, 1]);
    frames.send(time_exceeded(UPSTREAM, LOCAL, &foreign)).unwrap();

    let sink = Arc::new(MemorySink::new());
    let session = TraceSession::new(
        &Config::default(),
        "eth0",
        CLIENT,
        8443,
        capture,
        Box::new(injector),
        sink.clone(),
    );

    let report = session.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(injected.load(Ordering::SeqCst), 1);
    assert!(released.load(Ordering::Relaxed));
    assert_eq!(report.hops, vec![GATEWAY, UPSTREAM]);
    assert_eq!(report.observed.len(), 4);
    assert_eq!(report.segment.source, LOCAL);
    assert_eq!(report.segment.sequence, 11_111);
    assert!(report.observed.iter().all(|p| matches!(p, ObservedPacket::Icmp { .. })));
    assert_eq!(sink.traces().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_cuts_listen_window_short() {
    let (capture, frames) = QueueCapture::new();
    let injector = PathInjector {
        local: LOCAL,
        hops: vec![GATEWAY],
        frames,
        injected: Arc::new(AtomicUsize::new(0)),
    };
    let cfg = Config {
        listen_window: std::time::Duration::from_secs(3_600),
        ..Default::default()
    };
    let session = TraceSession::new(
        &cfg,
        "eth0",
        CLIENT,
        8443,
        capture,
        Box::new(injector),
        Arc::new(NullSink),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let report = session.run(&cancel).await.unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(60));
    assert!(report.cancelled);
    assert_eq!(report.hops, vec![GATEWAY]);
}

#[tokio::test(start_paused = true)]
async fn abandoned_session_releases_capture() {
    let (capture, frames) = QueueCapture::new();
    let released = capture.released.clone();
    let injector = PathInjector {
        local: LOCAL,
        hops: vec![GATEWAY],
        frames,
        injected: Arc::new(AtomicUsize::new(0)),
    };
    let session = TraceSession::new(
        &Config::default(),
        "eth0",
        CLIENT,
        8443,
        capture,
        Box::new(injector),
        Arc::new(NullSink),
    );

    let cancel = CancellationToken::new();
    let outcome = tokio::time::timeout(Duration::from_millis(500), session.run(&cancel)).await;
    assert!(outcome.is_err());

    // Let the decode task observe the stop and drop its handle.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(released.load(Ordering::Relaxed));
    assert!(!cancel.is_cancelled());
}
