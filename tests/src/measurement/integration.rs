#![cfg(test)]
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use latprobe_common::config::Config;
use latprobe_core::measurement::{BatchProgress, MeasureError, MeasurementService};
use latprobe_core::sink::{JsonLinesSink, MemorySink};
use tokio_util::sync::CancellationToken;

use crate::fakes::{HttpsOnlyConnector, InFlightGauge, NeighbourEcho};

fn neighbour(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

fn service(sink: Arc<MemorySink>, panic_on: Option<Ipv4Addr>) -> MeasurementService {
    MeasurementService::new(
        &Config::default(),
        Arc::new(NeighbourEcho { panic_on }),
        Arc::new(HttpsOnlyConnector),
        sink,
    )
    .unwrap()
}

/// A full cycle for 10.0.0.5 covers the whole /24 and averages only the
/// addresses that answered.
#[tokio::test(start_paused = true)]
async fn full_cycle_for_client() {
    let sink = Arc::new(MemorySink::new());
    let report = service(sink.clone(), None)
        .run("10.0.0.5", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.client_address, neighbour(5));
    assert_eq!(report.icmp.len(), 256);
    assert_eq!(report.tcp.len(), 256);
    assert_eq!(report.icmp[0].address, neighbour(0));
    assert_eq!(report.icmp[255].address, neighbour(255));
    assert!(!report.cancelled);

    // Mean of 1..=10 ms.
    assert_eq!(report.mean_icmp_rtt, Some(5.5));
    let mean_tcp = report.mean_tcp_rtt.unwrap();
    assert!((mean_tcp - 2.0).abs() < 0.01, "mean tcp rtt {mean_tcp}");

    let quiet = report.icmp_for(neighbour(200)).unwrap();
    assert_eq!(quiet.sent, 5);
    assert_eq!(quiet.received, 0);
    assert_eq!(quiet.rtt, None);

    let https = report.tcp_for(neighbour(2)).unwrap();
    assert_eq!(https.ports.len(), 6);
    assert!(https.port(443).unwrap().rtt.is_some());
    assert_eq!(https.port(80).unwrap().samples, vec![0.0; 5]);

    // Three hosts, five valid samples each.
    assert_eq!(sink.samples().len(), 15);
    assert_eq!(sink.reports(), vec![report]);
}

#[tokio::test(start_paused = true)]
async fn progress_is_reported_per_batch() {
    let seen: Arc<Mutex<Vec<BatchProgress>>> = Arc::default();
    let recorder = seen.clone();
    let svc = service(Arc::new(MemorySink::new()), None)
        .with_progress(move |p| recorder.lock().unwrap().push(p));

    svc.run("10.0.0.5:8443", &CancellationToken::new()).await.unwrap();

    let seen = seen.lock().unwrap();
    let done: Vec<usize> = seen.iter().map(|p| p.addresses_done).collect();
    assert_eq!(done, vec![100, 200, 256]);
    assert!(seen.iter().all(|p| p.batches == 3 && p.addresses_total == 256));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_after_current_batch() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let svc = service(Arc::new(MemorySink::new()), None).with_progress(move |_| trigger.cancel());

    let report = svc.run("10.0.0.5", &cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.icmp.len(), 100);
    assert_eq!(report.tcp.len(), 100);
}

/// A cancel that arrives once the last batch is already done leaves the
/// report whole.
#[tokio::test(start_paused = true)]
async fn late_cancellation_keeps_report_complete() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let svc = service(Arc::new(MemorySink::new()), None).with_progress(move |p| {
        if p.batch == p.batches {
            trigger.cancel();
        }
    });

    let report = svc.run("10.0.0.5", &cancel).await.unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.icmp.len(), 256);
    assert_eq!(report.tcp.len(), 256);
}

#[tokio::test(start_paused = true)]
async fn in_flight_units_never_exceed_limit() {
    let gauge = Arc::new(InFlightGauge::default());
    let cfg = Config {
        icmp_count: 2,
        icmp_interval: Duration::from_millis(5),
        tcp_count: 2,
        tcp_timeout: Duration::from_millis(50),
        tcp_interval: Duration::from_millis(60),
        ports: vec![443],
        max_in_flight: 4,
        ..Default::default()
    };
    let report = MeasurementService::new(&cfg, gauge.clone(), gauge.clone(), Arc::new(MemorySink::new()))
        .unwrap()
        .run("10.0.0.5", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.icmp.len(), 256);
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak in flight {peak}");
    assert!(peak >= 2, "peak in flight {peak}");
}

#[tokio::test(start_paused = true)]
async fn panicking_unit_is_recorded_as_failed() {
    let sink = Arc::new(MemorySink::new());
    let report = service(sink, Some(neighbour(77)))
        .run("10.0.0.5", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.icmp.len(), 256);
    let lost = report.icmp_for(neighbour(77)).unwrap();
    assert!(lost.failure.is_some());
    assert!(report.icmp_for(neighbour(78)).unwrap().failure.is_none());
}

#[tokio::test]
async fn bad_client_address_is_rejected() {
    let err = service(Arc::new(MemorySink::new()), None)
        .run("not-an-address", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MeasureError::Address(_)));
}

#[tokio::test(start_paused = true)]
async fn json_lines_use_camel_case_keys() {
    let path = std::env::temp_dir().join(format!("latprobe-{}.jsonl", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let sink = Arc::new(JsonLinesSink::open(&path).unwrap());
    MeasurementService::new(
        &Config::default(),
        Arc::new(NeighbourEcho { panic_on: None }),
        Arc::new(HttpsOnlyConnector),
        sink,
    )
    .unwrap()
    .run("10.0.0.5", &CancellationToken::new())
    .await
    .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let _ = std::fs::remove_file(&path);

    assert_eq!(lines.len(), 16);
    assert!(lines[..15].iter().all(|l| l.get("sequenceNumber").is_some()));
    let report = &lines[15];
    assert_eq!(report["clientAddress"], "10.0.0.5");
    assert_eq!(report["meanIcmpRtt"], 5.5);
}
