//! Periodic TCP connect timing across a fixed port set.
//!
//! ICMP is often filtered and some proxies only intercept specific ports, so
//! connect timings are collected per port. A completed handshake and an
//! immediate reset are both valid round trips; anything else is recorded as a
//! `0` sample and left out of the statistics.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use latprobe_common::config::Config;
use latprobe_common::measurement::{TcpHostMeasurement, TcpPortMeasurement, TcpSample};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ConnectOutcome, Connector, as_millis_f64};
use crate::sink::{Record, ResultSink};

/// Plain `connect(2)` through the tokio reactor.
pub struct TokioConnector;

#[async_trait]
impl Connector for TokioConnector {
    async fn connect(&self, dst: SocketAddrV4, timeout: Duration) -> ConnectOutcome {
        match time::timeout(timeout, TcpStream::connect(dst)).await {
            Ok(Ok(_stream)) => ConnectOutcome::Connected,
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => ConnectOutcome::Refused,
            Ok(Err(e)) => ConnectOutcome::Unreachable(e.to_string()),
            Err(_elapsed) => ConnectOutcome::TimedOut,
        }
    }
}

pub struct TcpProber {
    connector: Arc<dyn Connector>,
    sink: Arc<dyn ResultSink>,
    ports: Arc<[u16]>,
    count: u16,
    timeout: Duration,
    interval: Duration,
}

impl TcpProber {
    pub fn new(connector: Arc<dyn Connector>, sink: Arc<dyn ResultSink>, cfg: &Config) -> Self {
        let ports: BTreeSet<u16> = cfg.ports.iter().copied().collect();
        Self {
            connector,
            sink,
            ports: ports.into_iter().collect(),
            count: cfg.tcp_count,
            timeout: cfg.tcp_timeout,
            interval: cfg.tcp_interval,
        }
    }

    /// Runs one probe loop per configured port, all at once, and waits for
    /// every loop to finish.
    pub async fn probe(&self, addr: Ipv4Addr, cancel: &CancellationToken) -> TcpHostMeasurement {
        let mut loops: JoinSet<TcpPortMeasurement> = JoinSet::new();
        for &port in self.ports.iter() {
            let port_loop = PortLoop {
                connector: self.connector.clone(),
                sink: self.sink.clone(),
                dst: SocketAddrV4::new(addr, port),
                count: self.count,
                timeout: self.timeout,
                interval: self.interval,
                cancel: cancel.clone(),
            };
            loops.spawn(port_loop.run());
        }

        let mut measured: Vec<TcpPortMeasurement> = Vec::with_capacity(self.ports.len());
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(m) => measured.push(m),
                Err(e) => warn!("tcp probe loop for {addr} ended abnormally: {e}"),
            }
        }

        // A loop that died leaves its port with no samples rather than no entry.
        for &port in self.ports.iter() {
            if !measured.iter().any(|m| m.port == port) {
                measured.push(TcpPortMeasurement::new(port, Vec::new()));
            }
        }

        TcpHostMeasurement::new(addr, measured)
    }
}

struct PortLoop {
    connector: Arc<dyn Connector>,
    sink: Arc<dyn ResultSink>,
    dst: SocketAddrV4,
    count: u16,
    timeout: Duration,
    interval: Duration,
    cancel: CancellationToken,
}

impl PortLoop {
    async fn run(self) -> TcpPortMeasurement {
        let mut sequence: u64 = u64::from(rand::random::<u32>());
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut samples: Vec<f64> = Vec::with_capacity(self.count as usize);
        for _ in 0..self.count {
            sequence += 1;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = self.connector.connect(self.dst, self.timeout) => outcome,
            };
            samples.push(self.sample(sequence, outcome, started.elapsed()));
        }

        TcpPortMeasurement::new(self.dst.port(), samples)
    }

    fn sample(&self, sequence: u64, outcome: ConnectOutcome, elapsed: Duration) -> f64 {
        if !outcome.is_round_trip() {
            debug!("tcp {} seq={sequence} failed: {outcome:?}", self.dst);
            return 0.0;
        }

        let ms = as_millis_f64(elapsed);
        debug!("tcp {} seq={sequence} {outcome:?} in {ms:.3}ms", self.dst);
        self.sink.record(Record::Sample(TcpSample {
            destination: self.dst.to_string(),
            sequence_number: sequence,
            time_in_milliseconds: ms,
        }));
        ms
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
