//! # Measurement Cycle
//!
//! Implements the "measure a client's neighbourhood" use case.
//!
//! The client's /24 is split into batches. Batches run one after the other;
//! inside a batch every address gets an ICMP unit and a TCP unit, all running
//! concurrently up to the in-flight limit. Each unit returns its result through
//! its join handle to the single collector that owns the [`ReportBuilder`].

use std::net::Ipv4Addr;
use std::sync::Arc;

use latprobe_common::config::{Config, ConfigError};
use latprobe_common::measurement::{IcmpMeasurement, Report, TcpHostMeasurement};
use latprobe_common::network::subnet::{self, AddressError};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregate::ReportBuilder;
use crate::scanner::{Connector, EchoTransport, IcmpProber, TcpProber};
use crate::schedule::{self, ScheduleError};
use crate::sink::{Record, ResultSink};

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Progress notification sent after each batch completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based index of the batch that just finished.
    pub batch: usize,
    pub batches: usize,
    pub addresses_done: usize,
    pub addresses_total: usize,
}

type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

enum UnitResult {
    Icmp(IcmpMeasurement),
    Tcp(TcpHostMeasurement),
}

pub struct MeasurementService {
    icmp: Arc<IcmpProber>,
    tcp: Arc<TcpProber>,
    sink: Arc<dyn ResultSink>,
    batch_size: usize,
    permits: Arc<Semaphore>,
    on_batch_done: Option<ProgressCallback>,
}

impl MeasurementService {
    pub fn new(
        cfg: &Config,
        echo: Arc<dyn EchoTransport>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self, MeasureError> {
        cfg.validate()?;
        Ok(Self {
            icmp: Arc::new(IcmpProber::new(echo, cfg)),
            tcp: Arc::new(TcpProber::new(connector, sink.clone(), cfg)),
            sink,
            batch_size: cfg.batch_size,
            permits: Arc::new(Semaphore::new(cfg.max_in_flight)),
            on_batch_done: None,
        })
    }

    pub fn with_progress(mut self, callback: impl Fn(BatchProgress) + Send + Sync + 'static) -> Self {
        self.on_batch_done = Some(Arc::new(callback));
        self
    }

    /// Runs one full measurement cycle for `client` and hands the report to
    /// the result sink.
    ///
    /// Cancelling `cancel` stops scheduling new batches and cuts in-flight
    /// probes short. The partial report is still produced and flagged.
    pub async fn run(&self, client: &str, cancel: &CancellationToken) -> Result<Report, MeasureError> {
        let client_addr: Ipv4Addr = subnet::parse_client(client)?;
        let addrs: Vec<Ipv4Addr> = subnet::enumerate(client)?;
        let batches = schedule::batches(&addrs, self.batch_size)?;
        let total_batches = batches.len();

        info!(
            "Measuring {} addresses around {client_addr} in {total_batches} batches",
            addrs.len()
        );

        let mut builder = ReportBuilder::new(client_addr);
        let mut done: usize = 0;
        let mut cut_short = false;
        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                cut_short = true;
                break;
            }
            self.run_batch(batch, cancel, &mut builder).await;
            done += batch.len();
            // Probes in this batch were abandoned part way.
            cut_short |= cancel.is_cancelled();

            if let Some(callback) = &self.on_batch_done {
                callback(BatchProgress {
                    batch: index + 1,
                    batches: total_batches,
                    addresses_done: done,
                    addresses_total: addrs.len(),
                });
            }
        }

        if cut_short {
            warn!("Measurement for {client_addr} cancelled after {done} addresses");
            builder.mark_cancelled();
        }

        let report = builder.finish();
        self.sink.record(Record::Report(report.clone()));
        Ok(report)
    }

    async fn run_batch(&self, batch: &[Ipv4Addr], cancel: &CancellationToken, builder: &mut ReportBuilder) {
        let mut units: JoinSet<UnitResult> = JoinSet::new();

        for &addr in batch {
            let (icmp, permits, cancel_icmp) = (self.icmp.clone(), self.permits.clone(), cancel.clone());
            units.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                UnitResult::Icmp(icmp.probe(addr, &cancel_icmp).await)
            });

            let (tcp, permits, cancel_tcp) = (self.tcp.clone(), self.permits.clone(), cancel.clone());
            units.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                UnitResult::Tcp(tcp.probe(addr, &cancel_tcp).await)
            });
        }

        while let Some(joined) = units.join_next().await {
            let inserted = match joined {
                Ok(UnitResult::Icmp(m)) => builder.insert_icmp(m),
                Ok(UnitResult::Tcp(m)) => builder.insert_tcp(m),
                Err(e) => {
                    warn!("Probe task ended abnormally: {e}");
                    continue;
                }
            };
            if let Err(e) = inserted {
                warn!("{e}");
            }
        }

        let filled = builder.fill_missing(batch, "probe task aborted");
        if filled > 0 {
            warn!("{filled} probe units produced no result and were marked failed");
        }
    }
}
