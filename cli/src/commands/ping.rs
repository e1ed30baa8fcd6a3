use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use colored::*;
use latprobe_common::config::Config;
use latprobe_common::measurement::Report;
use latprobe_core::measurement::MeasurementService;
use latprobe_core::scanner::{SurgeEchoTransport, TokioConnector};
use latprobe_core::sink::ResultSink;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::terminal::format::{self, Detail};
use crate::terminal::print;
use crate::terminal::spinner::SpinnerHandle;

pub async fn ping(
    client: &str,
    cfg: &Config,
    sink: Arc<dyn ResultSink>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let spinner = SpinnerHandle::start(format!("Measuring the neighbourhood of {client}..."));
    let service = MeasurementService::new(
        cfg,
        Arc::new(SurgeEchoTransport::new()),
        Arc::new(TokioConnector),
        sink,
    )?
    .with_progress(spinner.batch_reporter());

    let started = Instant::now();
    let report = service
        .run(client, cancel)
        .await
        .with_context(|| format!("measuring {client}"))?;
    drop(spinner);

    print_report(&report, started.elapsed());
    Ok(())
}

fn print_report(report: &Report, total_time: Duration) {
    print::header("latency report");

    let mut shown = 0;
    for icmp in &report.icmp {
        let mut details: Vec<Detail> = format::icmp_detail(icmp).into_iter().collect();
        if let Some(tcp) = report.tcp_for(icmp.address) {
            details.extend(format::tcp_details(tcp));
        }
        if details.is_empty() {
            continue;
        }
        print::tree_head(shown, &icmp.address.to_string());
        print::as_tree_one_level(&details);
        shown += 1;
    }

    if shown == 0 {
        print::print_status("No address answered a single probe".red().to_string());
    }

    print::fat_separator();
    print::aligned_line("Client", report.client_address);
    print::aligned_line("Mean ICMP RTT", format::rtt_ms(report.mean_icmp_rtt));
    print::aligned_line("Mean TCP RTT", format::rtt_ms(report.mean_tcp_rtt));
    print::aligned_line("Responding", format!("{shown} of {}", report.icmp.len()));
    print::aligned_line("Elapsed", format!("{:.2}s", total_time.as_secs_f64()).yellow());
    print::aligned_line("Report id", &report.id);

    if report.cancelled {
        warn!("Measurement was interrupted; the report is partial");
    }
    print::end_of_program();
}
