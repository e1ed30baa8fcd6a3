use std::sync::Arc;

use anyhow::Context;
use colored::*;
use latprobe_common::config::Config;
use latprobe_common::network::subnet;
use latprobe_core::network::{LiveCapture, RawInjector, resolve_device};
use latprobe_core::sink::ResultSink;
use latprobe_core::trace::{TraceReport, TraceSession};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::terminal::print;
use crate::terminal::spinner::SpinnerHandle;

pub async fn trace(
    client: &str,
    port: u16,
    cfg: &Config,
    sink: Arc<dyn ResultSink>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let client_addr = subnet::parse_client(client)?;
    let device = resolve_device(&cfg.device).context("resolving capture device")?;
    let source = device.ipv4()?;
    info!("Using {} ({source}) for capture", device.name());

    let injector = RawInjector::open(source)?;
    let session = TraceSession::new(
        cfg,
        device.name(),
        client_addr,
        port,
        Arc::new(LiveCapture::new(device.clone())),
        Box::new(injector),
        sink,
    );

    let spinner = SpinnerHandle::start(format!("Listening for hops toward {client_addr}:{port}..."));
    let report = session.run(cancel).await?;
    drop(spinner);

    print_trace(&report);
    Ok(())
}

fn print_trace(report: &TraceReport) {
    print::header("trace");
    print::aligned_line("Filter", &report.filter);
    print::aligned_line("Device", &report.device);
    print::aligned_line("Injected", format!("{} bytes, ttl {}", report.injected_bytes, report.segment.ttl));
    print::aligned_line("Observed", report.observed.len());
    if report.decode_errors > 0 {
        print::aligned_line("Undecodable", report.decode_errors.to_string().red());
    }

    if report.hops.is_empty() {
        print::print_status("No router answered within the listen window".red().to_string());
    }
    for (idx, hop) in report.hops.iter().enumerate() {
        print::tree_head(idx, &hop.to_string());
    }
    print::end_of_program();
}
