mod commands;
mod terminal;

use std::sync::Arc;

use anyhow::Context;
use commands::{CommandLine, Commands, devices, ping, trace};
use is_root::is_root;
use latprobe_core::network::resolve_device;
use latprobe_core::sink::{JsonLinesSink, ResultSink};
use terminal::{logging, print};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    logging::init(&commands.errlog, commands.verbose)?;
    print::banner();

    if let Commands::Devices = commands.command {
        return devices::devices();
    }

    if !is_root() {
        warn!("Not running as root: ICMP probes and packet capture will likely fail");
    }

    let cfg = commands.probe.to_config();
    cfg.validate().context("invalid configuration")?;
    resolve_device(&cfg.device).context("resolving capture device")?;
    let sink: Arc<dyn ResultSink> = Arc::new(JsonLinesSink::open(&commands.logfile)?);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight probes");
            on_interrupt.cancel();
        }
    });

    match commands.command {
        Commands::Ping { client } => {
            print::header("getting ready to measure");
            ping::ping(&client, &cfg, sink, &cancel).await
        }
        Commands::Trace { client, port } => {
            print::header("getting ready to trace");
            trace::trace(&client, port, &cfg, sink, &cancel).await
        }
        Commands::Devices => Ok(()),
    }
}
