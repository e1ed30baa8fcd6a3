pub mod devices;
pub mod ping;
pub mod trace;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use latprobe_common::config::{ANY_DEVICE, Config, DEFAULT_PORTS};

#[derive(Parser)]
#[command(name = "latprobe")]
#[command(about = "Latency measurement toward a client and its /24 neighbourhood.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// Append result records (JSON lines) to this file
    #[arg(long, global = true, default_value = "logFile.jsonl")]
    pub logfile: PathBuf,

    /// Append warnings and errors to this file
    #[arg(long, global = true, default_value = "errlog.txt")]
    pub errlog: PathBuf,

    /// Show per-probe diagnostics
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub probe: ProbeArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Measure ICMP and TCP latency across the client's /24
    #[command(alias = "p")]
    Ping { client: String },
    /// Inject a TTL-limited segment toward the client and capture the hops
    #[command(alias = "t")]
    Trace { client: String, port: u16 },
    /// List capture devices
    #[command(alias = "d")]
    Devices,
}

#[derive(Args)]
pub struct ProbeArgs {
    /// Capture device, or "any" for the first usable interface
    #[arg(long, global = true, default_value = ANY_DEVICE)]
    pub device: String,

    /// Addresses measured concurrently per batch
    #[arg(long, global = true, default_value_t = 100)]
    pub batch_size: usize,

    /// Upper bound on probe units running at once
    #[arg(long, global = true, default_value_t = 512)]
    pub max_in_flight: usize,

    /// TCP ports probed on every address
    #[arg(long, global = true, value_delimiter = ',', default_values_t = DEFAULT_PORTS)]
    pub ports: Vec<u16>,

    /// Requests per address and per port
    #[arg(long, global = true, default_value_t = 5)]
    pub count: u16,

    /// TCP connect timeout in milliseconds
    #[arg(long, global = true, default_value_t = 1_000)]
    pub tcp_timeout_ms: u64,

    /// Spacing between TCP attempts in milliseconds
    #[arg(long, global = true, default_value_t = 1_100)]
    pub tcp_interval_ms: u64,

    /// TTL of the injected trace segment
    #[arg(long, global = true, default_value_t = 2)]
    pub ttl: u8,

    /// How long a trace listens for responses, in seconds
    #[arg(long, global = true, default_value_t = 3)]
    pub listen_secs: u64,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl ProbeArgs {
    pub fn to_config(&self) -> Config {
        Config {
            icmp_count: self.count,
            tcp_count: self.count,
            tcp_timeout: Duration::from_millis(self.tcp_timeout_ms),
            tcp_interval: Duration::from_millis(self.tcp_interval_ms),
            ports: self.ports.clone(),
            batch_size: self.batch_size,
            max_in_flight: self.max_in_flight,
            device: self.device.clone(),
            ttl: self.ttl,
            listen_window: Duration::from_secs(self.listen_secs),
            ..Default::default()
        }
    }
}
