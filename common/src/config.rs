//! Runtime settings shared by the probers, the trace session and the CLI.

use std::time::Duration;

use thiserror::Error;

/// Platform wildcard accepted in place of an interface name.
pub const ANY_DEVICE: &str = "any";

pub const DEFAULT_PORTS: [u16; 6] = [53, 80, 443, 3389, 8080, 9100];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
    #[error("tcp interval ({interval:?}) must be strictly greater than the connect timeout ({timeout:?})")]
    IntervalNotAboveTimeout { interval: Duration, timeout: Duration },
    #[error("at least one tcp port must be configured")]
    NoPorts,
    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),
    #[error("ttl must be at least 1")]
    ZeroTtl,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Echo requests sent to every address.
    pub icmp_count: u16,
    /// Time allowed for a single echo reply.
    pub icmp_timeout: Duration,
    /// Spacing between two echo requests to the same address.
    pub icmp_interval: Duration,

    /// Connect attempts per (address, port).
    pub tcp_count: u16,
    pub tcp_timeout: Duration,
    pub tcp_interval: Duration,
    pub ports: Vec<u16>,

    /// Upper bound on addresses probed at once. Batches run back to back.
    pub batch_size: usize,
    /// Upper bound on probe units (one per address per protocol) running at once.
    pub max_in_flight: usize,

    /// Capture device name, or [`ANY_DEVICE`].
    pub device: String,
    pub ttl: u8,
    pub inject_source_port: u16,
    pub inject_sequence: u32,
    pub inject_payload: Vec<u8>,
    /// How long the decode loop keeps listening after the segment is sent.
    pub listen_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            icmp_count: 5,
            icmp_timeout: Duration::from_secs(2),
            icmp_interval: Duration::from_secs(1),
            tcp_count: 5,
            // TCP RTO is 1s (RFC 6298)
            tcp_timeout: Duration::from_millis(1_000),
            tcp_interval: Duration::from_millis(1_100),
            ports: DEFAULT_PORTS.to_vec(),
            batch_size: 100,
            max_in_flight: 512,
            device: ANY_DEVICE.to_string(),
            ttl: 2,
            inject_source_port: 443,
            inject_sequence: 11_111,
            inject_payload: b"latprobe ttl probe".to_vec(),
            listen_window: Duration::from_secs(3),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::ZeroCount("max in flight"));
        }
        if self.icmp_count == 0 {
            return Err(ConfigError::ZeroCount("icmp count"));
        }
        if self.tcp_count == 0 {
            return Err(ConfigError::ZeroCount("tcp count"));
        }
        if self.ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        if self.tcp_interval <= self.tcp_timeout {
            return Err(ConfigError::IntervalNotAboveTimeout {
                interval: self.tcp_interval,
                timeout: self.tcp_timeout,
            });
        }
        if self.ttl == 0 {
            return Err(ConfigError::ZeroTtl);
        }
        Ok(())
    }
}
