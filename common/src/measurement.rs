//! # Measurement Model
//!
//! Per-address results produced by the probers and the report they are merged
//! into. Everything here is plain data: once built, nothing is mutated again.

pub mod stats;

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

pub use stats::RttStats;

/// Outcome of an echo burst against one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcmpMeasurement {
    pub address: Ipv4Addr,
    pub sent: u16,
    pub received: u16,
    /// Fraction of requests left unanswered, `0.0..=1.0`.
    pub loss_ratio: f64,
    pub rtt: Option<RttStats>,
    /// Set when the probe could not be built or run for this address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl IcmpMeasurement {
    pub fn from_replies(address: Ipv4Addr, sent: u16, rtts: &[f64]) -> Self {
        let received = rtts.len() as u16;
        let loss_ratio = if sent == 0 {
            0.0
        } else {
            f64::from(sent - received.min(sent)) / f64::from(sent)
        };
        Self {
            address,
            sent,
            received,
            loss_ratio,
            rtt: stats::summarize(rtts),
            failure: None,
        }
    }

    pub fn failed(address: Ipv4Addr, reason: impl Into<String>) -> Self {
        Self {
            address,
            sent: 0,
            received: 0,
            loss_ratio: 0.0,
            rtt: None,
            failure: Some(reason.into()),
        }
    }

    /// Keeps the counts and statistics gathered so far and records why the
    /// burst ended early.
    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn avg_rtt(&self) -> Option<f64> {
        self.rtt.map(|r| r.avg)
    }
}

/// Connect timings for one (address, port) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpPortMeasurement {
    pub port: u16,
    /// Milliseconds per attempt, in attempt order. `0.0` marks a failed attempt.
    pub samples: Vec<f64>,
    pub rtt: Option<RttStats>,
}

impl TcpPortMeasurement {
    pub fn new(port: u16, samples: Vec<f64>) -> Self {
        let rtt = stats::summarize(&samples);
        Self { port, samples, rtt }
    }

    pub fn avg_rtt(&self) -> Option<f64> {
        self.rtt.map(|r| r.avg)
    }
}

/// Every port probed on one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpHostMeasurement {
    pub address: Ipv4Addr,
    pub ports: Vec<TcpPortMeasurement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl TcpHostMeasurement {
    pub fn new(address: Ipv4Addr, mut ports: Vec<TcpPortMeasurement>) -> Self {
        ports.sort_by_key(|p| p.port);
        Self {
            address,
            ports,
            failure: None,
        }
    }

    pub fn failed(address: Ipv4Addr, reason: impl Into<String>) -> Self {
        Self {
            address,
            ports: Vec::new(),
            failure: Some(reason.into()),
        }
    }

    pub fn port(&self, port: u16) -> Option<&TcpPortMeasurement> {
        self.ports.iter().find(|p| p.port == port)
    }
}

/// A single completed connect attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpSample {
    pub destination: String,
    pub sequence_number: u64,
    pub time_in_milliseconds: f64,
}

/// Everything measured for one client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub client_address: Ipv4Addr,
    pub timestamp: String,
    pub icmp: Vec<IcmpMeasurement>,
    /// Mean of the non-zero per-address ICMP averages.
    pub mean_icmp_rtt: Option<f64>,
    pub tcp: Vec<TcpHostMeasurement>,
    /// Mean of the non-zero per-port TCP averages, across all addresses.
    pub mean_tcp_rtt: Option<f64>,
    pub cancelled: bool,
}

impl Report {
    pub fn icmp_for(&self, address: Ipv4Addr) -> Option<&IcmpMeasurement> {
        self.icmp.iter().find(|m| m.address == address)
    }

    pub fn tcp_for(&self, address: Ipv4Addr) -> Option<&TcpHostMeasurement> {
        self.tcp.iter().find(|m| m.address == address)
    }
}
