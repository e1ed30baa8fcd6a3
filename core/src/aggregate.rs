//! Merges per-address results into a single [`Report`].
//!
//! The builder is owned by exactly one collector. Probe tasks hand their
//! results back through their join handles and never touch it directly.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use chrono::Utc;
use latprobe_common::measurement::{IcmpMeasurement, Report, TcpHostMeasurement, stats};
use thiserror::Error;
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("{kind} result for {address} was already collected")]
    Duplicate { kind: &'static str, address: Ipv4Addr },
}

#[derive(Debug)]
pub struct ReportBuilder {
    client: Ipv4Addr,
    icmp: BTreeMap<Ipv4Addr, IcmpMeasurement>,
    tcp: BTreeMap<Ipv4Addr, TcpHostMeasurement>,
    cancelled: bool,
}

impl ReportBuilder {
    pub fn new(client: Ipv4Addr) -> Self {
        Self {
            client,
            icmp: BTreeMap::new(),
            tcp: BTreeMap::new(),
            cancelled: false,
        }
    }

    pub fn insert_icmp(&mut self, m: IcmpMeasurement) -> Result<(), AggregateError> {
        if self.icmp.contains_key(&m.address) {
            return Err(AggregateError::Duplicate {
                kind: "icmp",
                address: m.address,
            });
        }
        self.icmp.insert(m.address, m);
        Ok(())
    }

    pub fn insert_tcp(&mut self, m: TcpHostMeasurement) -> Result<(), AggregateError> {
        if self.tcp.contains_key(&m.address) {
            return Err(AggregateError::Duplicate {
                kind: "tcp",
                address: m.address,
            });
        }
        self.tcp.insert(m.address, m);
        Ok(())
    }

    /// Records a failed measurement for every address in `batch` that has no
    /// result of the given kind yet. Returns how many were filled in.
    pub fn fill_missing(&mut self, batch: &[Ipv4Addr], reason: &str) -> usize {
        let mut filled = 0;
        for &addr in batch {
            if !self.icmp.contains_key(&addr) {
                self.icmp.insert(addr, IcmpMeasurement::failed(addr, reason));
                filled += 1;
            }
            if !self.tcp.contains_key(&addr) {
                self.tcp.insert(addr, TcpHostMeasurement::failed(addr, reason));
                filled += 1;
            }
        }
        filled
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Computes the subnet-wide means and freezes the result.
    pub fn finish(self) -> Report {
        let mean_icmp_rtt = stats::mean_of_positive(self.icmp.values().filter_map(|m| m.avg_rtt()));
        let mean_tcp_rtt = stats::mean_of_positive(
            self.tcp
                .values()
                .flat_map(|h| h.ports.iter())
                .filter_map(|p| p.avg_rtt()),
        );

        Report {
            id: Uuid::new_v4().to_string(),
            client_address: self.client,
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            icmp: self.icmp.into_values().collect(),
            mean_icmp_rtt,
            tcp: self.tcp.into_values().collect(),
            mean_tcp_rtt,
            cancelled: self.cancelled,
        }
    }
}
