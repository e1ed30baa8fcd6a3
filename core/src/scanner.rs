//! The probing **capabilities** and the probers built on top of them.
//!
//! Probers never touch sockets directly. Echo requests go through an
//! [`EchoTransport`] and connect attempts through a [`Connector`], so the
//! scheduling, timing and classification logic can run against substitutes
//! in tests without real packet I/O.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;

pub mod icmp;
pub mod tcp;

pub use icmp::{IcmpProber, SurgeEchoTransport};
pub use tcp::{TcpProber, TokioConnector};

/// Result of a single echo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoOutcome {
    Reply(Duration),
    /// No reply within the timeout.
    Lost,
    /// The request could not be built or sent. Ends the burst for this address.
    Failed(String),
}

#[async_trait]
pub trait EchoTransport: Send + Sync {
    async fn echo(
        &self,
        addr: Ipv4Addr,
        identifier: u16,
        sequence: u16,
        timeout: Duration,
    ) -> EchoOutcome;
}

/// Result of a single connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// The peer answered with a reset.
    Refused,
    TimedOut,
    Unreachable(String),
}

impl ConnectOutcome {
    /// Connected and refused both prove a round trip to something answering
    /// for the address.
    pub fn is_round_trip(&self) -> bool {
        matches!(self, ConnectOutcome::Connected | ConnectOutcome::Refused)
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, dst: SocketAddrV4, timeout: Duration) -> ConnectOutcome;
}

pub(crate) fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_counts_as_round_trip() {
        assert!(ConnectOutcome::Connected.is_round_trip());
        assert!(ConnectOutcome::Refused.is_round_trip());
        assert!(!ConnectOutcome::TimedOut.is_round_trip());
        assert!(!ConnectOutcome::Unreachable("no route".into()).is_round_trip());
    }

    #[test]
    fn millis_keep_fractions() {
        assert_eq!(as_millis_f64(Duration::from_micros(1_500)), 1.5);
    }
}
