use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::frame::ObservedPacket;

/// Restricts a trace capture to the client's connection plus any ICMP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFilter {
    pub device: String,
    pub client_address: Ipv4Addr,
    pub client_port: u16,
}

impl CaptureFilter {
    pub fn new(device: impl Into<String>, client_address: Ipv4Addr, client_port: u16) -> Self {
        Self {
            device: device.into(),
            client_address,
            client_port,
        }
    }

    /// The filter in capture-expression syntax.
    pub fn expression(&self) -> String {
        format!(
            "(tcp and port {} and host {}) or icmp",
            self.client_port, self.client_address
        )
    }

    /// Evaluates [`Self::expression`] against a decoded packet.
    pub fn matches(&self, packet: &ObservedPacket) -> bool {
        match packet {
            ObservedPacket::Icmp { .. } => true,
            ObservedPacket::Tcp {
                source,
                destination,
                src_port,
                dst_port,
                ..
            } => {
                let port = *src_port == self.client_port || *dst_port == self.client_port;
                let host = *source == self.client_address || *destination == self.client_address;
                port && host
            }
        }
    }
}

impl fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.expression(), self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);

    fn tcp(source: Ipv4Addr, src_port: u16, dst_port: u16) -> ObservedPacket {
        ObservedPacket::Tcp {
            source,
            destination: Ipv4Addr::new(192, 0, 2, 1),
            src_port,
            dst_port,
            sequence: 0,
            flags: 0,
        }
    }

    #[test]
    fn renders_expression() {
        let filter = CaptureFilter::new("eth0", CLIENT, 51_234);
        assert_eq!(
            filter.expression(),
            "(tcp and port 51234 and host 198.51.100.7) or icmp"
        );
    }

    #[test]
    fn matches_client_connection_only() {
        let filter = CaptureFilter::new("eth0", CLIENT, 51_234);
        assert!(filter.matches(&tcp(CLIENT, 51_234, 443)));
        assert!(!filter.matches(&tcp(CLIENT, 51_235, 443)));
        assert!(!filter.matches(&tcp(Ipv4Addr::new(10, 0, 0, 1), 51_234, 443)));
    }

    #[test]
    fn matches_any_icmp() {
        let filter = CaptureFilter::new("eth0", CLIENT, 51_234);
        let icmp = ObservedPacket::Icmp {
            responder: Ipv4Addr::new(10, 9, 8, 7),
            icmp_type: 0,
            icmp_code: 0,
            embedded: None,
        };
        assert!(filter.matches(&icmp));
    }
}
