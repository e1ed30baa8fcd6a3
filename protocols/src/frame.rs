//! Classification of captured frames into the packets a trace session cares
//! about: direct TCP segments and ICMP messages.

use std::net::Ipv4Addr;

use pnet::packet::Packet;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use serde::Serialize;

use crate::DecodeError;
use crate::icmp::{self, EmbeddedHeaders, ICMP_HDR_LEN};
use crate::tcp::InjectedSegment;

/// Framing of the bytes handed over by the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// Point-to-point devices hand over bare IP datagrams.
    RawIp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ObservedPacket {
    #[serde(rename_all = "camelCase")]
    Tcp {
        source: Ipv4Addr,
        destination: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        sequence: u32,
        flags: u8,
    },
    #[serde(rename_all = "camelCase")]
    Icmp {
        responder: Ipv4Addr,
        icmp_type: u8,
        icmp_code: u8,
        embedded: Option<EmbeddedHeaders>,
    },
}

impl ObservedPacket {
    /// True for a Time Exceeded message quoting `segment`.
    pub fn is_hop_response_to(&self, segment: &InjectedSegment) -> bool {
        match self {
            ObservedPacket::Icmp {
                icmp_type,
                embedded: Some(inner),
                ..
            } => {
                *icmp_type == icmp::TIME_EXCEEDED
                    && inner.is_tcp()
                    && inner.src_port == segment.src_port
                    && inner.dst_port == segment.dst_port
                    && inner.destination == segment.destination
            }
            _ => false,
        }
    }

    pub fn responder(&self) -> Ipv4Addr {
        match self {
            ObservedPacket::Tcp { source, .. } => *source,
            ObservedPacket::Icmp { responder, .. } => *responder,
        }
    }
}

/// Decodes one captured frame.
///
/// Returns `Ok(None)` for traffic that is neither IPv4/TCP nor IPv4/ICMP. ICMP
/// errors whose quoted datagram cannot be parsed fail with the decode error.
pub fn decode_frame(bytes: &[u8], link: LinkType) -> Result<Option<ObservedPacket>, DecodeError> {
    match link {
        LinkType::Ethernet => {
            let eth = EthernetPacket::new(bytes).ok_or(DecodeError::Truncated {
                what: "ethernet frame",
                needed: EthernetPacket::minimum_packet_size(),
                got: bytes.len(),
            })?;
            if eth.get_ethertype() != EtherTypes::Ipv4 {
                return Ok(None);
            }
            decode_ipv4(eth.payload())
        }
        LinkType::RawIp => decode_ipv4(bytes),
    }
}

pub fn decode_ipv4(bytes: &[u8]) -> Result<Option<ObservedPacket>, DecodeError> {
    let ip = Ipv4Packet::new(bytes).ok_or(DecodeError::Truncated {
        what: "ipv4 header",
        needed: Ipv4Packet::minimum_packet_size(),
        got: bytes.len(),
    })?;
    if ip.get_version() != 4 {
        return Ok(None);
    }

    match ip.get_next_level_protocol() {
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(ip.payload()).ok_or(DecodeError::Truncated {
                what: "tcp header",
                needed: TcpPacket::minimum_packet_size(),
                got: ip.payload().len(),
            })?;
            Ok(Some(ObservedPacket::Tcp {
                source: ip.get_source(),
                destination: ip.get_destination(),
                src_port: tcp.get_source(),
                dst_port: tcp.get_destination(),
                sequence: tcp.get_sequence(),
                flags: tcp.get_flags(),
            }))
        }
        IpNextHeaderProtocols::Icmp => {
            let payload = ip.payload();
            if payload.len() < ICMP_HDR_LEN {
                return Err(DecodeError::Truncated {
                    what: "icmp header",
                    needed: ICMP_HDR_LEN,
                    got: payload.len(),
                });
            }
            let (icmp_type, icmp_code) = (payload[0], payload[1]);
            let embedded = if icmp::quotes_original(icmp_type) {
                Some(icmp::decode_embedded(&payload[ICMP_HDR_LEN..])?)
            } else {
                None
            };
            Ok(Some(ObservedPacket::Icmp {
                responder: ip.get_source(),
                icmp_type,
                icmp_code,
                embedded,
            }))
        }
        _ => Ok(None),
    }
}
