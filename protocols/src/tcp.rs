//! TTL-limited TCP segment construction.
//!
//! The segment is a full IPv4 datagram: the receiving router decrements the
//! TTL to zero and answers with ICMP Time Exceeded, quoting our headers back.

use std::net::Ipv4Addr;

use pnet::packet::Packet;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::tcp::{self, MutableTcpPacket, TcpFlags, TcpPacket};
use serde::Serialize;

use crate::PacketError;

pub const IPV4_HDR_LEN: usize = 20;
pub const TCP_HDR_LEN: usize = 20;
const DONT_FRAGMENT: u8 = 0b010;
const WINDOW: u16 = 64_240;

/// One synthetic IPv4 + TCP datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectedSegment {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub sequence: u32,
    pub flags: u8,
    pub ttl: u8,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

impl InjectedSegment {
    /// A `PSH|ACK` segment carrying `payload`.
    pub fn push_ack(
        source: Ipv4Addr,
        destination: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        sequence: u32,
        ttl: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            source,
            destination,
            src_port,
            dst_port,
            sequence,
            flags: TcpFlags::PSH | TcpFlags::ACK,
            ttl,
            payload,
        }
    }

    pub fn total_len(&self) -> usize {
        IPV4_HDR_LEN + TCP_HDR_LEN + self.payload.len()
    }

    /// Serializes the datagram with both checksums filled in.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        let total_len = self.total_len();
        let total_len_u16 =
            u16::try_from(total_len).map_err(|_| PacketError::TooLarge(total_len))?;
        let mut buffer: Vec<u8> = vec![0u8; total_len];

        {
            let (ip_buf, tcp_buf) = buffer.split_at_mut(IPV4_HDR_LEN);

            let mut tcp: MutableTcpPacket =
                MutableTcpPacket::new(tcp_buf).ok_or(PacketError::Buffer("tcp"))?;
            tcp.set_source(self.src_port);
            tcp.set_destination(self.dst_port);
            tcp.set_sequence(self.sequence);
            tcp.set_acknowledgement(0);
            tcp.set_data_offset((TCP_HDR_LEN / 4) as u8);
            tcp.set_flags(self.flags);
            tcp.set_window(WINDOW);
            tcp.set_urgent_ptr(0);
            tcp.set_payload(&self.payload);
            tcp.set_checksum(0);
            let csm = tcp::ipv4_checksum(&tcp.to_immutable(), &self.source, &self.destination);
            tcp.set_checksum(csm);

            let mut ip: MutableIpv4Packet =
                MutableIpv4Packet::new(ip_buf).ok_or(PacketError::Buffer("ipv4"))?;
            ip.set_version(4);
            ip.set_header_length((IPV4_HDR_LEN / 4) as u8);
            ip.set_dscp(0);
            ip.set_ecn(0);
            ip.set_total_length(total_len_u16);
            ip.set_identification(identification_for(self.sequence));
            ip.set_flags(DONT_FRAGMENT);
            ip.set_fragment_offset(0);
            ip.set_ttl(self.ttl);
            ip.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
            ip.set_source(self.source);
            ip.set_destination(self.destination);
            ip.set_checksum(0);
            let csm = ipv4::checksum(&ip.to_immutable());
            ip.set_checksum(csm);
        }

        verify(&buffer)?;
        Ok(buffer)
    }
}

/// Re-parses a built datagram and checks both checksums.
fn verify(bytes: &[u8]) -> Result<(), PacketError> {
    let ip = Ipv4Packet::new(bytes).ok_or(PacketError::Buffer("ipv4"))?;
    if ipv4::checksum(&ip) != ip.get_checksum() {
        return Err(PacketError::Checksum("ipv4"));
    }
    let tcp = TcpPacket::new(ip.payload()).ok_or(PacketError::Buffer("tcp"))?;
    let expected = tcp::ipv4_checksum(&tcp, &ip.get_source(), &ip.get_destination());
    if expected != tcp.get_checksum() {
        return Err(PacketError::Checksum("tcp"));
    }
    Ok(())
}

// Deterministic per sequence so repeated builds are byte-identical.
fn identification_for(sequence: u32) -> u16 {
    (sequence ^ (sequence >> 16)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment() -> InjectedSegment {
        InjectedSegment::push_ack(
            Ipv4Addr::new(192, 0, 2, 1),
            Ipv4Addr::new(198, 51, 100, 7),
            443,
            51_234,
            11_111,
            2,
            b"hello".to_vec(),
        )
    }

    #[test]
    fn builds_ttl_limited_push_ack() {
        let bytes = segment().to_bytes().unwrap();
        assert_eq!(bytes.len(), IPV4_HDR_LEN + TCP_HDR_LEN + 5);

        let ip = Ipv4Packet::new(&bytes).unwrap();
        assert_eq!(ip.get_ttl(), 2);
        assert_eq!(ip.get_next_level_protocol(), IpNextHeaderProtocols::Tcp);
        assert_eq!(ip.get_total_length() as usize, bytes.len());

        let tcp = TcpPacket::new(ip.payload()).unwrap();
        assert_eq!(tcp.get_source(), 443);
        assert_eq!(tcp.get_destination(), 51_234);
        assert_eq!(tcp.get_sequence(), 11_111);
        assert_eq!(tcp.get_flags(), TcpFlags::PSH | TcpFlags::ACK);
        assert_eq!(tcp.payload(), b"hello");
    }

    #[test]
    fn checksums_are_valid() {
        let bytes = segment().to_bytes().unwrap();
        let ip = Ipv4Packet::new(&bytes).unwrap();
        assert_ne!(ip.get_checksum(), 0);
        assert_eq!(ipv4::checksum(&ip), ip.get_checksum());
        assert!(verify(&bytes).is_ok());
    }

    #[test]
    fn corrupted_datagram_fails_verification() {
        let mut bytes = segment().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert_eq!(verify(&bytes), Err(PacketError::Checksum("tcp")));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut seg = segment();
        seg.payload = vec![0u8; u16::MAX as usize];
        assert!(matches!(seg.to_bytes(), Err(PacketError::TooLarge(_))));
    }
}
