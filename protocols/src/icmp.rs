//! Decoding of the original datagram quoted inside ICMP error messages.
//!
//! Routers answering with Time Exceeded or Destination Unreachable echo back
//! the offending IPv4 header (variable length) followed by at least the first
//! 8 bytes of its transport header. For TCP those 8 bytes hold both ports and
//! the sequence number, which is all that is needed to match a response to the
//! segment that provoked it.

use std::net::Ipv4Addr;

use pnet::packet::ip::IpNextHeaderProtocols;
use serde::Serialize;

use crate::DecodeError;

/// Type, code, checksum and the 4 bytes of rest-of-header.
pub const ICMP_HDR_LEN: usize = 8;
pub const TIME_EXCEEDED: u8 = 11;
pub const DESTINATION_UNREACHABLE: u8 = 3;

const MIN_IHL_WORDS: u8 = 5;
const QUOTED_TRANSPORT_LEN: usize = 8;

/// Headers of the original datagram recovered from an ICMP error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedHeaders {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// Remaining TTL of the quoted datagram, as seen by the responder.
    pub ttl: u8,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    /// Only present when the quoted transport header is TCP.
    pub sequence: Option<u32>,
}

impl EmbeddedHeaders {
    pub fn is_tcp(&self) -> bool {
        self.protocol == IpNextHeaderProtocols::Tcp.0
    }
}

/// Whether an ICMP type carries a quoted datagram.
pub fn quotes_original(icmp_type: u8) -> bool {
    matches!(icmp_type, TIME_EXCEEDED | DESTINATION_UNREACHABLE)
}

/// Parses the quoted IPv4 header and the start of the transport header that
/// follows it. `data` starts right after the 8-byte ICMP header.
pub fn decode_embedded(data: &[u8]) -> Result<EmbeddedHeaders, DecodeError> {
    let first = *data.first().ok_or(DecodeError::Empty)?;

    let version = first >> 4;
    if version != 4 {
        return Err(DecodeError::Version(version));
    }

    let ihl_words = first & 0x0F;
    if ihl_words < MIN_IHL_WORDS {
        return Err(DecodeError::HeaderLength(ihl_words));
    }

    let ip_hdr_len = ihl_words as usize * 4;
    if data.len() < ip_hdr_len {
        return Err(DecodeError::Truncated {
            what: "quoted ipv4 header",
            needed: ip_hdr_len,
            got: data.len(),
        });
    }

    let transport = &data[ip_hdr_len..];
    if transport.len() < QUOTED_TRANSPORT_LEN {
        return Err(DecodeError::Truncated {
            what: "quoted transport header",
            needed: ip_hdr_len + QUOTED_TRANSPORT_LEN,
            got: data.len(),
        });
    }

    let protocol = data[9];
    let sequence = (protocol == IpNextHeaderProtocols::Tcp.0)
        .then(|| u32::from_be_bytes([transport[4], transport[5], transport[6], transport[7]]));

    Ok(EmbeddedHeaders {
        source: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
        destination: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        ttl: data[8],
        protocol,
        src_port: u16::from_be_bytes([transport[0], transport[1]]),
        dst_port: u16::from_be_bytes([transport[2], transport[3]]),
        sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::InjectedSegment;

    fn quoted_segment() -> Vec<u8> {
        InjectedSegment::push_ack(
            Ipv4Addr::new(192, 0, 2, 1),
            Ipv4Addr::new(198, 51, 100, 7),
            443,
            40_000,
            7,
            1,
            vec![],
        )
        .to_bytes()
        .unwrap()
    }

    #[test]
    fn recovers_inner_source_port() {
        let data = quoted_segment();
        assert_eq!(data.len(), 40);

        let inner = decode_embedded(&data).unwrap();
        assert_eq!(inner.src_port, 443);
        assert_eq!(inner.dst_port, 40_000);
        assert_eq!(inner.sequence, Some(7));
        assert_eq!(inner.destination, Ipv4Addr::new(198, 51, 100, 7));
        assert!(inner.is_tcp());
    }

    #[test]
    fn accepts_rfc792_minimum_quote() {
        let data = quoted_segment();
        let inner = decode_embedded(&data[..28]).unwrap();
        assert_eq!(inner.src_port, 443);
    }

    #[test]
    fn honours_ip_options() {
        let base = quoted_segment();
        let mut data = Vec::new();
        data.push(0x46); // version 4, IHL 6
        data.extend_from_slice(&base[1..20]);
        data.extend_from_slice(&[1, 1, 1, 0]); // NOPs + end of options
        data.extend_from_slice(&base[20..]);

        let inner = decode_embedded(&data).unwrap();
        assert_eq!(inner.src_port, 443);
        assert_eq!(inner.dst_port, 40_000);
    }

    #[test]
    fn payload_shorter_than_declared_header_fails() {
        let mut data = quoted_segment();
        data[0] = 0x4F; // claims 60 bytes of IP header
        let err = decode_embedded(&data[..30]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { needed: 60, got: 30, .. }));
    }

    #[test]
    fn empty_payload_fails() {
        assert_eq!(decode_embedded(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn impossible_header_length_fails() {
        let mut data = quoted_segment();
        data[0] = 0x44;
        assert_eq!(decode_embedded(&data), Err(DecodeError::HeaderLength(4)));
    }
}
