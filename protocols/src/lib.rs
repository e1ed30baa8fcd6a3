//! Wire formats used by the trace pipeline: building the TTL-limited segment
//! and decoding what comes back.

pub mod filter;
pub mod frame;
pub mod icmp;
pub mod tcp;

use thiserror::Error;

pub use filter::CaptureFilter;
pub use frame::{LinkType, ObservedPacket, decode_frame};
pub use icmp::EmbeddedHeaders;
pub use tcp::InjectedSegment;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("unsupported ip version {0}")]
    Version(u8),
    #[error("invalid ipv4 header length of {0} words")]
    HeaderLength(u8),
    #[error("{what} truncated: need {needed} bytes, got {got}")]
    Truncated {
        what: &'static str,
        needed: usize,
        got: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too small for {0} header")]
    Buffer(&'static str),
    #[error("datagram of {0} bytes exceeds the ipv4 limit")]
    TooLarge(usize),
    #[error("{0} checksum does not verify")]
    Checksum(&'static str),
}
