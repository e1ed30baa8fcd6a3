//! Sending a pre-built datagram onto the wire.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};

use anyhow::{Context, anyhow, bail};
use latprobe_protocols::InjectedSegment;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::transport::{self, TransportChannelType, TransportSender};

const TRANSPORT_BUFFER_SIZE: usize = 4096;
const CHANNEL_TYPE_RAW_TCP: TransportChannelType =
    TransportChannelType::Layer3(IpNextHeaderProtocols::Tcp);

pub trait Injector: Send {
    /// The address the injected segment should carry as its source.
    fn local_addr(&self) -> anyhow::Result<Ipv4Addr>;

    /// Writes `datagram`, the serialized form of `segment`. Returns the number
    /// of bytes handed to the kernel.
    fn inject(&mut self, segment: &InjectedSegment, datagram: &[u8]) -> anyhow::Result<usize>;
}

/// Raw IPv4 socket with a caller-supplied header.
pub struct RawInjector {
    tx: TransportSender,
    source: Ipv4Addr,
}

impl RawInjector {
    pub fn open(source: Ipv4Addr) -> anyhow::Result<Self> {
        let (tx, _rx) = transport::transport_channel(TRANSPORT_BUFFER_SIZE, CHANNEL_TYPE_RAW_TCP)
            .context("opening raw ipv4 socket")?;
        Ok(Self { tx, source })
    }
}

impl Injector for RawInjector {
    fn local_addr(&self) -> anyhow::Result<Ipv4Addr> {
        Ok(self.source)
    }

    fn inject(&mut self, segment: &InjectedSegment, datagram: &[u8]) -> anyhow::Result<usize> {
        let packet = Ipv4Packet::new(datagram).ok_or_else(|| anyhow!("datagram shorter than an ipv4 header"))?;
        self.tx
            .send_to(packet, IpAddr::V4(segment.destination))
            .with_context(|| format!("sending segment to {}", segment.destination))
    }
}

/// Writes the datagram into an established connection after lowering its TTL.
///
/// The bytes travel as stream payload of the existing connection, so routers
/// see the outer headers built by the kernel with the lowered TTL.
pub struct StreamInjector {
    stream: TcpStream,
}

impl StreamInjector {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Injector for StreamInjector {
    fn local_addr(&self) -> anyhow::Result<Ipv4Addr> {
        match self.stream.local_addr().context("reading local address")? {
            SocketAddr::V4(v4) => Ok(*v4.ip()),
            SocketAddr::V6(v6) => v6
                .ip()
                .to_ipv4_mapped()
                .ok_or_else(|| anyhow!("connection is not ipv4: {v6}")),
        }
    }

    fn inject(&mut self, segment: &InjectedSegment, datagram: &[u8]) -> anyhow::Result<usize> {
        if segment.ttl == 0 {
            bail!("refusing to send with ttl 0");
        }
        self.stream
            .set_ttl(u32::from(segment.ttl))
            .context("lowering connection ttl")?;
        self.stream.write_all(datagram).context("writing segment")?;
        self.stream.flush().context("flushing segment")?;
        Ok(datagram.len())
    }
}
