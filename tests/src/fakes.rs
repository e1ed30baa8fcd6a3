//! Deterministic stand-ins for the network capabilities.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use latprobe_core::network::{CaptureHandle, Injector, PacketCapture};
use latprobe_core::scanner::{ConnectOutcome, Connector, EchoOutcome, EchoTransport};
use latprobe_protocols::{CaptureFilter, InjectedSegment, LinkType};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::MutableIpv4Packet;
use tokio::sync::mpsc;
use tokio::time;

/// `.1` through `.10` answer echo requests after as many milliseconds as
/// their last octet. Everything else stays silent.
pub struct NeighbourEcho {
    pub panic_on: Option<Ipv4Addr>,
}

#[async_trait]
impl EchoTransport for NeighbourEcho {
    async fn echo(&self, addr: Ipv4Addr, _: u16, _: u16, _: Duration) -> EchoOutcome {
        if self.panic_on == Some(addr) {
            panic!("echo transport exploded for {addr}");
        }
        match addr.octets()[3] {
            last @ 1..=10 => EchoOutcome::Reply(Duration::from_millis(u64::from(last))),
            _ => EchoOutcome::Lost,
        }
    }
}

/// Answers every echo and connect after 10ms, counting how many calls are
/// outstanding at once.
#[derive(Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    pub peak: AtomicUsize,
}

impl InFlightGauge {
    async fn hold(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        time::sleep(Duration::from_millis(10)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EchoTransport for InFlightGauge {
    async fn echo(&self, _: Ipv4Addr, _: u16, _: u16, _: Duration) -> EchoOutcome {
        self.hold().await;
        EchoOutcome::Reply(Duration::from_millis(10))
    }
}

#[async_trait]
impl Connector for InFlightGauge {
    async fn connect(&self, _: SocketAddrV4, _: Duration) -> ConnectOutcome {
        self.hold().await;
        ConnectOutcome::Connected
    }
}

/// Only `.1` through `.3` listen, and only on 443. Handshakes take 2ms.
pub struct HttpsOnlyConnector;

#[async_trait]
impl Connector for HttpsOnlyConnector {
    async fn connect(&self, dst: SocketAddrV4, _timeout: Duration) -> ConnectOutcome {
        if dst.port() == 443 && (1..=3).contains(&dst.ip().octets()[3]) {
            time::sleep(Duration::from_millis(2)).await;
            ConnectOutcome::Connected
        } else {
            ConnectOutcome::Unreachable("no route to host".into())
        }
    }
}

/// A capture fed by whoever holds the matching sender.
pub struct QueueCapture {
    queue: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    pub released: Arc<AtomicBool>,
}

impl QueueCapture {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let capture = Arc::new(Self {
            queue: Mutex::new(Some(rx)),
            released: Arc::new(AtomicBool::new(false)),
        });
        (capture, tx)
    }
}

impl PacketCapture for QueueCapture {
    fn open(&self, _filter: &CaptureFilter) -> anyhow::Result<CaptureHandle> {
        let rx = self
            .queue
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("capture already open"))?;
        Ok(CaptureHandle::new(LinkType::RawIp, rx, self.released.clone()))
    }
}

/// Simulates a path where every router in `hops` answers with Time Exceeded.
pub struct PathInjector {
    pub local: Ipv4Addr,
    pub hops: Vec<Ipv4Addr>,
    pub frames: mpsc::UnboundedSender<Vec<u8>>,
    pub injected: Arc<AtomicUsize>,
}

impl Injector for PathInjector {
    fn local_addr(&self) -> anyhow::Result<Ipv4Addr> {
        Ok(self.local)
    }

    fn inject(&mut self, _segment: &InjectedSegment, datagram: &[u8]) -> anyhow::Result<usize> {
        self.injected.fetch_add(1, Ordering::SeqCst);
        for &hop in &self.hops {
            self.frames
                .send(time_exceeded(hop, self.local, &datagram[..28]))?;
        }
        Ok(datagram.len())
    }
}

pub fn time_exceeded(responder: Ipv4Addr, to: Ipv4Addr, quote: &[u8]) -> Vec<u8> {
    let mut icmp = vec![11u8, 0, 0, 0, 0, 0, 0, 0];
    icmp.extend_from_slice(quote);

    let mut buf = vec![0u8; 20 + icmp.len()];
    {
        let mut ip = MutableIpv4Packet::new(&mut buf).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length((20 + icmp.len()) as u16);
        ip.set_ttl(255);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
        ip.set_source(responder);
        ip.set_destination(to);
    }
    buf[20..].copy_from_slice(&icmp);
    buf
}
