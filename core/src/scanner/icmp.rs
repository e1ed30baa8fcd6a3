//! ICMP echo bursts.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use latprobe_common::config::Config;
use latprobe_common::measurement::IcmpMeasurement;
use surge_ping::{Client, PingIdentifier, PingSequence, SurgeError};
use tokio::sync::OnceCell;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EchoOutcome, EchoTransport, as_millis_f64};

const ECHO_PAYLOAD: [u8; 56] = [0; 56];

pub struct IcmpProber {
    transport: Arc<dyn EchoTransport>,
    count: u16,
    timeout: Duration,
    interval: Duration,
}

impl IcmpProber {
    pub fn new(transport: Arc<dyn EchoTransport>, cfg: &Config) -> Self {
        Self {
            transport,
            count: cfg.icmp_count,
            timeout: cfg.icmp_timeout,
            interval: cfg.icmp_interval,
        }
    }

    /// Sends the configured number of echo requests to `addr`.
    ///
    /// Statistics cover answered requests only. A transport failure ends the
    /// burst and is recorded on the returned measurement.
    pub async fn probe(&self, addr: Ipv4Addr, cancel: &CancellationToken) -> IcmpMeasurement {
        let identifier: u16 = rand::random();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sent: u16 = 0;
        let mut rtts: Vec<f64> = Vec::with_capacity(self.count as usize);

        for sequence in 0..self.count {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            sent += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.transport.echo(addr, identifier, sequence, self.timeout) => outcome,
            };

            match outcome {
                EchoOutcome::Reply(rtt) => {
                    debug!("icmp {addr} seq={sequence} rtt={:.3}ms", as_millis_f64(rtt));
                    rtts.push(as_millis_f64(rtt));
                }
                EchoOutcome::Lost => debug!("icmp {addr} seq={sequence} lost"),
                EchoOutcome::Failed(reason) => {
                    warn!("icmp probe of {addr} failed after {sent} requests: {reason}");
                    return IcmpMeasurement::from_replies(addr, sent, &rtts).with_failure(reason);
                }
            }
        }

        IcmpMeasurement::from_replies(addr, sent, &rtts)
    }
}

/// Echo requests over a shared ICMP socket.
///
/// The socket is opened on first use. If that fails, every address probed
/// through this transport records the failure individually.
#[derive(Default)]
pub struct SurgeEchoTransport {
    client: OnceCell<Client>,
}

impl SurgeEchoTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> std::io::Result<&Client> {
        self.client
            .get_or_try_init(|| async { Client::new(&surge_ping::Config::default()) })
            .await
    }
}

#[async_trait]
impl EchoTransport for SurgeEchoTransport {
    async fn echo(
        &self,
        addr: Ipv4Addr,
        identifier: u16,
        sequence: u16,
        timeout: Duration,
    ) -> EchoOutcome {
        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => return EchoOutcome::Failed(format!("opening icmp socket: {e}")),
        };

        let mut pinger = client
            .pinger(IpAddr::V4(addr), PingIdentifier(identifier))
            .await;
        pinger.timeout(timeout);

        match pinger.ping(PingSequence(sequence), &ECHO_PAYLOAD).await {
            Ok((_reply, rtt)) => EchoOutcome::Reply(rtt),
            Err(SurgeError::Timeout { .. }) => EchoOutcome::Lost,
            Err(e) => EchoOutcome::Failed(e.to_string()),
        }
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
