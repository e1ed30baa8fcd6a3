//! # Trace Session
//!
//! Sends one TTL-limited TCP segment toward a client and listens for the ICMP
//! Time Exceeded messages that routers along the path send back. Each message
//! quotes the start of our segment, so the quoted ports identify the probe.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use latprobe_common::config::Config;
use latprobe_protocols::{
    CaptureFilter, InjectedSegment, LinkType, ObservedPacket, PacketError, decode_frame,
};
use serde::Serialize;
use thiserror::Error;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::network::{CaptureHandle, Injector, PacketCapture};
use crate::sink::{Record, ResultSink};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("capture could not be opened: {0:#}")]
    Capture(anyhow::Error),
    #[error("segment could not be built: {0}")]
    Packet(#[from] PacketError),
    #[error("segment could not be sent: {0:#}")]
    Inject(anyhow::Error),
    #[error("trace cancelled before injection")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceReport {
    pub id: String,
    pub client_address: Ipv4Addr,
    pub client_port: u16,
    pub device: String,
    pub filter: String,
    pub segment: InjectedSegment,
    pub injected_bytes: usize,
    pub observed: Vec<ObservedPacket>,
    /// Routers that answered with Time Exceeded for our segment, in arrival order.
    pub hops: Vec<Ipv4Addr>,
    pub decode_errors: usize,
    pub cancelled: bool,
    pub timestamp: String,
}

#[derive(Debug, Default)]
struct Decoded {
    observed: Vec<ObservedPacket>,
    errors: usize,
}

pub struct TraceSession {
    filter: CaptureFilter,
    capture: Arc<dyn PacketCapture>,
    injector: Box<dyn Injector>,
    sink: Arc<dyn ResultSink>,
    ttl: u8,
    source_port: u16,
    sequence: u32,
    payload: Vec<u8>,
    listen_window: Duration,
}

impl TraceSession {
    pub fn new(
        cfg: &Config,
        device: impl Into<String>,
        client: Ipv4Addr,
        client_port: u16,
        capture: Arc<dyn PacketCapture>,
        injector: Box<dyn Injector>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            filter: CaptureFilter::new(device, client, client_port),
            capture,
            injector,
            sink,
            ttl: cfg.ttl,
            source_port: cfg.inject_source_port,
            sequence: cfg.inject_sequence,
            payload: cfg.inject_payload.clone(),
            listen_window: cfg.listen_window,
        }
    }

    /// Runs the session to completion and records the report to the sink.
    ///
    /// Nothing is injected unless the capture is already running, so a
    /// response can never arrive unobserved.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<TraceReport, TraceError> {
        if cancel.is_cancelled() {
            return Err(TraceError::Cancelled);
        }

        let handle = self.capture.open(&self.filter).map_err(TraceError::Capture)?;
        info!("Capturing {}", self.filter);

        let stop_decoding = cancel.child_token();
        let decoder = tokio::spawn(decode_loop(handle, self.filter.clone(), stop_decoding.clone()));
        // Dropping this future before it completes must still release the capture.
        let _stop_on_drop = stop_decoding.clone().drop_guard();

        let (segment, injected_bytes) = match self.inject() {
            Ok(sent) => sent,
            Err(e) => {
                stop_decoding.cancel();
                let _ = decoder.await;
                return Err(e);
            }
        };
        info!(
            "Injected {injected_bytes} bytes toward {}:{} with ttl {}",
            segment.destination, segment.dst_port, segment.ttl
        );

        tokio::select! {
            _ = stop_decoding.cancelled() => {}
            _ = time::sleep(self.listen_window) => {}
        }
        stop_decoding.cancel();

        let decoded = match decoder.await {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Decode loop ended abnormally: {e}");
                Decoded::default()
            }
        };

        let mut hops: Vec<Ipv4Addr> = Vec::new();
        for packet in decoded.observed.iter().filter(|p| p.is_hop_response_to(&segment)) {
            if !hops.contains(&packet.responder()) {
                hops.push(packet.responder());
            }
        }

        let report = TraceReport {
            id: Uuid::new_v4().to_string(),
            client_address: self.filter.client_address,
            client_port: self.filter.client_port,
            device: self.filter.device.clone(),
            filter: self.filter.expression(),
            segment,
            injected_bytes,
            observed: decoded.observed,
            hops,
            decode_errors: decoded.errors,
            cancelled: cancel.is_cancelled(),
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        };
        self.sink.record(Record::Trace(report.clone()));
        Ok(report)
    }

    fn inject(&mut self) -> Result<(InjectedSegment, usize), TraceError> {
        let source = self.injector.local_addr().map_err(TraceError::Inject)?;
        let segment = InjectedSegment::push_ack(
            source,
            self.filter.client_address,
            self.source_port,
            self.filter.client_port,
            self.sequence,
            self.ttl,
            self.payload.clone(),
        );
        let datagram = segment.to_bytes()?;
        let sent = self
            .injector
            .inject(&segment, &datagram)
            .map_err(TraceError::Inject)?;
        Ok((segment, sent))
    }
}

/// Drains the capture until `stop` fires or the reader goes away. The handle
/// is dropped on return, which releases the device.
async fn decode_loop(mut handle: CaptureHandle, filter: CaptureFilter, stop: CancellationToken) -> Decoded {
    let link = handle.link;
    let mut decoded = Decoded::default();

    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            frame = handle.next_frame() => frame,
        };
        match frame {
            Some(bytes) => classify(&bytes, link, &filter, &mut decoded),
            None => break,
        }
    }
    while let Some(bytes) = handle.try_frame() {
        classify(&bytes, link, &filter, &mut decoded);
    }

    decoded
}

fn classify(bytes: &[u8], link: LinkType, filter: &CaptureFilter, decoded: &mut Decoded) {
    match decode_frame(bytes, link) {
        Ok(Some(packet)) if filter.matches(&packet) => {
            debug!("Observed {packet:?}");
            decoded.observed.push(packet);
        }
        Ok(_) => {}
        Err(e) => {
            debug!("Undecodable frame ({} bytes): {e}", bytes.len());
            decoded.errors += 1;
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
