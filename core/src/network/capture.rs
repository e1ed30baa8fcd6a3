//! Live packet capture on a single device.
//!
//! Frames are read on a dedicated OS thread, filtered, and pushed into an
//! unbounded queue that the async side drains through a [`CaptureHandle`].

use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use latprobe_protocols::{CaptureFilter, LinkType, decode_frame};
use pnet::datalink::{self, Channel};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::interface::CaptureDevice;

/// How long the capture thread blocks before checking whether it was released.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Something that can start capturing frames matching a filter.
pub trait PacketCapture: Send + Sync {
    fn open(&self, filter: &CaptureFilter) -> anyhow::Result<CaptureHandle>;
}

/// An open capture. Dropping it releases the underlying device.
pub struct CaptureHandle {
    pub link: LinkType,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
}

impl CaptureHandle {
    pub fn new(link: LinkType, rx: mpsc::UnboundedReceiver<Vec<u8>>, stop: Arc<AtomicBool>) -> Self {
        Self { link, rx, stop }
    }

    /// Waits for the next frame. `None` once the reader has gone away.
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// A frame that is already queued, if any.
    pub fn try_frame(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

pub struct LiveCapture {
    device: CaptureDevice,
}

impl LiveCapture {
    pub fn new(device: CaptureDevice) -> Self {
        Self { device }
    }
}

impl PacketCapture for LiveCapture {
    fn open(&self, filter: &CaptureFilter) -> anyhow::Result<CaptureHandle> {
        let name = self.device.name().to_string();
        let cfg = datalink::Config {
            read_timeout: Some(READ_TIMEOUT),
            promiscuous: false,
            ..Default::default()
        };

        let mut frames = match datalink::channel(&self.device.interface, cfg)
            .with_context(|| format!("opening capture on {name}"))?
        {
            Channel::Ethernet(_tx, rx) => rx,
            _ => bail!("unsupported channel type on {name}"),
        };

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let released = stop.clone();
        let link = self.device.link;
        let filter = filter.clone();

        std::thread::Builder::new()
            .name(format!("capture-{name}"))
            .spawn(move || {
                while !released.load(Ordering::Relaxed) {
                    match frames.next() {
                        Ok(frame) => {
                            if !wanted(&filter, frame, link) {
                                continue;
                            }
                            if queue_tx.send(frame.to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
                        Err(e) => {
                            warn!("Capture on {} stopped: {e}", filter.device);
                            break;
                        }
                    }
                }
                debug!("Capture on {} released", filter.device);
            })
            .with_context(|| format!("spawning capture thread for {name}"))?;

        Ok(CaptureHandle::new(link, queue_rx, stop))
    }
}

/// Kernel-side filtering is not available through `pnet`, so the filter is
/// evaluated here. Undecodable frames are passed on so the reader can count
/// them.
fn wanted(filter: &CaptureFilter, frame: &[u8], link: LinkType) -> bool {
    match decode_frame(frame, link) {
        Ok(Some(packet)) => filter.matches(&packet),
        Ok(None) => false,
        Err(_) => true,
    }
}
