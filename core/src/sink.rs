//! # Result Sinks
//!
//! Append-only destinations for finished records. Probers and the aggregator
//! receive a sink explicitly; nothing writes to a process-wide logger.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use latprobe_common::measurement::{Report, TcpSample};
use serde::Serialize;
use tracing::warn;

use crate::trace::TraceReport;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Report(Report),
    Sample(TcpSample),
    Trace(TraceReport),
}

pub trait ResultSink: Send + Sync {
    /// Stores one record. Must not fail the caller: a record that cannot be
    /// written is reported as a diagnostic and dropped.
    fn record(&self, record: Record);
}

/// One JSON document per line, appended to a file.
///
/// Records are encoded on the caller and handed to a dedicated writer thread,
/// so probe tasks never block on file I/O. Dropping the sink flushes every
/// queued line.
pub struct JsonLinesSink {
    tx: Option<Sender<String>>,
    writer: Option<JoinHandle<()>>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening result log {}", path.display()))?;

        let (tx, rx) = mpsc::channel::<String>();
        let writer = thread::Builder::new()
            .name("result-log".into())
            .spawn(move || write_lines(rx, file))
            .context("spawning result log writer")?;

        Ok(Self {
            tx: Some(tx),
            writer: Some(writer),
        })
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(writer) = self.writer.take()
            && writer.join().is_err()
        {
            warn!("Result log writer panicked");
        }
    }
}

/// Drains the queue, flushing once per burst of lines.
fn write_lines(rx: Receiver<String>, file: File) {
    let mut out = BufWriter::new(file);
    while let Ok(line) = rx.recv() {
        let mut written = writeln!(out, "{line}");
        while let Ok(next) = rx.try_recv() {
            written = written.and_then(|_| writeln!(out, "{next}"));
        }
        if let Err(e) = written.and_then(|_| out.flush()) {
            warn!("Failed to append to result log: {e}");
        }
    }
}

impl ResultSink for JsonLinesSink {
    fn record(&self, record: Record) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping record that failed to encode: {e}");
                return;
            }
        };
        let sent = self.tx.as_ref().map(|tx| tx.send(line));
        if !matches!(sent, Some(Ok(()))) {
            warn!("Result log writer is gone, dropping record");
        }
    }
}

/// Keeps records in memory. Used by tests and embedders that forward results
/// elsewhere.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Report(report) => Some(report),
                _ => None,
            })
            .collect()
    }

    pub fn samples(&self) -> Vec<TcpSample> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Sample(sample) => Some(sample),
                _ => None,
            })
            .collect()
    }

    pub fn traces(&self) -> Vec<TraceReport> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Trace(trace) => Some(trace),
                _ => None,
            })
            .collect()
    }
}

impl ResultSink for MemorySink {
    fn record(&self, record: Record) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

/// Discards everything.
pub struct NullSink;

impl ResultSink for NullSink {
    fn record(&self, _record: Record) {}
}
