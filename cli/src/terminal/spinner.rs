use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use latprobe_core::measurement::BatchProgress;

/// The spinner currently on screen, if any. Log lines are printed around it.
static ACTIVE: Mutex<Option<ProgressBar>> = Mutex::new(None);

const TICKS: &[&str] = &[
    "▁▁▁▁▁",
    "▁▂▂▂▁",
    "▁▄▂▄▁",
    "▂▄▆▄▂",
    "▄▆█▆▄",
    "▂▄▆▄▂",
    "▁▄▂▄▁",
    "▁▂▂▂▁",
];

pub struct SpinnerHandle {
    spinner: ProgressBar,
}

impl SpinnerHandle {
    pub fn start(message: impl Into<String>) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        pb.set_style(style);
        pb.set_message(message.into());
        pb.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut active) = ACTIVE.lock() {
            *active = Some(pb.clone());
        }
        Self { spinner: pb }
    }

    /// A callback suitable for `MeasurementService::with_progress`.
    pub fn batch_reporter(&self) -> impl Fn(BatchProgress) + Send + Sync + 'static {
        let pb = self.spinner.clone();
        move |progress| pb.set_message(batch_message(progress))
    }
}

impl Drop for SpinnerHandle {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
        if let Ok(mut active) = ACTIVE.lock() {
            *active = None;
        }
    }
}

fn batch_message(progress: BatchProgress) -> String {
    format!(
        "Batch {}/{} done, {} of {} addresses measured...",
        progress.batch.to_string().green().bold(),
        progress.batches,
        progress.addresses_done.to_string().green().bold(),
        progress.addresses_total
    )
}

pub struct SpinnerWriter;

impl Write for SpinnerWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let active = ACTIVE.lock().ok().and_then(|a| a.clone());
        match active {
            Some(pb) => pb.suspend(|| io::stdout().write_all(buf))?,
            None => io::stdout().write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}
