use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use colored::*;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::{self, Writer};
use tracing_subscriber::fmt::{self as fmt_layer, FmtContext, FormatEvent};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

use super::spinner::SpinnerWriter;

/// Events on this target are printed verbatim, without a level marker.
pub const PRINT_TARGET: &str = "latprobe::print";

pub struct ProbeFormatter;

impl<S, N> FormatEvent<S, N> for ProbeFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> format::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();

        if meta.target() != PRINT_TARGET {
            let (symbol, color_func): (&str, fn(ColoredString) -> ColoredString) = match *meta.level() {
                Level::TRACE => ("[ ]", |s| s.dimmed()),
                Level::DEBUG => ("[?]", |s| s.blue()),
                Level::INFO => ("[+]", |s| s.green().bold()),
                Level::WARN => ("[*]", |s| s.yellow().bold()),
                Level::ERROR => ("[-]", |s| s.red().bold()),
            };
            write!(writer, "{} ", color_func(symbol.into()))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Console output goes through the spinner, filtered by `RUST_LOG` when set.
/// Warnings and errors are additionally appended to `errlog`.
pub fn init(errlog: &Path, verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level))
        .add_directive(format!("{PRINT_TARGET}=info").parse()?);

    let errlog_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(errlog)
        .with_context(|| format!("opening error log {}", errlog.display()))?;

    let console = fmt_layer::layer()
        .event_format(ProbeFormatter)
        .with_writer(|| SpinnerWriter)
        .with_filter(console_filter);

    let errors = fmt_layer::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(errlog_file))
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(console)
        .with(errors)
        .try_init()
        .context("installing log subscriber")?;
    Ok(())
}
