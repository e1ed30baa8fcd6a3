use colored::*;
use latprobe_common::measurement::{IcmpMeasurement, RttStats, TcpHostMeasurement};

use crate::terminal::colors;

pub type Detail = (String, ColoredString);

pub fn rtt_ms(value: Option<f64>) -> ColoredString {
    match value {
        Some(ms) => format!("{ms:.3}ms").color(colors::RTT),
        None => "no answer".color(colors::SEPARATOR),
    }
}

fn stats_line(stats: &RttStats) -> ColoredString {
    format!(
        "{:.3} / {:.3} / {:.3} ms (sd {:.3})",
        stats.min, stats.avg, stats.max, stats.stddev
    )
    .color(colors::RTT)
}

pub fn icmp_detail(m: &IcmpMeasurement) -> Option<Detail> {
    if let Some(reason) = &m.failure {
        return Some(("ICMP".to_string(), reason.color(colors::LOSS)));
    }
    let stats = m.rtt.as_ref()?;
    let loss = format!("{:.0}% loss", m.loss_ratio * 100.0).color(colors::LOSS);
    Some(("ICMP".to_string(), format!("{} {}", stats_line(stats), loss).normal()))
}

/// One line per port that answered at least once.
pub fn tcp_details(host: &TcpHostMeasurement) -> Vec<Detail> {
    host.ports
        .iter()
        .filter_map(|p| p.rtt.as_ref().map(|stats| (format!("tcp/{}", p.port), stats_line(stats))))
        .collect()
}
