use std::fmt::Display;

use colored::*;
use tracing::info;

use super::colors;
use super::logging::PRINT_TARGET;

pub const TOTAL_WIDTH: usize = 64;
const KEY_WIDTH: usize = 14;

pub fn print(msg: &str) {
    info!(target: PRINT_TARGET, "{msg}");
}

pub fn banner() {
    let text = format!("⟦ LATPROBE v{} ⟧", env!("CARGO_PKG_VERSION"));
    let pad = TOTAL_WIDTH.saturating_sub(text.chars().count()) / 2;
    let sep: ColoredString = "═".repeat(pad).bright_black();
    print(&format!("{}{}{}", sep, text.bright_green().bold(), sep));
}

pub fn header(msg: &str) {
    let formatted: String = format!("⟦ {} ⟧", msg);
    let dash_count: usize = TOTAL_WIDTH.saturating_sub(formatted.chars().count());
    let left: usize = dash_count / 2;
    let right: usize = dash_count - left;

    let line: ColoredString = format!(
        "{}{}{}",
        "─".repeat(left),
        formatted.to_uppercase().bright_green(),
        "─".repeat(right)
    )
    .bright_black();

    print(&line.to_string());
}

pub fn fat_separator() {
    print(&"═".repeat(TOTAL_WIDTH).color(colors::SEPARATOR).to_string());
}

pub fn aligned_line(key: &str, value: impl Display) {
    let dots: String = ".".repeat((KEY_WIDTH + 1).saturating_sub(key.len()));
    print_status(format!(
        "{}{}{} {}",
        key.color(colors::PRIMARY),
        dots.color(colors::SEPARATOR),
        ":".color(colors::SEPARATOR),
        value
    ));
}

pub fn print_status<T: AsRef<str>>(msg: T) {
    let prefix: ColoredString = ">".color(colors::SEPARATOR);
    print(&format!("{} {}", prefix, msg.as_ref()));
}

pub fn tree_head(idx: usize, name: &str) {
    let idx_str: String = format!("[{}]", idx.to_string().color(colors::ACCENT));
    print(&format!(
        "{} {}",
        idx_str.color(colors::SEPARATOR),
        name.color(colors::PRIMARY)
    ));
}

pub fn as_tree_one_level(pairs: &[(String, ColoredString)]) {
    for (i, (key, value)) in pairs.iter().enumerate() {
        let branch: ColoredString = if i + 1 != pairs.len() {
            "├─".bright_black()
        } else {
            "└─".bright_black()
        };
        print(&format!(
            " {} {}{}{} {}",
            branch,
            key.color(colors::TEXT_DEFAULT),
            ".".repeat(8usize.saturating_sub(key.len())).color(colors::SEPARATOR),
            ":".color(colors::SEPARATOR),
            value
        ));
    }
}

pub fn end_of_program() {
    fat_separator();
}
