// SPDX-License-Identifier: MIT OR Apache-2.0

//! Terminal output helpers: JSON printing and colorized text.

use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::io::{IsTerminal, Write};

/// Print `value` as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T, compact: bool) -> anyhow::Result<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    Ok(())
}

/// Colors only when stdout is a terminal and NO_COLOR is unset.
pub fn use_colors() -> bool {
    std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

/// Apply the color decision globally for `colored`.
pub fn init_colors() {
    colored::control::set_override(use_colors());
}

pub fn colorize_path(path: &str) -> ColoredString {
    path.magenta()
}

pub fn colorize_line_num(line: u32) -> ColoredString {
    line.to_string().green()
}

pub fn colorize_kind(kind: &str) -> ColoredString {
    kind.cyan()
}

pub fn colorize_name(name: &str) -> ColoredString {
    name.bold()
}

/// Unix milliseconds as a UTC wall-clock time, e.g. `2026-10-19 08:30:00 UTC`.
pub fn format_timestamp_ms(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("{ms} ms since epoch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp_ms(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp_ms(1_700_000_000_123), "2023-11-14 22:13:20 UTC");
        assert_eq!(format_timestamp_ms(u64::MAX), format!("{} ms since epoch", u64::MAX));
    }
}
