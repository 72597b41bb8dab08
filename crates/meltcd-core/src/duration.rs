//! Refresh interval parsing.
//!
//! Intervals use the Go duration syntax persisted by earlier releases:
//! a sequence of decimal numbers, each with a unit suffix, e.g. `"3m30s"`,
//! `"1.5h"`, `"250ms"`. Valid units are `ns`, `us` (`µs`), `ms`, `s`, `m`, `h`.

use crate::error::{MeltcdError, Result};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

static PART_RE: OnceLock<Regex> = OnceLock::new();

fn part_re() -> &'static Regex {
    PART_RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|μs|ms|s|m|h)").unwrap())
}

fn unit_nanos(unit: &str) -> f64 {
    match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60.0 * 1e9,
        _ => 3600.0 * 1e9,
    }
}

/// Parse a refresh interval. Zero and negative durations are rejected since
/// a loop cannot tick on them.
pub fn parse_refresh_interval(input: &str) -> Result<Duration> {
    let invalid = || MeltcdError::InvalidRefreshInterval(input.to_string());
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let mut pos = 0;
    let mut nanos = 0f64;
    for caps in part_re().captures_iter(s) {
        let whole = caps.get(0).ok_or_else(invalid)?;
        if whole.start() != pos {
            return Err(invalid());
        }
        pos = whole.end();
        let value: f64 = caps[1].parse().map_err(|_| invalid())?;
        nanos += value * unit_nanos(&caps[2]);
    }
    if pos != s.len() || nanos < 1.0 {
        return Err(invalid());
    }

    Ok(Duration::from_nanos(nanos.round() as u64))
}

/// Render a duration the way Go prints it (`3m30s`, `1h0m0s`, `250ms`).
pub fn format_interval(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms < 1000 {
        return format!("{total_ms}ms");
    }
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let frac = d.subsec_millis();
    let s = if frac == 0 {
        format!("{s}s")
    } else {
        let frac = format!("{frac:03}");
        format!("{s}.{}s", frac.trim_end_matches('0'))
    };
    match (h, m) {
        (0, 0) => s,
        (0, m) => format!("{m}m{s}"),
        (h, m) => format!("{h}h{m}m{s}"),
    }
}
