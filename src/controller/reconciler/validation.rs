//! # Validation
//!
//! Defensive handling of policy fields that admission should have rejected.

use anyhow::Result;
use regex::Regex;
use std::time::Duration;
use tracing::warn;

/// Parse Kubernetes duration string into `std::time::Duration`
/// Supports formats: "30s", "1m", "5m", "1h", "2h", "1d"
///
/// # Errors
///
/// Returns an error for empty strings, unknown units, or a zero value.
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let duration_regex = Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    let interval_lower = duration_trimmed.to_lowercase();

    let captures = duration_regex.captures(&interval_lower).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid duration format '{duration_trimmed}'. Expected format: <number><unit> (e.g., '30s', '5m', '1h')"
        )
    })?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid duration number in '{duration_trimmed}': {e}"))?;

    if number == 0 {
        return Err(anyhow::anyhow!(
            "Duration must be greater than 0, got '{duration_trimmed}'"
        ));
    }

    let multiplier = match &captures["unit"] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => 86400,
    };

    number
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("Duration '{duration_trimmed}' is too large"))
}

/// Interval to requeue at after a pass
///
/// Missing intervals use `default`. Invalid or non-positive values are logged
/// and replaced by `default` rather than failing the pass.
#[must_use]
pub fn effective_interval(interval: Option<&str>, default: Duration) -> Duration {
    match interval.map(str::trim).filter(|s| !s.is_empty()) {
        None => default,
        Some(raw) => match parse_kubernetes_duration(raw) {
            Ok(duration) => duration,
            Err(e) => {
                warn!(interval = %raw, error = %e, "Invalid interval, using default");
                default
            }
        },
    }
}
