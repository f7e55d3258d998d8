//! Small shared helpers: duration parsing and retry backoff.

use crate::errors::{Error, Result};
use std::time::Duration;

/// Parse a duration string (`"30s"`, `"5m"`, `"1h"`, `"500ms"`, or a bare
/// number of seconds) as used by timeout configuration (§5).
pub fn parse_duration(s: &str) -> Result<Duration> {
    if s.is_empty() {
        return Err(Error::config("duration", "cannot be empty"));
    }

    let Some(pos) = s.rfind(|c: char| c.is_ascii_digit()) else {
        return Err(Error::config("duration", format!("invalid format: {s}")));
    };
    let (num_str, unit) = s.split_at(pos + 1);

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::config("duration", format!("invalid number in '{s}'")))?;

    let duration = match unit {
        "s" | "" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        "ms" => Duration::from_millis(num),
        other => {
            return Err(Error::config("duration", format!("unknown unit: {other}")));
        }
    };

    Ok(duration)
}

/// Format a duration as a human-readable string, the inverse of
/// [`parse_duration`] for the coarsest applicable unit.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Compute the delay before retry attempt `attempt` (1-indexed) under the
/// base-1s, cap-30s exponential backoff used for transient tool/network
/// failures (§4.10, §7): `min(base * 2^(attempt-1), cap)`.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    const BASE: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(30);
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    BASE.saturating_mul(factor.min(u32::MAX as u64) as u32).min(CAP)
}

/// Maximum retry attempts for a transient failure (§4.10: "max 3 attempts").
pub const MAX_RETRY_ATTEMPTS: u32 = 3;
