//! Expiry input parsing.
//!
//! `--expires-at` accepts either an absolute RFC3339 timestamp or a relative
//! duration in the `<number><unit>` grammar (`ns`, `us`, `µs`, `ms`, `s`,
//! `m`, `h`), with terms summed: `1h30m`. Storage form is always absolute
//! RFC3339 UTC.

use chrono::{DateTime, Duration, Utc};

use crate::error::CoreError;

/// Parse an expiry argument relative to `now`. Empty input means no expiry.
pub fn parse_expiry(raw: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    let dur = parse_duration(raw).ok_or_else(|| CoreError::InvalidExpiry(raw.to_string()))?;
    let dur = Duration::from_std(dur).map_err(|_| CoreError::InvalidExpiry(raw.to_string()))?;
    Ok(Some(now + dur))
}

/// Parse a duration like `300ms`, `1.5h` or `2h45m`. Returns `None` on any
/// malformed input, zero terms, or overflow.
pub fn parse_duration(raw: &str) -> Option<std::time::Duration> {
    let mut rest = raw.trim();
    if rest.is_empty() {
        return None;
    }
    let mut total_nanos: u128 = 0;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let number: f64 = rest[..digits_end].parse().ok()?;
        if !number.is_finite() || number < 0.0 {
            return None;
        }
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos: f64 = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            _ => return None,
        };
        rest = &rest[unit_end..];

        let term = number * unit_nanos;
        if !term.is_finite() || term > u64::MAX as f64 {
            return None;
        }
        total_nanos = total_nanos.checked_add(term as u128)?;
    }
    if total_nanos > u64::MAX as u128 {
        return None;
    }
    let secs = (total_nanos / 1_000_000_000) as u64;
    let nanos = (total_nanos % 1_000_000_000) as u32;
    Some(std::time::Duration::new(secs, nanos))
}
