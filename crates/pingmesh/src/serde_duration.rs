//! (De)serialization of [`Duration`] as human readable strings.
//!
//! Accepts strings such as `"300ms"`, `"30s"`, `"1m"` or `"1h30m"` and bare
//! integers, which are taken as milliseconds. Use with
//! `#[serde(with = "crate::serde_duration")]`.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

/// Deserialize a duration string like "300ms" or "1h30m" into a `Duration`
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
        RawDuration::Text(s) => parse(&s).map_err(serde::de::Error::custom),
    }
}

/// Serialize a `Duration` back to the compact string form accepted by [`parse`]
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(*duration))
}

/// Parse a duration such as `"500ms"`, `"2s"`, `"1h30m"` or `"1500"` (ms).
///
/// # Errors
///
/// Returns a description of the problem if the string is empty, has a unit
/// that is not one of `ns`, `us`, `ms`, `s`, `m`, `h`, `d`, or a malformed number.
pub fn parse(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{s}'"))?;
        if num_end == 0 {
            return Err(format!("invalid duration '{s}'"));
        }

        let number = &rest[..num_end];
        let after = &rest[num_end..];
        let unit_end = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());

        // Nanoseconds per unit
        let scale: u64 = match &after[..unit_end] {
            "ns" => 1,
            "us" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3600 * 1_000_000_000,
            "d" => 86400 * 1_000_000_000,
            unit => return Err(format!("unknown unit '{unit}' in duration '{s}'")),
        };

        let part = if let Ok(whole) = number.parse::<u64>() {
            whole
                .checked_mul(scale)
                .map(Duration::from_nanos)
                .ok_or_else(|| format!("duration '{s}' out of range"))?
        } else {
            let value: f64 = number
                .parse()
                .map_err(|_| format!("invalid number in duration '{s}'"))?;
            #[allow(clippy::cast_precision_loss)]
            Duration::try_from_secs_f64(value * scale as f64 / 1e9)
                .map_err(|e| format!("duration '{s}' out of range: {e}"))?
        };

        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration '{s}' out of range"))?;
        rest = &after[unit_end..];
    }

    Ok(total)
}

/// Format a `Duration` in the shortest exact form, e.g. `300ms`, `30s`, `1h30m`
#[must_use]
pub fn format(duration: Duration) -> String {
    let nanos = duration.subsec_nanos();
    if nanos % 1_000 != 0 {
        return format!("{}ns", duration.as_nanos());
    }
    if nanos % 1_000_000 != 0 {
        return format!("{}us", duration.as_micros());
    }
    if nanos != 0 {
        return format!("{}ms", duration.as_millis());
    }

    let secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let remaining_secs = secs % 60;

    let mut result = String::new();
    if hours > 0 {
        result.push_str(&format!("{hours}h"));
    }
    if mins > 0 {
        result.push_str(&format!("{mins}m"));
    }
    if remaining_secs > 0 {
        result.push_str(&format!("{remaining_secs}s"));
    }
    result
}
