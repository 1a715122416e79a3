//! Duration strings in the `"1h2m3.5s"` notation
//!
//! Devices carry their offline threshold as a duration string
//! (`monitor_connection_state`), and notification messages render elapsed
//! offline time in the same notation after rounding.

use std::fmt::Write;
use std::time::Duration;

use crate::error::{Error, Result};

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;
const NANOS_PER_MIN: u128 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MIN;

/// Parse a duration string such as `"2s"`, `"1m30s"`, `"1.5h"` or `"250ms"`
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare
/// `"0"` is accepted, as is a leading `+` or `-`. A negative value parses
/// as [`Duration::ZERO`]: elapsed time is never negative, so both thresholds
/// are exceeded by any offline time.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if s.is_empty() {
        return Err(Error::decode(format!("empty duration: {:?}", input)));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || Error::decode(format!("invalid duration: {:?}", input));

    let mut rest = s;
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_end];
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        let unit_nanos = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SEC,
            "m" => NANOS_PER_MIN,
            "h" => NANOS_PER_HOUR,
            "" => {
                return Err(Error::decode(format!(
                    "missing unit in duration: {:?}",
                    input
                )));
            }
            other => {
                return Err(Error::decode(format!(
                    "unknown unit {:?} in duration: {:?}",
                    other, input
                )));
            }
        };

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
            return Err(invalid());
        }

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };

        let mut fraction_nanos: u128 = 0;
        if !frac_part.is_empty() {
            // Digits past nanosecond resolution cannot change the result
            let digits = frac_part.len().min(18);
            let fraction: u128 = frac_part[..digits].parse().map_err(|_| invalid())?;
            fraction_nanos = fraction * unit_nanos / 10u128.pow(digits as u32);
        }

        total = whole
            .checked_mul(unit_nanos)
            .and_then(|v| v.checked_add(fraction_nanos))
            .and_then(|v| v.checked_add(total))
            .ok_or_else(|| Error::decode(format!("duration out of range: {:?}", input)))?;
    }

    let magnitude = nanos_to_duration(total)
        .ok_or_else(|| Error::decode(format!("duration out of range: {:?}", input)))?;
    Ok(if negative { Duration::ZERO } else { magnitude })
}

/// Round `value` to the nearest multiple of `granularity`
///
/// Halfway values round away from zero. A zero granularity leaves the
/// value unchanged.
pub fn round_duration(value: Duration, granularity: Duration) -> Duration {
    let m = granularity.as_nanos();
    if m == 0 {
        return value;
    }
    let d = value.as_nanos();
    let r = d % m;
    let rounded = if r + r < m { d - r } else { d + (m - r) };
    nanos_to_duration(rounded).unwrap_or(Duration::MAX)
}

/// Render a duration as `"1h2m3s"`, `"2m0s"`, `"1.5s"` or `"250ms"`
pub fn format_duration(value: Duration) -> String {
    let nanos = value.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }

    if nanos < NANOS_PER_SEC {
        let (scale, unit) = if nanos < NANOS_PER_MICRO {
            (1, "ns")
        } else if nanos < NANOS_PER_MILLI {
            (NANOS_PER_MICRO, "µs")
        } else {
            (NANOS_PER_MILLI, "ms")
        };
        return format!("{}{}", format_scaled(nanos, scale), unit);
    }

    let hours = nanos / NANOS_PER_HOUR;
    let minutes = (nanos % NANOS_PER_HOUR) / NANOS_PER_MIN;
    let seconds = nanos % NANOS_PER_MIN;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{}h", hours);
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{}m", minutes);
    }
    let _ = write!(out, "{}s", format_scaled(seconds, NANOS_PER_SEC));
    out
}

/// `value / scale` with the fractional part trimmed of trailing zeros
fn format_scaled(value: u128, scale: u128) -> String {
    let whole = value / scale;
    let fraction = value % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let width = scale.to_string().len() - 1;
    let digits = format!("{:0width$}", fraction, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

fn nanos_to_duration(nanos: u128) -> Option<Duration> {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
    Some(Duration::new(secs, (nanos % NANOS_PER_SEC) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration(".5s").unwrap(), Duration::from_millis(500));
        assert_eq!(
            parse_duration("1h2m3.25s").unwrap(),
            Duration::from_millis(3_723_250)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5 minutes").is_err());
        assert!(parse_duration("-").is_err());
        assert!(parse_duration("+-1s").is_err());
        assert!(parse_duration("1.2.3s").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn test_parse_signed() {
        assert_eq!(parse_duration("+2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("-1s").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("-0").unwrap(), Duration::ZERO);
        assert!(parse_duration("-1x").is_err());
    }

    #[test]
    fn test_round_half_away_from_zero() {
        let second = Duration::from_secs(1);
        assert_eq!(round_duration(Duration::from_millis(3_200), second), Duration::from_secs(3));
        assert_eq!(round_duration(Duration::from_millis(2_500), second), Duration::from_secs(3));
        assert_eq!(
            round_duration(Duration::from_secs(90), Duration::from_secs(60)),
            Duration::from_secs(120)
        );
        assert_eq!(
            round_duration(Duration::from_millis(1_234), Duration::ZERO),
            Duration::from_millis(1_234)
        );
    }

    #[test]
    fn test_format_matches_compact_notation() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(3)), "3s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m0s");
        assert_eq!(format_duration(Duration::from_secs(3_900)), "1h5m0s");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1.5s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_micros(1_500)), "1.5ms");
    }
}
