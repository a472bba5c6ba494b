//! Human-friendly duration parsing
//!
//! Accepts the familiar `1h30m` grammar extended with day, week and year
//! units: `7d10h31s`, `2.5d1.5h3.5m`, `-1w`. A year is 365 days.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const NANOSECOND: u64 = 1;
const MICROSECOND: u64 = 1_000 * NANOSECOND;
const MILLISECOND: u64 = 1_000 * MICROSECOND;
const SECOND: u64 = 1_000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const YEAR: u64 = 365 * DAY;

/// Magnitude of `i64::MIN`, the largest value a negative duration may reach
const MAX_MAGNITUDE: u64 = 1 << 63;

/// A signed duration in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Convert to a std duration; `None` when negative
    pub fn to_std(self) -> Option<std::time::Duration> {
        u64::try_from(self.0).ok().map(std::time::Duration::from_nanos)
    }
}

fn unit_nanos(unit: &str) -> Option<u64> {
    Some(match unit {
        "ns" => NANOSECOND,
        "us" | "µs" | "μs" => MICROSECOND,
        "ms" => MILLISECOND,
        "s" => SECOND,
        "m" => MINUTE,
        "h" => HOUR,
        "d" => DAY,
        "w" => WEEK,
        "y" => YEAR,
        _ => return None,
    })
}

/// Consume leading digits. Returns the value and the remainder, or `None` on overflow.
fn leading_int(s: &str) -> Option<(u64, &str)> {
    let end = s.bytes().position(|b| !b.is_ascii_digit()).unwrap_or(s.len());
    let mut x: u64 = 0;
    for b in s[..end].bytes() {
        if x > (MAX_MAGNITUDE - 1) / 10 {
            return None;
        }
        x = x * 10 + u64::from(b - b'0');
        if x > MAX_MAGNITUDE {
            return None;
        }
    }
    Some((x, &s[end..]))
}

/// Consume leading fraction digits. Digits past u64 precision are dropped.
fn leading_fraction(s: &str) -> (u64, f64, &str) {
    let end = s.bytes().position(|b| !b.is_ascii_digit()).unwrap_or(s.len());
    let mut x: u64 = 0;
    let mut scale = 1.0_f64;
    let mut overflow = false;
    for b in s[..end].bytes() {
        if overflow {
            continue;
        }
        if x > (u64::MAX >> 1) / 10 {
            overflow = true;
            continue;
        }
        let y = x * 10 + u64::from(b - b'0');
        if y > MAX_MAGNITUDE {
            overflow = true;
            continue;
        }
        x = y;
        scale *= 10.0;
    }
    (x, scale, &s[end..])
}

/// Parse a duration string such as `7d10h31s` or `-1.5h`
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || Error::Duration(format!("invalid duration \"{input}\""));

    let mut s = input;
    let mut neg = false;
    if let Some(rest) = s.strip_prefix('-') {
        neg = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(if input.is_empty() {
            Error::Duration("invalid empty duration".into())
        } else {
            invalid()
        });
    }

    let mut total: u64 = 0;
    while !s.is_empty() {
        let first = s.as_bytes()[0];
        if !(first == b'.' || first.is_ascii_digit()) {
            return Err(invalid());
        }

        let before = s.len();
        let (mut value, rest) = leading_int(s).ok_or_else(invalid)?;
        s = rest;
        let has_int = before != s.len();

        let mut fraction = 0;
        let mut scale = 1.0;
        let mut has_fraction = false;
        if let Some(rest) = s.strip_prefix('.') {
            let before = rest.len();
            let (f, sc, rest) = leading_fraction(rest);
            fraction = f;
            scale = sc;
            has_fraction = before != rest.len();
            s = rest;
        }
        if !has_int && !has_fraction {
            return Err(invalid());
        }

        let unit_end = s
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(s.len());
        if unit_end == 0 {
            return Err(Error::Duration(format!(
                "missing unit in duration \"{input}\""
            )));
        }
        let unit_str = &s[..unit_end];
        s = &s[unit_end..];
        let unit = unit_nanos(unit_str).ok_or_else(|| {
            Error::Duration(format!(
                "unknown unit \"{unit_str}\" in duration \"{input}\""
            ))
        })?;

        let overflow = || Error::Duration(format!("duration \"{input}\" overflows"));
        if value > MAX_MAGNITUDE / unit {
            return Err(overflow());
        }
        value *= unit;
        if fraction > 0 {
            value = value
                .checked_add((fraction as f64 * (unit as f64 / scale)) as u64)
                .filter(|v| *v <= MAX_MAGNITUDE)
                .ok_or_else(overflow)?;
        }
        total = total
            .checked_add(value)
            .filter(|v| *v <= MAX_MAGNITUDE)
            .ok_or_else(overflow)?;
    }

    if neg {
        // 1 << 63 negated is exactly i64::MIN
        return Ok(Duration(0_i64.wrapping_sub_unsigned(total)));
    }
    if total > MAX_MAGNITUDE - 1 {
        return Err(Error::Duration(format!("duration \"{input}\" overflows")));
    }
    Ok(Duration(total as i64))
}

impl FromStr for Duration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_duration(s)
    }
}

impl fmt::Display for Duration {
    /// Canonical form: `1d2h3m4.5s`, `0s` for zero
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0s");
        }
        if self.0 < 0 {
            f.write_str("-")?;
        }
        let mut rem = self.0.unsigned_abs();
        let days = rem / DAY;
        rem %= DAY;
        let hours = rem / HOUR;
        rem %= HOUR;
        let minutes = rem / MINUTE;
        rem %= MINUTE;
        let seconds = rem / SECOND;
        let nanos = rem % SECOND;

        if days > 0 {
            write!(f, "{days}d")?;
        }
        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        if nanos > 0 {
            let frac = format!("{nanos:09}");
            write!(f, "{seconds}.{}s", frac.trim_end_matches('0'))?;
        } else if seconds > 0 {
            write!(f, "{seconds}s")?;
        }
        Ok(())
    }
}
