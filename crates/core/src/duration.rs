//! Duration helpers shared by config parsing and the alarm timing math.

use std::time::Duration;

/// Parse a human-readable duration such as `"10m"`, `"1h30m"` or `"90s"`.
///
/// Supported units: `d`, `h`, `m`, `s`. A bare number is read as seconds.
/// Returns `None` for empty or malformed input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut digits = String::new();
    let mut saw_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let n: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match ch {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total_secs = total_secs.checked_add(n.checked_mul(unit)?)?;
        saw_unit = true;
    }

    if !digits.is_empty() {
        // "5m30" is ambiguous; only a bare number may omit the unit.
        if saw_unit {
            return None;
        }
        total_secs = digits.parse().ok()?;
    }

    Some(Duration::from_secs(total_secs))
}

/// Convert a (possibly negative or NaN) number of seconds to a [`Duration`],
/// clamping invalid input to zero.
pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::ZERO)
}

/// Convert a std [`Duration`] into a chrono duration for instant arithmetic.
///
/// Durations too large for chrono saturate at one hundred years.
pub fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}
