//! Case-insensitive weekday and month names.

use chrono::{Month, Weekday};

/// Parse `"mo"`, `"mon"`, `"Monday"`, ... into a [`Weekday`].
pub fn parse_weekday(name: &str) -> Option<Weekday> {
    let lower = name.trim().to_ascii_lowercase();
    let wd = match lower.get(..2)? {
        "mo" => Weekday::Mon,
        "tu" => Weekday::Tue,
        "we" => Weekday::Wed,
        "th" => Weekday::Thu,
        "fr" => Weekday::Fri,
        "sa" => Weekday::Sat,
        "su" => Weekday::Sun,
        _ => return None,
    };
    // Accept any prefix of the full name, at least two letters long.
    let full = match wd {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    };
    full.starts_with(&lower).then_some(wd)
}

/// Parse `"jan"`, `"January"`, ... into a [`Month`].
pub fn parse_month(name: &str) -> Option<Month> {
    let lower = name.trim().to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    (1..=12u8)
        .filter_map(|n| Month::try_from(n).ok())
        .find(|m| m.name().to_ascii_lowercase().starts_with(&lower))
}
