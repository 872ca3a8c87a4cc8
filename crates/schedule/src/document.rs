//! Serde schema for the JSON schedule document.
//!
//! ```json
//! {
//!   "timezone": "Europe/Berlin",
//!   "rrule_sets": [{
//!     "rrules": [{"freq": "weekly", "byweekday": ["mo", "tu", "we", "th", "fr"],
//!                 "dtstart": {"hour": 6, "minute": 45}}],
//!     "exdates": ["2024-12-25T06:45:00"],
//!     "parameters": {"name": "weekday"}
//!   }],
//!   "exceptions": {
//!     "include": [{"datetime": "2024-12-28T09:00:00", "parameters": {"name": "weekend"}}],
//!     "exclude": [{"year": 2024, "month": 12, "day": 31, "hour": 6, "minute": 45}]
//!   }
//! }
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use rouse_core::Zone;
use rouse_rules::AlarmParameters;

use crate::error::{Result, ScheduleError};

// ── Document ────────────────────────────────────────────────────────

/// Top-level schedule document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleDocument {
    /// IANA timezone for every wall-clock time in the document; `null` = local.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub rrule_sets: Vec<RuleSetSpec>,
    #[serde(default)]
    pub exceptions: Exceptions,
}

/// One recurrence definition bound to alarm parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSetSpec {
    #[serde(default)]
    pub rrules: Vec<RuleSpec>,
    #[serde(default)]
    pub exrules: Vec<RuleSpec>,
    #[serde(default)]
    pub rdates: Vec<DateSpec>,
    #[serde(default)]
    pub exdates: Vec<DateSpec>,
    #[serde(default)]
    pub parameters: AlarmParameters,
}

/// Document-wide one-off inclusions and exclusions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Exceptions {
    /// Extra occurrences, returned as-is (never filtered by exclusions).
    #[serde(default)]
    pub include: Vec<Inclusion>,
    /// Instants removed from every rule-set.
    #[serde(default)]
    pub exclude: Vec<DateSpec>,
}

/// A one-off occurrence with its own parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inclusion {
    pub datetime: DateSpec,
    #[serde(default)]
    pub parameters: AlarmParameters,
}

// ── Recurrence rule ─────────────────────────────────────────────────

/// A single recurrence rule. Field names follow RFC 5545 / dateutil.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSpec {
    /// `"daily"`, `"WEEKLY"`, or dateutil's numeric constants (0 = yearly ... 6 = secondly).
    /// Defaults to daily.
    #[serde(default)]
    pub freq: Option<NameOrNumber>,
    #[serde(default)]
    pub interval: Option<u16>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub until: Option<DateSpec>,
    /// Fields overriding the fixed epoch anchor (2000-01-01 00:00:00).
    #[serde(default)]
    pub dtstart: Option<DateFields>,
    #[serde(default)]
    pub bymonth: Option<OneOrMany<NameOrNumber>>,
    #[serde(default)]
    pub bymonthday: Option<OneOrMany<i8>>,
    /// Weekday names or indices (0 = Monday), or `[weekday, n]` pairs for
    /// "the nth weekday of the period". Inside a list the pair is nested,
    /// `[["su", -1], "mo"]`. A bare `["su", -1]` is read as one pair when the
    /// number cannot be a weekday index.
    #[serde(default, deserialize_with = "weekday_list")]
    pub byweekday: Option<OneOrMany<WeekdaySpec>>,
    #[serde(default)]
    pub byhour: Option<OneOrMany<u8>>,
    #[serde(default)]
    pub byminute: Option<OneOrMany<u8>>,
    #[serde(default)]
    pub bysecond: Option<OneOrMany<u8>>,
    #[serde(default)]
    pub bysetpos: Option<OneOrMany<i32>>,
    /// Week start day.
    #[serde(default)]
    pub wkst: Option<NameOrNumber>,
}

/// A symbolic name or a numeric index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameOrNumber {
    Number(i64),
    Name(String),
}

impl std::fmt::Display for NameOrNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameOrNumber::Number(n) => write!(f, "{n}"),
            NameOrNumber::Name(s) => f.write_str(s),
        }
    }
}

/// A weekday, optionally qualified by its ordinal within the period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeekdaySpec {
    /// `["fr", -1]`: last Friday of the period.
    Nth(NameOrNumber, i16),
    /// `"fr"` or `4`: every Friday.
    Every(NameOrNumber),
}

/// A scalar or a list of scalars.
///
/// Lists are tried first, so `["mo", 1]` is two weekdays; write
/// `[["mo", 1]]` for "first Monday".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(x) => std::slice::from_ref(x),
        }
    }
}

impl OneOrMany<WeekdaySpec> {
    /// `["su", -1]` parses as two weekdays; turn it back into the nth pair
    /// when the second item is outside 0..=6.
    fn collapse_nth_pair(self) -> Self {
        let items = match self {
            OneOrMany::Many(items) => items,
            one => return one,
        };
        let nth = match items.as_slice() {
            [WeekdaySpec::Every(NameOrNumber::Name(day)), WeekdaySpec::Every(NameOrNumber::Number(n))]
                if !(0..=6).contains(n) =>
            {
                i16::try_from(*n)
                    .ok()
                    .map(|n| WeekdaySpec::Nth(NameOrNumber::Name(day.clone()), n))
            }
            _ => None,
        };
        match nth {
            Some(pair) => OneOrMany::One(pair),
            None => OneOrMany::Many(items),
        }
    }
}

fn weekday_list<'de, D>(deserializer: D) -> std::result::Result<Option<OneOrMany<WeekdaySpec>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<OneOrMany<WeekdaySpec>>::deserialize(deserializer)?.map(OneOrMany::collapse_nth_pair))
}

// ── Dates ───────────────────────────────────────────────────────────

/// A datetime: ISO-8601 text or a fields object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateSpec {
    Text(String),
    Fields(DateFields),
}

/// Calendar fields; missing fields are filled from a base datetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateFields {
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub day: Option<u32>,
    #[serde(default)]
    pub hour: Option<u32>,
    #[serde(default)]
    pub minute: Option<u32>,
    #[serde(default)]
    pub second: Option<u32>,
}

/// Anchor used for every rule without an explicit start date, so identical
/// documents expand identically regardless of when the process started.
pub fn epoch_anchor() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

impl DateFields {
    /// Overlay these fields on `base`.
    pub fn overlay(&self, base: NaiveDateTime) -> Result<NaiveDateTime> {
        use chrono::{Datelike, Timelike};
        let date = NaiveDate::from_ymd_opt(
            self.year.unwrap_or(base.year()),
            self.month.unwrap_or(base.month()),
            self.day.unwrap_or(base.day()),
        );
        date.and_then(|d| {
            d.and_hms_opt(
                self.hour.unwrap_or(base.hour()),
                self.minute.unwrap_or(base.minute()),
                self.second.unwrap_or(base.second()),
            )
        })
        .ok_or_else(|| ScheduleError::InvalidDate(format!("{self:?}")))
    }

    /// Interpret as an absolute wall-clock time. Year, month and day are
    /// required; the time of day defaults to midnight.
    pub fn absolute(&self) -> Result<NaiveDateTime> {
        if self.year.is_none() || self.month.is_none() || self.day.is_none() {
            return Err(ScheduleError::InvalidDate(format!(
                "{self:?} (year, month and day are required)"
            )));
        }
        self.overlay(epoch_anchor())
    }
}

impl DateSpec {
    /// Resolve to an instant, reading naive values in `zone`.
    pub fn resolve(&self, zone: Zone) -> Result<DateTime<Utc>> {
        let naive = match self {
            DateSpec::Text(text) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(text.trim()) {
                    return Ok(dt.with_timezone(&Utc));
                }
                parse_naive(text)?
            }
            DateSpec::Fields(fields) => fields.absolute()?,
        };
        zone.to_instant(naive).ok_or_else(|| {
            ScheduleError::InvalidDate(format!("{naive} does not exist in timezone {zone}"))
        })
    }
}

fn parse_naive(text: &str) -> Result<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    let text = text.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| ScheduleError::InvalidDate(text.to_string()))
}
