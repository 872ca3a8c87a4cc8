//! Timezone selection: an IANA zone or the host's local zone.

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use crate::error::UnknownTimezone;

/// The zone wall-clock times are interpreted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zone {
    /// The host's local timezone.
    #[default]
    Local,
    /// A named IANA timezone, e.g. `Europe/Berlin`.
    Named(chrono_tz::Tz),
}

impl Zone {
    /// Resolve an optional IANA name. `None`, empty and `"local"` mean the host zone.
    pub fn parse(name: Option<&str>) -> Result<Self, UnknownTimezone> {
        match name.map(str::trim) {
            None | Some("") => Ok(Zone::Local),
            Some(n) if n.eq_ignore_ascii_case("local") => Ok(Zone::Local),
            Some(n) => n
                .parse::<chrono_tz::Tz>()
                .map(Zone::Named)
                .map_err(|_| UnknownTimezone(n.to_string())),
        }
    }

    /// Wall-clock time in this zone at the given instant.
    pub fn wall_clock(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Local => at.with_timezone(&Local).naive_local(),
            Zone::Named(tz) => at.with_timezone(tz).naive_local(),
        }
    }

    /// Map a wall-clock time in this zone to an instant.
    ///
    /// Ambiguous times (DST fold) resolve to the earlier instant; times that
    /// do not exist (DST gap) yield `None`.
    pub fn to_instant(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Zone::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
            Zone::Named(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::Local => f.write_str("local"),
            Zone::Named(tz) => f.write_str(tz.name()),
        }
    }
}
