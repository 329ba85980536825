//! Control-table timestamp codec.
//!
//! Timestamps are stored as `yyyy-MM-dd HH:mm:ss` strings in the workbook's
//! timezone, or as the literal `Error` sentinel.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Lexical format of control-table timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sentinel recorded when a probe or sync failed.
pub const ERROR_SENTINEL: &str = "Error";

/// A control-table timestamp cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampValue {
    /// Blank cell.
    Empty,
    /// The `Error` sentinel.
    Error,
    /// A parseable local timestamp.
    At(NaiveDateTime),
    /// Anything else, kept verbatim.
    Unparsed(String),
}

impl StampValue {
    /// Parses a raw cell.
    ///
    /// Accepts the canonical format, a `T` separated variant, and RFC 3339
    /// (converted into `tz` local time).
    #[must_use]
    pub fn parse(raw: &str, tz: Tz) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        if trimmed == ERROR_SENTINEL {
            return Self::Error;
        }
        if let Ok(at) = NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT) {
            return Self::At(at);
        }
        if let Ok(at) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
            return Self::At(at);
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
            return Self::At(at.with_timezone(&tz).naive_local());
        }
        Self::Unparsed(raw.to_string())
    }

    /// Returns the local timestamp if the cell parsed.
    #[must_use]
    pub const fn at(&self) -> Option<NaiveDateTime> {
        match self {
            Self::At(at) => Some(*at),
            _ => None,
        }
    }

    /// Returns true for the `Error` sentinel.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Returns the parsed timestamp as an instant in `tz`.
    ///
    /// Ambiguous local times (DST fold) resolve to the earlier instant; local
    /// times in a DST gap yield `None`.
    #[must_use]
    pub fn instant(&self, tz: Tz) -> Option<DateTime<Utc>> {
        self.at().and_then(|at| to_instant(at, tz))
    }
}

impl fmt::Display for StampValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Error => f.write_str(ERROR_SENTINEL),
            Self::At(at) => write!(f, "{}", at.format(TIMESTAMP_FORMAT)),
            Self::Unparsed(raw) => f.write_str(raw),
        }
    }
}

/// Formats an instant in the workbook timezone.
#[must_use]
pub fn format_instant(instant: DateTime<Utc>, tz: Tz) -> String {
    instant
        .with_timezone(&tz)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Converts a local timestamp in `tz` to an instant.
#[must_use]
pub fn to_instant(local: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_and_sentinels() {
        let tz = Tz::UTC;
        assert_eq!(StampValue::parse("", tz), StampValue::Empty);
        assert_eq!(StampValue::parse("  ", tz), StampValue::Empty);
        assert_eq!(StampValue::parse("Error", tz), StampValue::Error);
        assert_eq!(StampValue::parse(" Error ", tz), StampValue::Error);

        let parsed = StampValue::parse("2024-01-01 10:00:00", tz);
        assert_eq!(parsed.to_string(), "2024-01-01 10:00:00");
        assert!(parsed.at().is_some());

        let junk = StampValue::parse("next tuesday", tz);
        assert_eq!(junk, StampValue::Unparsed("next tuesday".into()));
        assert_eq!(junk.to_string(), "next tuesday");
    }

    #[test]
    fn rfc3339_is_localized() {
        let tz: Tz = "Europe/Warsaw".parse().expect("tz");
        let parsed = StampValue::parse("2024-01-01T09:00:00Z", tz);
        assert_eq!(parsed.to_string(), "2024-01-01 10:00:00");
    }

    #[test]
    fn format_uses_workbook_timezone() {
        let tz: Tz = "America/New_York".parse().expect("tz");
        let instant = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(format_instant(instant, tz), "2024-06-01 08:00:00");

        let back = StampValue::parse("2024-06-01 08:00:00", tz)
            .instant(tz)
            .expect("instant");
        assert_eq!(back, instant);
    }
}
