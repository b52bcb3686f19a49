//! Due date: a timestamp that may or may not carry its zone.
//!
//! Records written by older clients can hold a due date without an offset.
//! Such a floating value is always read as UTC, never as the host's local time.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const FLOATING_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A due date as supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DueDate {
    /// Explicit offset (RFC 3339).
    Zoned(DateTime<FixedOffset>),
    /// No zone information; interpreted as UTC.
    Floating(NaiveDateTime),
}

impl DueDate {
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            DueDate::Zoned(dt) => dt.with_timezone(&Utc),
            DueDate::Floating(naive) => naive.and_utc(),
        }
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, DueDate::Floating(_))
    }

    /// `now` の時点で期限を過ぎているか（境界を含む）
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.to_utc()
    }
}

impl From<DateTime<Utc>> for DueDate {
    fn from(value: DateTime<Utc>) -> Self {
        DueDate::Zoned(value.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for DueDate {
    fn from(value: DateTime<FixedOffset>) -> Self {
        DueDate::Zoned(value)
    }
}

impl From<NaiveDateTime> for DueDate {
    fn from(value: NaiveDateTime) -> Self {
        DueDate::Floating(value)
    }
}

impl fmt::Display for DueDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DueDate::Zoned(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            DueDate::Floating(naive) => write!(f, "{}", naive.format("%Y-%m-%dT%H:%M:%S%.f")),
        }
    }
}

impl FromStr for DueDate {
    type Err = DueDateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(zoned) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(DueDate::Zoned(zoned));
        }
        FLOATING_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
            .map(DueDate::Floating)
            .ok_or_else(|| DueDateParseError(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid due date `{0}`: expected RFC 3339 or YYYY-MM-DDTHH:MM:SS")]
pub struct DueDateParseError(String);

impl Serialize for DueDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DueDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case("2025-01-01T00:00:00Z", false)]
    #[case("2025-01-01T09:00:00+09:00", false)]
    #[case("2025-01-01T00:00:00", true)]
    #[case("2025-01-01 00:00:00", true)]
    #[case("2025-01-01T00:00:00.000", true)]
    fn every_form_normalizes_to_the_same_instant(#[case] raw: &str, #[case] floating: bool) {
        let due: DueDate = raw.parse().unwrap();
        assert_eq!(due.is_floating(), floating);
        assert_eq!(due.to_utc(), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn floating_is_never_local_time() {
        let due: DueDate = "2025-06-15T12:30:00".parse().unwrap();
        assert_eq!(due.to_utc().to_rfc3339(), "2025-06-15T12:30:00+00:00");
    }

    #[test]
    fn boundary_counts_as_due() {
        let due: DueDate = "2025-01-01T00:00:00Z".parse().unwrap();
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(due.is_due_at(at));
        assert!(!due.is_due_at(at - chrono::Duration::seconds(1)));
    }

    #[test]
    fn display_keeps_the_variant() {
        let zoned: DueDate = "2025-01-01T09:00:00+09:00".parse().unwrap();
        let floating: DueDate = "2025-01-01 00:00:00".parse().unwrap();

        assert_eq!(zoned.to_string(), "2025-01-01T09:00:00+09:00");
        assert_eq!(floating.to_string().parse::<DueDate>().unwrap(), floating);
    }

    #[test]
    fn rejects_dates_without_time() {
        assert!("2025-01-01".parse::<DueDate>().is_err());
    }
}
