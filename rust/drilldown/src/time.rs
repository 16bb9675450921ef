//! Calendar-day ranges as requested by callers, in store-local time.

use crate::error::{Result, ServiceError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(deserialize_with = "deserialize_date")]
    pub start: NaiveDate,
    #[serde(deserialize_with = "deserialize_date")]
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(ServiceError::invalid(format!(
                "date range start {} must not be after end {}",
                self.start.format(DATE_FORMAT),
                self.end.format(DATE_FORMAT)
            )));
        }
        Ok(())
    }

    pub fn first_instant(&self) -> NaiveDateTime {
        start_of_day(self.start)
    }

    pub fn last_instant(&self) -> NaiveDateTime {
        end_of_day(self.end)
    }
}

pub fn start_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

pub fn end_of_day(day: NaiveDate) -> NaiveDateTime {
    // 23:59:59 is always a valid wall-clock time for a naive date.
    day.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN))
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or RFC 3339; only the calendar day is kept.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let value = raw.trim().trim_matches('"').trim_matches('\'');

    if let Ok(day) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
        return Ok(day);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, DATETIME_FORMAT) {
        return Ok(dt.date());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.date_naive());
    }

    Err(ServiceError::invalid(format!("invalid date literal '{raw}'")))
}

fn deserialize_date<'de, D>(deserializer: D) -> std::result::Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, DATE_FORMAT).unwrap()
    }

    #[test]
    fn parses_plain_and_timestamped_dates() {
        assert_eq!(parse_date("2026-01-05").unwrap(), day("2026-01-05"));
        assert_eq!(parse_date("2026-01-05 13:45:00").unwrap(), day("2026-01-05"));
        assert_eq!(
            parse_date("2026-01-05T23:10:00+02:00").unwrap(),
            day("2026-01-05")
        );
    }

    #[test]
    fn rejects_garbage_dates() {
        let err = parse_date("last week").unwrap_err();
        assert_eq!(err.to_string(), "invalid date literal 'last week'");
    }

    #[test]
    fn rejects_inverted_ranges() {
        let err = DateRange::parse("2026-02-01", "2026-01-01").unwrap_err();
        assert!(err.to_string().contains("must not be after end"));
    }

    #[test]
    fn day_bounds_cover_the_whole_range() {
        let range = DateRange::parse("2026-01-05", "2026-01-18").unwrap();
        assert_eq!(
            range.first_instant().format(DATETIME_FORMAT).to_string(),
            "2026-01-05 00:00:00"
        );
        assert_eq!(
            range.last_instant().format(DATETIME_FORMAT).to_string(),
            "2026-01-18 23:59:59"
        );
    }

    #[test]
    fn deserializes_from_json_strings() {
        let range: DateRange =
            serde_json::from_str(r#"{"start":"2026-01-05","end":"2026-01-18 00:00:00"}"#).unwrap();
        assert_eq!(range.start, day("2026-01-05"));
        assert_eq!(range.end, day("2026-01-18"));
    }
}
