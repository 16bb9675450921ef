//! Splits a date range into comparable weekly, biweekly or monthly buckets.
//!
//! Buckets are produced newest-first starting from the range end, the oldest
//! one is clamped to the range start, and the list is reversed before it is
//! returned. Keys keep their generation index, so the oldest bucket carries
//! the highest key.

use crate::{
    error::Result,
    time::{end_of_day, start_of_day, DateRange, DATETIME_FORMAT},
};
use chrono::{Datelike, Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

pub const MAX_PERIODS: usize = 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Weekly,
    Biweekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePeriod {
    pub key: String,
    pub label: String,
    pub start_date: String,
    pub end_date: String,
}

/// Buckets `range`, labelling against the current local year.
pub fn generate_periods(range: &DateRange, granularity: Granularity) -> Result<Vec<TimePeriod>> {
    generate_periods_at(range, granularity, Local::now().year())
}

pub fn generate_periods_at(
    range: &DateRange,
    granularity: Granularity,
    reference_year: i32,
) -> Result<Vec<TimePeriod>> {
    range.validate()?;

    let mut periods = Vec::new();
    let mut cursor = range.end;

    while periods.len() < MAX_PERIODS {
        let natural_start = bucket_start(cursor, granularity);
        let reached_start = natural_start <= range.start;
        let start = natural_start.max(range.start);
        let end = match granularity {
            Granularity::Monthly => last_day_of_month(cursor),
            Granularity::Weekly | Granularity::Biweekly => cursor,
        };

        periods.push(TimePeriod {
            key: format!("period_{}", periods.len()),
            label: label_for(granularity, start, end, reference_year),
            start_date: start_of_day(start).format(DATETIME_FORMAT).to_string(),
            end_date: end_of_day(end).format(DATETIME_FORMAT).to_string(),
        });

        if reached_start {
            break;
        }
        match natural_start.pred_opt() {
            Some(previous) => cursor = previous,
            None => break,
        }
    }

    periods.reverse();
    Ok(periods)
}

fn bucket_start(end: NaiveDate, granularity: Granularity) -> NaiveDate {
    match granularity {
        Granularity::Weekly => end
            .checked_sub_signed(Duration::days(6))
            .unwrap_or(NaiveDate::MIN),
        Granularity::Biweekly => {
            let day = if end.day() >= 15 { 15 } else { 1 };
            end.with_day(day).unwrap_or(end)
        }
        Granularity::Monthly => end.with_day(1).unwrap_or(end),
    }
}

fn last_day_of_month(day: NaiveDate) -> NaiveDate {
    let (year, month) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .unwrap_or(day)
}

fn label_for(granularity: Granularity, start: NaiveDate, end: NaiveDate, reference_year: i32) -> String {
    let label = match granularity {
        Granularity::Weekly => format!("{} - {}", start.format("%b %-d"), end.format("%b %-d")),
        Granularity::Biweekly => {
            format!("{} {}-{}", start.format("%b"), start.day(), end.day())
        }
        Granularity::Monthly => start.format("%b").to_string(),
    };

    if end.year() == reference_year {
        label
    } else {
        format!("{label} {}", end.year())
    }
}
