//! Timestamp parsing and the Hong Kong civil clock.
//!
//! Upstream feeds report arrival instants in two encodings, with or without
//! fractional seconds, and sometimes with a literal `Z` in place of a numeric
//! offset. Aggregation buckets (hour, weekday) are always computed in
//! `Asia/Hong_Kong`, with public holidays folded into the Sunday bucket.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc};
use chrono_tz::Asia::Hong_Kong;
use chrono_tz::Tz;
use std::collections::HashSet;
use thiserror::Error;

const INSTANT_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z"];

#[derive(Debug, Error)]
#[error("time data '{text}' does not match any supported format")]
pub struct ParseInstantError {
    pub text: String,
}

/// Parses an arrival instant from feed text.
///
/// Accepts `2024-01-01T08:00:00.123+0800` and `2024-01-01T08:00:00+0800`;
/// a trailing `Z` is treated as an explicit UTC offset.
pub fn parse_instant(text: &str) -> Result<DateTime<FixedOffset>, ParseInstantError> {
    let normalized = match text.strip_suffix('Z') {
        Some(prefix) => format!("{prefix}+0000"),
        None => text.to_string(),
    };

    for format in INSTANT_FORMATS {
        if let Ok(instant) = DateTime::parse_from_str(&normalized, format) {
            return Ok(instant);
        }
    }

    Err(ParseInstantError {
        text: text.to_string(),
    })
}

/// The current instant on the Hong Kong civil clock.
pub fn hk_now() -> DateTime<Tz> {
    Utc::now().with_timezone(&Hong_Kong)
}

/// Local hour of day, 0-23.
pub fn hour_of(now: DateTime<Tz>) -> u32 {
    now.hour()
}

/// Weekday bucket, 0-6 with 0 = Sunday.
///
/// Any date present in the holiday set resolves to 0 regardless of the actual
/// day, so holiday traffic aggregates with Sunday traffic.
pub fn weekday_of(now: DateTime<Tz>, holidays: &HashSet<NaiveDate>) -> u32 {
    if holidays.contains(&now.date_naive()) {
        return 0;
    }
    now.weekday().num_days_from_sunday()
}
