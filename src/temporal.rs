//! # Temporal Module
//!
//! Time handling for tweet records: parsing the `created_at` string form and
//! deriving epoch timestamps from snowflake ids.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// `Wed Oct 10 20:19:24 +0000 2018`
const CREATED_AT_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute] [year]"
);

/// Milliseconds between the Unix epoch and the snowflake epoch.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_288_834_974_657;

/// Smallest id treated as a snowflake. Pre-snowflake ids were sequential and
/// never came close to this value.
pub const SNOWFLAKE_MIN_ID: i64 = 1 << 42;

/// Parse a `created_at` string and normalize it to UTC.
pub fn parse_created_at(created_at: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(created_at.trim(), CREATED_AT_FORMAT)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC))
}

/// Render a timestamp in the `created_at` form, always with a `+0000` offset.
pub fn format_created_at(at: OffsetDateTime) -> Option<String> {
    at.to_offset(UtcOffset::UTC).format(CREATED_AT_FORMAT).ok()
}

pub fn is_snowflake(id: i64) -> bool {
    id >= SNOWFLAKE_MIN_ID
}

/// Epoch seconds (millisecond resolution) encoded in a snowflake id.
pub fn snowflake_to_epoch_seconds(id: i64) -> f64 {
    ((id >> 22) + SNOWFLAKE_EPOCH_MS) as f64 / 1000.0
}

/// Numeric timestamp for a tweet: from the id when it is a snowflake,
/// otherwise from `created_at`.
pub fn normalized_timestamp(id: i64, created_at: Option<&str>) -> Option<f64> {
    if is_snowflake(id) {
        return Some(snowflake_to_epoch_seconds(id));
    }
    created_at
        .and_then(parse_created_at)
        .map(|dt| dt.unix_timestamp() as f64)
}

/// Calendar parts used by shard patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarParts {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
}

impl CalendarParts {
    pub fn from_created_at(created_at: &str) -> Option<Self> {
        let dt = parse_created_at(created_at)?;
        Some(Self {
            year: dt.year(),
            month: u8::from(dt.month()),
            day: dt.day(),
            hour: dt.hour(),
        })
    }

    /// ISO 8601 calendar date, `YYYY-MM-DD`.
    pub fn iso_date(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_created_at() {
        let dt = parse_created_at("Wed Oct 10 20:19:24 +0000 2018").unwrap();
        assert_eq!(dt.unix_timestamp(), 1_539_202_764);
    }

    #[test]
    fn test_parse_created_at_normalizes_offset() {
        let parts = CalendarParts::from_created_at("Wed Oct 10 23:30:00 -0200 2018").unwrap();
        assert_eq!(parts.iso_date(), "2018-10-11");
        assert_eq!(parts.hour, 1);
    }

    #[test]
    fn test_format_created_at() {
        let dt = parse_created_at("Thu Oct 11 01:30:00 +0000 2018").unwrap();
        assert_eq!(
            format_created_at(dt).unwrap(),
            "Thu Oct 11 01:30:00 +0000 2018"
        );
    }

    #[test]
    fn test_parse_created_at_rejects_garbage() {
        assert!(parse_created_at("2018-10-10T20:19:24Z").is_none());
        assert!(parse_created_at("").is_none());
    }

    #[test]
    fn test_snowflake_timestamp() {
        // Snowflake id from 2018-10-10T20:19:24.xxxZ
        let id = 1_050_118_621_198_921_728;
        assert!(is_snowflake(id));
        let seconds = snowflake_to_epoch_seconds(id);
        assert!((seconds - 1_539_202_764.0).abs() < 1.0, "got {seconds}");
    }

    #[test]
    fn test_small_ids_fall_back_to_created_at() {
        assert!(!is_snowflake(20));
        assert_eq!(
            normalized_timestamp(20, Some("Wed Oct 10 20:19:24 +0000 2018")),
            Some(1_539_202_764.0)
        );
        assert_eq!(normalized_timestamp(20, None), None);
    }
}
