use std::ops::RangeInclusive;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};

use crate::error::WorklogError;

/// Fixed-width UTC form (`2024-01-01T00:00:00.000000Z`), so lexical order
/// matches chronological order inside SQLite.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Years that keep the four-digit form `parse_timestamp` can read back.
pub const STORABLE_YEARS: RangeInclusive<i32> = 0..=9999;

pub fn ensure_storable(ts: &DateTime<Utc>) -> Result<(), WorklogError> {
    if STORABLE_YEARS.contains(&ts.year()) {
        Ok(())
    } else {
        Err(WorklogError::invalid_argument(format!(
            "timestamp {ts} is outside years 0000-9999"
        )))
    }
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, WorklogError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WorklogError::invalid_argument(format!("invalid timestamp '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_is_fixed_width_utc() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-02T03:04:05.000000Z");
    }

    #[test]
    fn test_parse_normalizes_offsets() {
        let ts = parse_timestamp("2024-01-02T08:04:05+05:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-02T03:04:05.000000Z");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert!(matches!(err, WorklogError::InvalidArgument(_)));
    }

    #[test]
    fn test_out_of_range_years_are_not_storable() {
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            ensure_storable(&far),
            Err(WorklogError::InvalidArgument(_))
        ));
        let ancient = Utc.with_ymd_and_hms(-1, 1, 1, 0, 0, 0).unwrap();
        assert!(ensure_storable(&ancient).is_err());

        let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        ensure_storable(&last).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&last)).unwrap(), last);
    }

    #[test]
    fn test_lexical_order_matches_time_order() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let c = a + chrono::Duration::hours(30);
        let mut formatted = vec![format_timestamp(&c), format_timestamp(&a), format_timestamp(&b)];
        formatted.sort();
        assert_eq!(
            formatted,
            vec![format_timestamp(&a), format_timestamp(&b), format_timestamp(&c)]
        );
    }
}
