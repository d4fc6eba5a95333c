// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.

use chrono::{DateTime, Local, NaiveDate, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Today's calendar date in the local time zone.
///
/// Trip status is a date-only comparison, so callers pass this around
/// instead of comparing timestamps.
pub fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

/// Month heading used when grouping trips, e.g. `"Jun 2024"`.
pub fn month_label(date: NaiveDate) -> String {
    date.format("%b %Y").to_string()
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_label() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert_eq!(month_label(date), "Jun 2024");
    }

    #[test]
    fn test_parse_iso_date() {
        assert_eq!(
            parse_iso_date(" 2024-02-29 "),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(parse_iso_date("2023-02-29"), None);
        assert_eq!(parse_iso_date("06/01/2024"), None);
    }

    #[test]
    fn test_format_utc_rfc3339() {
        let date = DateTime::from_timestamp(1_717_200_000, 0).unwrap();
        assert_eq!(format_utc_rfc3339(date), "2024-06-01T00:00:00Z");
    }
}
