//! Timestamp utilities

use chrono::{Local, NaiveDateTime};

/// EXIF date-time layout (`YYYY:MM:DD HH:MM:SS`)
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Layout used in synthesized file names, microsecond precision
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

/// Current wall-clock time in the local zone
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Parse an EXIF date-time string
///
/// Tolerates trailing NULs and whitespace that some cameras leave in
/// ASCII tag values.
pub fn parse_exif_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    NaiveDateTime::parse_from_str(trimmed, EXIF_DATETIME_FORMAT).ok()
}

/// Render a timestamp for use inside a generated file name
pub fn filename_stamp(at: &NaiveDateTime) -> String {
    at.format(FILENAME_TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDate, Timelike};

    #[test]
    fn test_parse_exif_datetime_valid() {
        let parsed = parse_exif_datetime("2019:07:04 18:30:05").unwrap();
        assert_eq!(parsed.year(), 2019);
        assert_eq!(parsed.month(), 7);
        assert_eq!(parsed.day(), 4);
        assert_eq!(parsed.hour(), 18);
        assert_eq!(parsed.second(), 5);
    }

    #[test]
    fn test_parse_exif_datetime_trailing_nul() {
        assert!(parse_exif_datetime("2019:07:04 18:30:05\0").is_some());
    }

    #[test]
    fn test_parse_exif_datetime_rejects_other_layouts() {
        assert!(parse_exif_datetime("2019-07-04 18:30:05").is_none());
        assert!(parse_exif_datetime("0000:00:00 00:00:00").is_none());
        assert!(parse_exif_datetime("").is_none());
    }

    #[test]
    fn test_filename_stamp_layout() {
        let at = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(8, 9, 10, 42)
            .unwrap();
        assert_eq!(filename_stamp(&at), "20240229_080910_000042");
    }
}
