//! Boundary adapter for the store's ambiguous date text.
//!
//! Reservation exports mix `DD/MM/YYYY` and `YYYY-MM-DD` (and the odd
//! `MM/DD/YYYY`). Parsing tries an explicit ordered format list and then a
//! small permissive fallback; callers decide what a `None` means (drop the
//! row on import, pass the raw text through, keep conservatively on sweep).

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Reference timezone for every "now" computation and stored timestamp
/// (Asia/Kuala_Lumpur, no DST).
const UTC_PLUS_8_SECS: i32 = 8 * 3600;

pub fn reference_offset() -> FixedOffset {
    FixedOffset::east_opt(UTC_PLUS_8_SECS).expect("valid UTC+8 offset")
}

pub fn now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&reference_offset())
}

pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Accepted formats, day-first spellings before month-first.
const PRIMARY_FORMATS: [&str; 3] = ["%d/%m/%Y", "%Y-%m-%d", "%m/%d/%Y"];

/// Permissive fallback for values the primary formats reject.
const FALLBACK_FORMATS: [&str; 4] = ["%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y", "%d/%m/%y"];

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    PRIMARY_FORMATS
        .iter()
        .chain(FALLBACK_FORMATS.iter())
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Timestamp written to the `{workflow} date` columns, e.g. `27/03/2025`.
pub fn stamp(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

pub fn stamp_now() -> String {
    stamp(today())
}

/// `01jun`-style fragment used in contact names.
pub fn day_month(date: NaiveDate) -> String {
    date.format("%d%b").to_string().to_lowercase()
}

/// (`YYYY-MM-DD`, `HHMMSS`) pair used for logs folders and archive names.
pub fn file_stamp() -> (String, String) {
    let now = now();
    (
        now.format("%Y-%m-%d").to_string(),
        now.format("%H%M%S").to_string(),
    )
}

/// `YYYY-MM-DD HH:00:00` planned check-in/out timestamp.
pub fn at_hour(date: NaiveDate, hour: u32) -> String {
    format!("{} {:02}:00:00", date.format("%Y-%m-%d"), hour)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primary_formats_in_order() {
        let expected = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(parse_date("01/06/2025"), Some(expected));
        assert_eq!(parse_date("2025-06-01"), Some(expected));
        // Month-first only matches once day-first has rejected the text.
        assert_eq!(
            parse_date("06/25/2025"),
            Some(NaiveDate::from_ymd_opt(2025, 6, 25).unwrap())
        );
    }

    #[test]
    fn falls_back_to_permissive_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(parse_date("01-06-2025"), Some(expected));
        assert_eq!(parse_date("2025/06/01"), Some(expected));
    }

    #[test]
    fn rejects_garbage_and_blanks() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("  "), None);
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn formats_stamps() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 27).unwrap();
        assert_eq!(stamp(date), "27/03/2025");
        assert_eq!(day_month(date), "27mar");
        assert_eq!(at_hour(date, 15), "2025-03-27 15:00:00");
    }
}
