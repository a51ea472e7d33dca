//! Date and clock normalization for the form's date/time inputs.
//!
//! Everything here is pure: the reference date is always passed in, never read
//! from the wall clock.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use thiserror::Error;

/// Formats tried in order after the compact `YYYYMMDD` form.
const DELIMITED_FORMATS: &[&str] = &["%Y/%m/%d", "%Y-%m-%d"];

/// Format the HTML date input receives.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid date \"{0}\" (YYYYMMDD is recommended)")]
    Date(String),
    #[error("{field} must be a number, got \"{value}\"")]
    NotANumber { field: String, value: String },
    #[error("{field} must be between 0 and {max}, got {value}")]
    OutOfRange { field: String, value: u32, max: u32 },
}

/// Weekday names the operator may type instead of a date.
fn parse_weekday(raw: &str) -> Option<Weekday> {
    let weekday = match raw {
        "月曜" | "月曜日" => Weekday::Mon,
        "火曜" | "火曜日" => Weekday::Tue,
        "水曜" | "水曜日" => Weekday::Wed,
        "木曜" | "木曜日" => Weekday::Thu,
        "金曜" | "金曜日" => Weekday::Fri,
        "土曜" | "土曜日" => Weekday::Sat,
        "日曜" | "日曜日" => Weekday::Sun,
        other => match other.to_ascii_lowercase().as_str() {
            "monday" => Weekday::Mon,
            "tuesday" => Weekday::Tue,
            "wednesday" => Weekday::Wed,
            "thursday" => Weekday::Thu,
            "friday" => Weekday::Fri,
            "saturday" => Weekday::Sat,
            "sunday" => Weekday::Sun,
            _ => return None,
        },
    };
    Some(weekday)
}

fn parse_compact(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = raw[0..4].parse().ok()?;
    let month = raw[4..6].parse().ok()?;
    let day = raw[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Next date on or after `today` falling on `target`; `today` itself counts.
pub fn next_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let offset = (7 + target.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        % 7;
    today + Duration::days(offset)
}

/// Turn loosely formatted input into a date.
///
/// Blank input yields `today`; a weekday name yields the next such day on or
/// after `today`; otherwise `YYYYMMDD`, `YYYY/MM/DD` and `YYYY-MM-DD` are tried
/// in that order.
pub fn normalize_date(raw: &str, today: NaiveDate) -> Result<NaiveDate, FormatError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(today);
    }

    if let Some(weekday) = parse_weekday(raw) {
        return Ok(next_weekday(today, weekday));
    }

    if let Some(date) = parse_compact(raw) {
        return Ok(date);
    }

    DELIMITED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| FormatError::Date(raw.to_string()))
}

pub fn format_for_input(date: NaiveDate) -> String {
    date.format(CANONICAL_FORMAT).to_string()
}

/// Validate an hour or minute value and zero-pad it to two digits.
pub fn normalize_clock(field: &str, raw: &str, max: u32) -> Result<String, FormatError> {
    let trimmed = raw.trim();
    let value: u32 = trimmed.parse().map_err(|_| FormatError::NotANumber {
        field: field.to_string(),
        value: trimmed.to_string(),
    })?;
    if value > max {
        return Err(FormatError::OutOfRange {
            field: field.to_string(),
            value,
            max,
        });
    }
    Ok(format!("{value:02}"))
}
