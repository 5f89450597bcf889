//! Lenient datetime parsing for model output.
//!
//! The prompt demands ISO, but models slip into German date forms
//! ("25.02.", "25.02.2026 17:00"). Rather than losing those extractions we
//! accept both shapes; a date without a year is resolved against today.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedWhen {
    DateTime(NaiveDateTime),
    Date(NaiveDate),
}

static ISO_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})[T ](\d{1,2}):(\d{2})(?::\d{2})?$").unwrap()
});

static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").unwrap());

static GERMAN_DATE: Lazy<Regex> = Lazy::new(|| {
    // 25.02., 25.02.2026, optionally followed by a clock time
    Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{4})?\s*(?:[T ](\d{1,2}):(\d{2}))?$").unwrap()
});

/// Parse a model-supplied datetime or date string.
pub fn parse_when(raw: &str, today: NaiveDate) -> Option<ParsedWhen> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(caps) = ISO_DATETIME.captures(s) {
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        )?;
        let time = NaiveTime::from_hms_opt(caps[4].parse().ok()?, caps[5].parse().ok()?, 0)?;
        return Some(ParsedWhen::DateTime(date.and_time(time)));
    }

    if let Some(caps) = ISO_DATE.captures(s) {
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        )?;
        return Some(ParsedWhen::Date(date));
    }

    if let Some(caps) = GERMAN_DATE.captures(s) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year = match caps.get(3) {
            Some(y) => y.as_str().parse().ok()?,
            None => infer_year(day, month, today)?,
        };
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        return match (caps.get(4), caps.get(5)) {
            (Some(h), Some(m)) => {
                let time = NaiveTime::from_hms_opt(h.as_str().parse().ok()?, m.as_str().parse().ok()?, 0)?;
                Some(ParsedWhen::DateTime(date.and_time(time)))
            }
            _ => Some(ParsedWhen::Date(date)),
        };
    }

    None
}

/// Year for a day.month without one: this year, unless that lies more than
/// 60 days in the past, in which case it means the upcoming occurrence.
fn infer_year(day: u32, month: u32, today: NaiveDate) -> Option<i32> {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if this_year < today - Days::new(60) {
        Some(today.year() + 1)
    } else {
        Some(today.year())
    }
}
