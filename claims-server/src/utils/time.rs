//! Auction deadline parsing and formatting
//!
//! Deadlines travel through chat as `ends 25/12/2026, Friday, 1800h`.
//! Parsing tolerates a missing weekday and two-digit years; formatting
//! always emits the full form.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use std::sync::LazyLock;

static END_EXPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bends?\s+(\d{1,2})/(\d{1,2})/(\d{2,4})(?:\s*,\s*[A-Za-z]+)?\s*,?\s*(\d{3,4})\s*h\b")
        .expect("end expression regex")
});

/// Parse an `ends DD/MM/YYYY, <weekday>, HHMMh` expression.
///
/// The weekday, when present, is ignored; the date is authoritative.
/// Returns `None` when the text carries no such expression or the
/// date/time digits do not form a real moment.
pub fn parse_end_expression(text: &str) -> Option<DateTime<Utc>> {
    let caps = END_EXPR.captures(text)?;

    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let mut year: i32 = caps[3].parse().ok()?;
    if year < 100 {
        year += 2000;
    }

    let hhmm = &caps[4];
    let (hour, minute) = if hhmm.len() == 3 {
        (hhmm[..1].parse().ok()?, hhmm[1..].parse().ok()?)
    } else {
        (hhmm[..2].parse().ok()?, hhmm[2..].parse().ok()?)
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive = date.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Render a deadline for buyers, weekday included
pub fn format_display_end(end: DateTime<Utc>) -> String {
    end.format("ends %d/%m/%Y, %A, %H%Mh").to_string()
}
