//! Datetime parsing for the many shapes upstream listings use.
//!
//! Everything resolves to a `DateTime<FixedOffset>` expressed in the cinema's
//! timezone. Inputs without offset information are read as cinema-local time.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%d %H:%M%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d %Y",
    "%b %d %Y",
];

static ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").expect("valid ordinal pattern"));

static LEADING_WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun)[a-z]*,?\s+")
        .expect("valid weekday pattern")
});

static CLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{1,2})(?:[:.](\d{2}))?(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)?$")
        .expect("valid clock pattern")
});

static COMPACT_CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})(\d{2})$").expect("valid compact clock pattern"));

static TRAILING_CLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[\s,@]+)(?:at\s+)?(\d{1,2}(?:[:.]\d{2}){1,2}\s*(?:am|pm|a\.m\.|p\.m\.)?|\d{1,2}\s*(?:am|pm|a\.m\.|p\.m\.))$")
        .expect("valid trailing clock pattern")
});

/// Attach `tz` to a naive local time. Ambiguous times (autumn fold) take the
/// earlier instant; times inside the spring-forward gap do not exist.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<FixedOffset>, String> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(to_fixed(dt)),
        LocalResult::Ambiguous(earliest, _) => Ok(to_fixed(earliest)),
        LocalResult::None => Err(format!("{naive} does not exist in {tz}")),
    }
}

fn to_fixed(dt: DateTime<Tz>) -> DateTime<FixedOffset> {
    let offset = dt.offset().fix();
    dt.with_timezone(&offset)
}

/// Re-express an absolute instant in the cinema's timezone
pub fn in_zone<O: TimeZone>(dt: DateTime<O>, tz: Tz) -> DateTime<FixedOffset> {
    to_fixed(dt.with_timezone(&tz))
}

/// Parse a complete datetime string (ISO/RFC 3339 with or without offset, or a
/// date phrase followed by a clock time).
pub fn parse_datetime(
    value: &str,
    tz: Tz,
    reference: NaiveDate,
) -> Result<DateTime<FixedOffset>, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty datetime".into());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(in_zone(dt, tz));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, fmt) {
            return Ok(in_zone(dt, tz));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return localize(naive, tz);
        }
    }

    // "Friday 26th December 7:30pm", "tomorrow 19:30"
    if let Some(caps) = TRAILING_CLOCK.captures(value) {
        let whole = caps.get(0).map(|m| m.start()).unwrap_or(value.len());
        let date_part = value[..whole].trim().trim_end_matches(',');
        let time_part = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if !date_part.is_empty() {
            if let (Some(date), Some(time)) = (parse_date(date_part, reference), parse_time(time_part)) {
                return localize(date.and_time(time), tz);
            }
        }
    }

    Err(format!("unrecognized datetime '{value}'"))
}

/// Interpret integer seconds since the Unix epoch
pub fn from_epoch_seconds(secs: i64, tz: Tz) -> Result<DateTime<FixedOffset>, String> {
    match Utc.timestamp_opt(secs, 0) {
        LocalResult::Single(dt) => Ok(in_zone(dt, tz)),
        _ => Err(format!("epoch seconds {secs} out of range")),
    }
}

/// Combine separate date and time strings
pub fn combine(
    date: &str,
    time: &str,
    tz: Tz,
    reference: NaiveDate,
) -> Result<DateTime<FixedOffset>, String> {
    let day = parse_date(date, reference).ok_or_else(|| format!("unrecognized date '{date}'"))?;
    let clock = parse_time(time).ok_or_else(|| format!("unrecognized time '{time}'"))?;
    localize(day.and_time(clock), tz)
}

/// Parse a calendar date. Relative tokens and year-less dates are resolved
/// against `reference`.
pub fn parse_date(value: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    match lower.as_str() {
        "today" | "tonight" => return Some(reference),
        "tomorrow" => return Some(reference + Duration::days(1)),
        _ => {}
    }
    if let Some(weekday) = weekday_from_name(&lower) {
        return Some(next_weekday(reference, weekday));
    }

    // Leading date prefix of an ISO datetime ("2024-06-01T...")
    if let Some(prefix) = trimmed.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }

    let cleaned = ORDINAL.replace_all(trimmed, "$1").replace(',', " ");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_weekday = LEADING_WEEKDAY.replace(&cleaned, "").to_string();

    for candidate in [cleaned.as_str(), without_weekday.as_str()] {
        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, fmt) {
                return Some(date);
            }
        }
    }

    // No year: "26 December", "December 26"
    for fmt in ["%d %B %Y", "%d %b %Y", "%B %d %Y", "%b %d %Y"] {
        let with_year = format!("{} {}", without_weekday, reference.year());
        if let Ok(date) = NaiveDate::parse_from_str(&with_year, fmt) {
            return Some(roll_forward(date, reference));
        }
    }
    None
}

/// Year-less dates more than a month in the past belong to next year
fn roll_forward(date: NaiveDate, reference: NaiveDate) -> NaiveDate {
    if date < reference - Duration::days(31) {
        date.with_year(date.year() + 1).unwrap_or(date)
    } else {
        date
    }
}

fn weekday_from_name(name: &str) -> Option<Weekday> {
    let day = match name.trim_end_matches('.') {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" | "tues" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" | "thur" | "thurs" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        "sunday" | "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(day)
}

/// Next date on or after `reference` falling on `weekday`
fn next_weekday(reference: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (7 + weekday.num_days_from_monday() as i64
        - reference.weekday().num_days_from_monday() as i64)
        % 7;
    reference + Duration::days(ahead)
}

/// Parse a clock time: "19:30", "19.30", "1930", "7:30 pm", "7pm", "noon"
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let lower = value.trim().to_ascii_lowercase();
    match lower.as_str() {
        "noon" | "midday" => return NaiveTime::from_hms_opt(12, 0, 0),
        "midnight" => return NaiveTime::from_hms_opt(0, 0, 0),
        _ => {}
    }

    if let Some(caps) = COMPACT_CLOCK.captures(&lower) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    let caps = CLOCK.captures(&lower)?;
    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
    let second: u32 = caps.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
    match caps.get(4).map(|m| m.as_str().starts_with('p')) {
        Some(true) if hour < 12 => hour += 12,
        Some(false) if hour == 12 => hour = 0,
        Some(_) if hour > 12 => return None,
        None if caps.get(2).is_none() => return None,
        _ => {}
    }
    NaiveTime::from_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::London;

    fn reference() -> NaiveDate {
        // A Saturday
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn test_offset_and_local_forms_agree() {
        let with_offset = parse_datetime("2024-06-01T19:30:00+01:00", London, reference()).unwrap();
        let local = parse_datetime("2024-06-01 19:30", London, reference()).unwrap();
        assert_eq!(with_offset, local);
        assert_eq!(local.to_rfc3339(), "2024-06-01T19:30:00+01:00");
    }

    #[test]
    fn test_utc_input_is_displayed_in_cinema_zone() {
        let dt = parse_datetime("2024-06-01T18:30:00Z", London, reference()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-06-01T19:30:00+01:00");
    }

    #[test]
    fn test_naive_iso_uses_winter_offset() {
        let dt = parse_datetime("2024-12-26T14:30:00", London, reference()).unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_date_phrase_with_trailing_clock() {
        let dt = parse_datetime("Friday 7th June 7:30 pm", London, reference()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-06-07T19:30:00+01:00");
    }

    #[test]
    fn test_relative_tokens() {
        assert_eq!(parse_date("today", reference()), Some(reference()));
        assert_eq!(
            parse_date("Tomorrow", reference()),
            NaiveDate::from_ymd_opt(2024, 6, 2)
        );
        // Reference is a Saturday; next Monday is the 3rd, Saturday itself counts
        assert_eq!(parse_date("monday", reference()), NaiveDate::from_ymd_opt(2024, 6, 3));
        assert_eq!(parse_date("Saturday", reference()), Some(reference()));
    }

    #[test]
    fn test_yearless_date_rolls_into_next_year() {
        let december = NaiveDate::from_ymd_opt(2024, 12, 20).unwrap();
        assert_eq!(
            parse_date("Friday 3rd January", december),
            NaiveDate::from_ymd_opt(2025, 1, 3)
        );
        assert_eq!(
            parse_date("26 December", december),
            NaiveDate::from_ymd_opt(2024, 12, 26)
        );
    }

    #[test]
    fn test_numeric_date_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 6, 14);
        assert_eq!(parse_date("2024-06-14", reference()), expected);
        assert_eq!(parse_date("14/06/2024", reference()), expected);
        assert_eq!(parse_date("14 June 2024", reference()), expected);
    }

    #[test]
    fn test_clock_forms() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0);
        assert_eq!(parse_time("19:30"), t(19, 30));
        assert_eq!(parse_time("19.30"), t(19, 30));
        assert_eq!(parse_time("1430"), t(14, 30));
        assert_eq!(parse_time("2:30 pm"), t(14, 30));
        assert_eq!(parse_time("7pm"), t(19, 0));
        assert_eq!(parse_time("12:15am"), t(0, 15));
        assert_eq!(parse_time("noon"), t(12, 0));
        assert_eq!(parse_time("25:00"), None);
        assert_eq!(parse_time("19"), None);
    }

    #[test]
    fn test_combine_date_and_time() {
        let dt = combine("2025-12-27", "1430", London, reference()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-12-27T14:30:00+00:00");
    }

    #[test]
    fn test_dst_gap_is_rejected_and_fold_takes_earlier() {
        let gap = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap().and_hms_opt(1, 30, 0).unwrap();
        assert!(localize(gap, London).is_err());

        let fold = NaiveDate::from_ymd_opt(2024, 10, 27).unwrap().and_hms_opt(1, 30, 0).unwrap();
        let dt = localize(fold, London).unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 3600);
    }

    #[test]
    fn test_epoch_seconds() {
        let dt = from_epoch_seconds(1_717_266_600, London).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-06-01T19:30:00+01:00");
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(parse_datetime("coming soon", London, reference()).is_err());
        assert!(parse_datetime("", London, reference()).is_err());
    }
}
