/// Time normalization for year-less server stamps
///
/// Console stamps look like "Mon D HH:MM:SS" in UTC with no year. The year is
/// taken from the wall clock; stamps that would land in the future belong to
/// the previous year (a December line read in January).
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

/// Parse a stamp against the current wall clock.
pub fn parse(server_timestamp: &str) -> Option<DateTime<Utc>> {
    parse_at(server_timestamp, Utc::now())
}

/// Parse a stamp relative to `now`. Malformed input yields `None`.
pub fn parse_at(server_timestamp: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let fields: Vec<&str> = server_timestamp.split_whitespace().collect();
    // `%b` would also take full month names
    if fields.len() != 3 || fields[0].len() != 3 {
        return None;
    }
    let normalized = fields.join(" ");

    let this_year = now.year();
    match in_year(&normalized, this_year) {
        Some(instant) if instant <= now => Some(instant),
        // Future instant or a date missing from this year (Feb 29)
        _ => in_year(&normalized, this_year - 1).filter(|instant| *instant <= now),
    }
}

fn in_year(normalized: &str, year: i32) -> Option<DateTime<Utc>> {
    let candidate = format!("{} {}", year, normalized);
    NaiveDateTime::parse_from_str(&candidate, "%Y %b %d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Whole seconds from `start` to `end`, `None` when `end` precedes `start`.
pub fn duration(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<i64> {
    if end < start {
        return None;
    }
    Some((end - start).num_seconds())
}

/// Human-readable duration: hours+minutes, minutes+seconds, or seconds.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
