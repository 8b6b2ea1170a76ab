/// Shared data model for the console pipeline
///
/// Every type here is recomputed per query or per live subscription;
/// nothing is persisted.
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static LEADING_STAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z]{3}\s+\d{1,2}\s+\d{1,2}:\d{2}:\d{2})\s*(.*)$").unwrap()
});

// ============================================================================
// Raw input
// ============================================================================

/// One console line as delivered by the log store or the live feed.
/// The timestamp has no year and is UTC ("Mon D HH:MM:SS").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLine {
    pub timestamp: String,
    pub text: String,
}

impl RawLine {
    pub fn new(timestamp: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            text: text.into(),
        }
    }

    /// Split a full console line into stamp and text.
    ///
    /// Lines without a leading stamp keep an empty timestamp and the whole
    /// line as text.
    pub fn from_console_line(line: &str) -> Self {
        match LEADING_STAMP.captures(line) {
            Some(caps) => Self::new(&caps[1], &caps[2]),
            None => Self::new("", line),
        }
    }
}

// ============================================================================
// Classified events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Connection,
    Disconnect,
    Kill,
    Chat,
    Error,
    System,
    Gameplay,
    Other,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Connection => "connection",
            EventCategory::Disconnect => "disconnect",
            EventCategory::Kill => "kill",
            EventCategory::Chat => "chat",
            EventCategory::Error => "error",
            EventCategory::System => "system",
            EventCategory::Gameplay => "gameplay",
            EventCategory::Other => "other",
        }
    }
}

/// Structured view of one console line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    /// Server stamp exactly as received, kept for display when `time` is absent
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    pub category: EventCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weapon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    /// Download file, checksum reason, damage amount or disconnect reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub raw: String,
}

impl ClassifiedEvent {
    pub fn bare(line: &RawLine, category: EventCategory) -> Self {
        Self {
            timestamp: line.timestamp.clone(),
            time: None,
            category,
            player_name: None,
            target: None,
            event_subtype: None,
            weapon: None,
            ip: None,
            client_version: None,
            detail: None,
            raw: line.text.clone(),
        }
    }

    pub fn subtype(&self) -> Option<&str> {
        self.event_subtype.as_deref()
    }

    /// Case-insensitive substring match against the actor or the target.
    pub fn mentions_player(&self, needle_lower: &str) -> bool {
        [self.player_name.as_deref(), self.target.as_deref()]
            .into_iter()
            .flatten()
            .any(|name| name.to_lowercase().contains(needle_lower))
    }
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Downloading,
    Joined,
    ChecksumError,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSession {
    pub player_name: String,
    pub ip: Option<String>,
    pub client_version: Option<String>,
    pub connect_time: DateTime<Utc>,
    pub disconnect_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub download_file: Option<String>,
    pub checksum_error: Option<String>,
    pub duration_seconds: Option<i64>,
}

impl ConnectionSession {
    pub fn is_open(&self) -> bool {
        self.disconnect_time.is_none()
    }
}

/// A chat line handed to the chat collaborator instead of the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    pub player_name: String,
    pub team_only: bool,
    pub message: String,
}

// ============================================================================
// Query filter
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRangePreset {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "3h")]
    ThreeHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1m")]
    OneMonth,
}

impl TimeRangePreset {
    pub fn lookback(&self) -> Duration {
        match self {
            TimeRangePreset::OneHour => Duration::hours(1),
            TimeRangePreset::ThreeHours => Duration::hours(3),
            TimeRangePreset::SixHours => Duration::hours(6),
            TimeRangePreset::TwelveHours => Duration::hours(12),
            TimeRangePreset::OneDay => Duration::days(1),
            TimeRangePreset::ThreeDays => Duration::days(3),
            TimeRangePreset::OneWeek => Duration::weeks(1),
            TimeRangePreset::OneMonth => Duration::days(30),
        }
    }

    /// Window `[now - lookback, now]`.
    pub fn window_ending_at(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: now - self.lookback(),
            end: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryCategory {
    #[default]
    All,
    Connections,
    Kills,
    Chat,
    Errors,
    Gameplay,
    Other,
}

impl QueryCategory {
    /// Whether an event of `category` belongs in this view.
    pub fn admits(&self, category: EventCategory) -> bool {
        match self {
            QueryCategory::All => category != EventCategory::Other,
            QueryCategory::Connections => matches!(
                category,
                EventCategory::Connection | EventCategory::Disconnect
            ),
            QueryCategory::Kills => category == EventCategory::Kill,
            QueryCategory::Chat => category == EventCategory::Chat,
            QueryCategory::Errors => category == EventCategory::Error,
            QueryCategory::Gameplay => category == EventCategory::Gameplay,
            QueryCategory::Other => category == EventCategory::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub time_range: TimeRangePreset,
    #[serde(default)]
    pub category: QueryCategory,
    #[serde(default)]
    pub player_substring: Option<String>,
    /// Hide a known automation account end to end
    #[serde(default)]
    pub exclude_name: Option<String>,
}

impl QueryFilter {
    pub fn new(time_range: TimeRangePreset, category: QueryCategory) -> Self {
        Self {
            time_range,
            category,
            player_substring: None,
            exclude_name: None,
        }
    }

    pub fn with_player(mut self, substring: impl Into<String>) -> Self {
        self.player_substring = Some(substring.into());
        self
    }

    pub fn with_exclude_name(mut self, name: impl Into<String>) -> Self {
        self.exclude_name = Some(name.into());
        self
    }

    /// Lowercased player substring, `None` when absent or blank.
    pub fn player_needle(&self) -> Option<String> {
        lowered(self.player_substring.as_deref())
    }

    /// Lowercased excluded account name, `None` when absent or blank.
    pub fn exclude_needle(&self) -> Option<String> {
        lowered(self.exclude_name.as_deref())
    }
}

fn lowered(field: Option<&str>) -> Option<String> {
    field
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_console_line_splits_stamp() {
        let line = RawLine::from_console_line("Dec 31 23:59:00 clientconnect: Bob");
        assert_eq!(line.timestamp, "Dec 31 23:59:00");
        assert_eq!(line.text, "clientconnect: Bob");
    }

    #[test]
    fn test_from_console_line_without_stamp() {
        let line = RawLine::from_console_line("no stamp here");
        assert_eq!(line.timestamp, "");
        assert_eq!(line.text, "no stamp here");
    }

    #[test]
    fn test_filter_deserializes_presets() {
        let filter: QueryFilter =
            serde_json::from_str(r#"{"time_range":"1w","category":"connections"}"#).unwrap();
        assert_eq!(filter.time_range, TimeRangePreset::OneWeek);
        assert_eq!(filter.category, QueryCategory::Connections);
        assert!(filter.player_substring.is_none());
    }

    #[test]
    fn test_all_view_excludes_other() {
        assert!(QueryCategory::All.admits(EventCategory::Kill));
        assert!(!QueryCategory::All.admits(EventCategory::Other));
        assert!(QueryCategory::Other.admits(EventCategory::Other));
        assert!(QueryCategory::Connections.admits(EventCategory::Disconnect));
    }

    #[test]
    fn test_blank_player_substring_is_ignored() {
        let filter = QueryFilter::new(TimeRangePreset::OneHour, QueryCategory::All).with_player("  ");
        assert_eq!(filter.player_needle(), None);
    }
}
