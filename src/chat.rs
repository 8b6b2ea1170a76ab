/// Chat collaborator
///
/// Chat lines never enter the event pipeline (the classifier maps them to
/// `other`); they are parsed here instead.
use crate::line_classifier::clean_name;
use crate::model::{ChatMessage, RawLine};
use crate::time_normalizer;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static CHAT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?P<kind>say|sayteam):\s*(?P<name>[^:]+?)\s*:\s*(?P<msg>.*?)\s*$").unwrap()
});

/// Parse `say: NAME: message` / `sayteam: NAME: message`.
pub fn parse_chat(line: &RawLine, now: DateTime<Utc>) -> Option<ChatMessage> {
    let caps = CHAT_LINE.captures(&line.text)?;
    let player_name = clean_name(caps.name("name")?.as_str());
    if player_name.is_empty() {
        return None;
    }

    Some(ChatMessage {
        timestamp: line.timestamp.clone(),
        time: time_normalizer::parse_at(&line.timestamp, now),
        player_name,
        team_only: caps["kind"].eq_ignore_ascii_case("sayteam"),
        message: caps["msg"].to_string(),
    })
}

/// Chat messages of a window, optionally narrowed to a player substring
/// and stripped of an excluded account. Both needles are lowercase.
pub fn collect_chat(
    lines: &[RawLine],
    now: DateTime<Utc>,
    player_needle: Option<&str>,
    exclude_needle: Option<&str>,
) -> Vec<ChatMessage> {
    lines
        .iter()
        .filter_map(|line| parse_chat(line, now))
        .filter(|msg| {
            let speaker = msg.player_name.to_lowercase();
            let wanted = player_needle.map_or(true, |needle| speaker.contains(needle));
            let hidden = exclude_needle.is_some_and(|needle| speaker.contains(needle));
            wanted && !hidden
        })
        .collect()
}
