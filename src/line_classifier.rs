/// Line classification for game-server console output
///
/// Classification is an ordered table of rules evaluated top to bottom; the
/// first rule whose matcher fires decides the category and runs its field
/// extractor. Every line gets a category: anything unrecognized is `Other`.
///
/// Rule order:
/// 0. chat guard (`say:` / `sayteam:`) → other
/// 1. kill indicators (whole words) → kill
/// 2. connect indicators → connection
/// 3. disconnect indicators → disconnect
/// 4. structured `Gameplay:` lines → gameplay
/// 5. game state → system / gameplay
/// 6. error indicators → error
/// 7. server broadcast / print / warmup / match → system
use crate::model::{ClassifiedEvent, EventCategory, RawLine};
use crate::time_normalizer;
use aho_corasick::AhoCorasick;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::{Captures, Regex};

// ============================================================================
// Matchers
// ============================================================================

/// How a rule decides whether it applies to a line.
pub enum Matcher {
    /// Case-insensitive plain substrings
    Keywords(AhoCorasick),
    /// Case-insensitive regex
    Pattern(Regex),
    /// Either sub-matcher fires
    Any(Vec<Matcher>),
}

impl Matcher {
    fn keywords(words: &[&str]) -> Self {
        let ac = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(words)
            .expect("static keyword set must build");
        Matcher::Keywords(ac)
    }

    fn pattern(pattern: &str) -> Self {
        Matcher::Pattern(Regex::new(pattern).expect("static rule pattern must compile"))
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Keywords(ac) => ac.is_match(text),
            Matcher::Pattern(re) => re.is_match(text),
            Matcher::Any(matchers) => matchers.iter().any(|m| m.is_match(text)),
        }
    }
}

type Extractor = fn(&str, &mut ClassifiedEvent);

/// One `(predicate, category, extractor)` entry of the rule table.
pub struct Rule {
    pub name: &'static str,
    pub category: EventCategory,
    matcher: Matcher,
    extract: Extractor,
}

// ============================================================================
// Extraction patterns
// ============================================================================

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).unwrap());
    };
}

pattern!(COLOR_CODE, r"\^[0-9a-zA-Z]");

pattern!(
    KILL_PASSIVE,
    r"(?i)^(?:kill:\s*[\d\s]*:\s*)?(?P<vic>.+?)\s+was\s+killed\s+by\s+(?P<att>.+?)(?:\s+with\s+(?P<weapon>.+?))?\s*$"
);
pattern!(
    KILL_FULL,
    r"(?i)^(?:kill:\s*[\d\s]*:\s*)?(?P<att>.+?)\s+killed\s+(?P<vic>.+?)(?:\s+(?:by|with)\s+(?P<weapon>.+?))?\s*$"
);
pattern!(
    KILL_HEADSHOT,
    r"(?i)^(?P<att>.+?)\s+headshot\s+(?P<vic>.+?)(?:\s+with\s+(?P<weapon>.+?))?\s*$"
);
pattern!(
    KILL_GIBBED,
    r"(?i)^(?P<vic>.+?)\s+was\s+gibbed\s+by\s+(?P<att>.+?)(?:\s+with\s+(?P<weapon>.+?))?\s*$"
);
pattern!(
    KILL_DAMAGE,
    r"(?i)^(?P<att>.+?)\s+hit\s+(?P<vic>.+?)\s+for\s+(?P<amt>\d+)\s*(?:damage|dmg)(?:\s+with\s+(?P<weapon>.+?))?\s*$"
);
pattern!(DAMAGE_AMOUNT, r"(?i)\b(\d+)\s*(?:damage|dmg)\b");

pattern!(
    CLIENT_CONNECT,
    r"(?i)clientconnect:\s*(?P<name>.+?)(?:\s+from\s+(?P<ip>\S+))?(?:\s+version\s+(?P<ver>\S+))?\s*$"
);
pattern!(
    CLIENT_DOWNLOAD,
    r"(?i)clientdownload:\s*(?P<name>.+?)\s+downloading\s+(?P<file>.+?)\s*$"
);
pattern!(
    CHECKSUM_MISMATCH,
    r"(?i)^(?P<name>.+?)\s+checksum\s+mismatch(?:\s*:\s*(?P<reason>.+?))?\s*$"
);
pattern!(ENTERED_GAME, r"(?i)^(?P<name>.+?)\s+entered\s+the\s+game\b");
pattern!(
    NAME_CONNECTED,
    r"(?i)^(?P<name>.+?)\s+connected\b(?:\s+from\s+(?P<ip>\S+))?"
);
pattern!(NAME_JOINED, r"(?i)^(?P<name>.+?)\s+joined\b");

pattern!(
    CLIENT_DISCONNECT,
    r"(?i)clientdisconnect:\s*(?P<name>.+?)(?:\s*\((?P<reason>[^)]*)\))?\s*$"
);
pattern!(
    NAME_DISCONNECT,
    r"(?i)^(?P<name>.+?)\s+(?P<kw>disconnected|timed\s+out|was\s+kicked|was\s+dropped|left\s+the\s+game)(?:.*?\((?P<reason>[^)]*)\))?"
);

pattern!(GAMEPLAY_PREFIX, r"(?i)^\s*gameplay:\s*(?P<body>.*)$");

pattern!(
    STATE_SYSTEM,
    r"(?i)\b(?P<kw>map_restart|round|timelimit|fraglimit)\b"
);
pattern!(
    STATE_GAMEPLAY,
    r"(?i)\b(?P<kw>flag|objective|spawn(?:ed)?|red\s+team|blue\s+team)\b"
);
pattern!(STATE_ACTOR_BY, r"(?i)\bby\s+(?P<name>.+?)\s*$");
pattern!(
    STATE_ACTOR_LEADING,
    r"(?i)^(?P<name>.+?)\s+(?:captured|took|picked\s+up|dropped|returned|spawned|completed|secured|destroyed|switched\s+to)\b"
);

pattern!(ERROR_WORDS, r"(?i)\b(?P<kw>error|warning|exception|failed)\b");

pattern!(SYSTEM_PREFIX, r"(?i)^\s*(?P<kw>broadcast|print|server):");
pattern!(SYSTEM_WORDS, r"(?i)\b(?P<kw>warmup|match)\b");

/// Strip color codes and surrounding whitespace from a player name.
pub fn clean_name(raw: &str) -> String {
    COLOR_CODE.replace_all(raw, "").trim().to_string()
}

fn capture(caps: &Captures, group: &str) -> Option<String> {
    caps.name(group)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn capture_name(caps: &Captures, group: &str) -> Option<String> {
    caps.name(group)
        .map(|m| clean_name(m.as_str()))
        .filter(|s| !s.is_empty())
}

fn set_subtype(event: &mut ClassifiedEvent, subtype: &str) {
    event.event_subtype = Some(subtype.to_string());
}

// ============================================================================
// Extractors
// ============================================================================

fn extract_nothing(_text: &str, _event: &mut ClassifiedEvent) {}

fn extract_kill(text: &str, event: &mut ClassifiedEvent) {
    let attempts: [(&Lazy<Regex>, &str); 5] = [
        (&KILL_PASSIVE, "kill"),
        (&KILL_FULL, "kill"),
        (&KILL_HEADSHOT, "headshot"),
        (&KILL_GIBBED, "gib"),
        (&KILL_DAMAGE, "damage"),
    ];

    for (re, subtype) in attempts {
        if let Some(caps) = re.captures(text) {
            event.player_name = capture_name(&caps, "att");
            event.target = capture_name(&caps, "vic");
            event.weapon = capture(&caps, "weapon");
            event.detail = capture(&caps, "amt");
            set_subtype(event, subtype);
            return;
        }
    }

    let lower = text.to_lowercase();
    let subtype = if lower.contains("killed") {
        "kill"
    } else if lower.contains("headshot") {
        "headshot"
    } else if lower.contains("gibbed") {
        "gib"
    } else {
        event.detail = DAMAGE_AMOUNT
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        "damage"
    };
    set_subtype(event, subtype);
}

fn extract_connection(text: &str, event: &mut ClassifiedEvent) {
    if let Some(caps) = CLIENT_CONNECT.captures(text) {
        event.player_name = capture_name(&caps, "name");
        event.ip = capture(&caps, "ip");
        event.client_version = capture(&caps, "ver");
        set_subtype(event, "connect");
    } else if let Some(caps) = CLIENT_DOWNLOAD.captures(text) {
        event.player_name = capture_name(&caps, "name");
        event.detail = capture(&caps, "file");
        set_subtype(event, "download");
    } else if let Some(caps) = CHECKSUM_MISMATCH.captures(text) {
        event.player_name = capture_name(&caps, "name");
        event.detail = capture(&caps, "reason");
        set_subtype(event, "checksum_error");
    } else if let Some(caps) = ENTERED_GAME.captures(text) {
        event.player_name = capture_name(&caps, "name");
        set_subtype(event, "joined");
    } else if let Some(caps) = NAME_CONNECTED.captures(text) {
        event.player_name = capture_name(&caps, "name");
        event.ip = capture(&caps, "ip");
        set_subtype(event, "connect");
    } else if let Some(caps) = NAME_JOINED.captures(text) {
        event.player_name = capture_name(&caps, "name");
        set_subtype(event, "joined");
    } else {
        let lower = text.to_lowercase();
        let subtype = if lower.contains("clientdownload:") {
            "download"
        } else if lower.contains("checksum mismatch") {
            "checksum_error"
        } else if lower.contains("joined") || lower.contains("entered the game") {
            "joined"
        } else {
            "connect"
        };
        set_subtype(event, subtype);
    }
}

fn disconnect_subtype(keyword: &str) -> &'static str {
    let normalized: String = keyword
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    match normalized.as_str() {
        "timed out" => "timeout",
        "was kicked" => "kick",
        "was dropped" => "drop",
        "left the game" => "leave",
        _ => "disconnect",
    }
}

fn extract_disconnect(text: &str, event: &mut ClassifiedEvent) {
    if let Some(caps) = CLIENT_DISCONNECT.captures(text) {
        event.player_name = capture_name(&caps, "name");
        event.detail = capture(&caps, "reason");
        set_subtype(event, "disconnect");
    } else if let Some(caps) = NAME_DISCONNECT.captures(text) {
        event.player_name = capture_name(&caps, "name");
        event.detail = capture(&caps, "reason");
        let keyword = caps.name("kw").map(|m| m.as_str()).unwrap_or_default();
        set_subtype(event, disconnect_subtype(keyword));
    } else {
        set_subtype(event, "disconnect");
    }
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.filter(|f| !f.is_empty())
}

/// `Gameplay: SUBTYPE | ACTOR | TARGET | WEAPON`, trailing fields optional.
fn extract_structured_gameplay(text: &str, event: &mut ClassifiedEvent) {
    let Some(caps) = GAMEPLAY_PREFIX.captures(text) else {
        return;
    };
    let body = caps.name("body").map(|m| m.as_str()).unwrap_or_default();
    let mut fields = body.split('|').map(str::trim);

    event.event_subtype = non_empty(fields.next()).map(str::to_lowercase);
    event.player_name = non_empty(fields.next()).map(clean_name);
    event.target = non_empty(fields.next()).map(clean_name);
    event.weapon = non_empty(fields.next()).map(str::to_string);
}

fn extract_state_system(text: &str, event: &mut ClassifiedEvent) {
    if let Some(caps) = STATE_SYSTEM.captures(text) {
        event.event_subtype = capture(&caps, "kw").map(|kw| kw.to_lowercase());
    }
}

fn extract_state_gameplay(text: &str, event: &mut ClassifiedEvent) {
    if let Some(caps) = STATE_GAMEPLAY.captures(text) {
        let keyword = caps
            .name("kw")
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let subtype = if keyword.starts_with("spawn") {
            "spawn"
        } else if keyword.ends_with("team") {
            "team"
        } else {
            keyword.as_str()
        };
        set_subtype(event, subtype);
    }

    let actor = STATE_ACTOR_BY
        .captures(text)
        .or_else(|| STATE_ACTOR_LEADING.captures(text))
        .and_then(|caps| capture_name(&caps, "name"))
        .filter(|name| !STATE_GAMEPLAY.is_match(name));
    event.player_name = actor;
}

fn extract_error(text: &str, event: &mut ClassifiedEvent) {
    if let Some(caps) = ERROR_WORDS.captures(text) {
        event.event_subtype = capture(&caps, "kw").map(|kw| kw.to_lowercase());
    }
}

fn extract_system(text: &str, event: &mut ClassifiedEvent) {
    let caps = SYSTEM_PREFIX
        .captures(text)
        .or_else(|| SYSTEM_WORDS.captures(text));
    if let Some(caps) = caps {
        event.event_subtype = capture(&caps, "kw").map(|kw| kw.to_lowercase());
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Stateless, shareable line classifier.
pub struct LineClassifier {
    rules: Vec<Rule>,
}

impl LineClassifier {
    pub fn new() -> Self {
        let rules = vec![
            Rule {
                name: "chat_guard",
                category: EventCategory::Other,
                matcher: Matcher::pattern(r"(?i)^\s*(?:say|sayteam):"),
                extract: extract_nothing,
            },
            Rule {
                name: "kill",
                category: EventCategory::Kill,
                // Whole words only, so names like "HeadshotHero" stay out
                matcher: Matcher::pattern(
                    r"(?i)\b(?:killed|headshot|gibbed)\b|\b\d+\s*(?:damage|dmg)\b",
                ),
                extract: extract_kill,
            },
            Rule {
                name: "connection",
                category: EventCategory::Connection,
                matcher: Matcher::Any(vec![
                    Matcher::keywords(&[
                        "clientconnect:",
                        "clientdownload:",
                        "checksum mismatch",
                        "entered the game",
                    ]),
                    // Word bounded so "disconnected" stays out
                    Matcher::pattern(r"(?i)\b(?:connected|joined)\b"),
                ]),
                extract: extract_connection,
            },
            Rule {
                name: "disconnect",
                category: EventCategory::Disconnect,
                matcher: Matcher::keywords(&[
                    "clientdisconnect:",
                    "disconnected",
                    "timed out",
                    "was kicked",
                    "was dropped",
                    "left the game",
                ]),
                extract: extract_disconnect,
            },
            Rule {
                name: "gameplay",
                category: EventCategory::Gameplay,
                matcher: Matcher::Pattern((*GAMEPLAY_PREFIX).clone()),
                extract: extract_structured_gameplay,
            },
            Rule {
                name: "game_state_system",
                category: EventCategory::System,
                matcher: Matcher::Pattern((*STATE_SYSTEM).clone()),
                extract: extract_state_system,
            },
            Rule {
                name: "game_state_gameplay",
                category: EventCategory::Gameplay,
                matcher: Matcher::Pattern((*STATE_GAMEPLAY).clone()),
                extract: extract_state_gameplay,
            },
            Rule {
                name: "error",
                category: EventCategory::Error,
                matcher: Matcher::Pattern((*ERROR_WORDS).clone()),
                extract: extract_error,
            },
            Rule {
                name: "system",
                category: EventCategory::System,
                matcher: Matcher::Any(vec![
                    Matcher::Pattern((*SYSTEM_PREFIX).clone()),
                    Matcher::Pattern((*SYSTEM_WORDS).clone()),
                ]),
                extract: extract_system,
            },
        ];

        Self { rules }
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name).collect()
    }

    /// Name of the first rule matching `text`, if any.
    pub fn matching_rule(&self, text: &str) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(text))
            .map(|rule| rule.name)
    }

    /// Classify one line. Never fails; `time` is left unset.
    pub fn classify(&self, line: &RawLine) -> ClassifiedEvent {
        match self.rules.iter().find(|rule| rule.matcher.is_match(&line.text)) {
            Some(rule) => {
                let mut event = ClassifiedEvent::bare(line, rule.category);
                (rule.extract)(&line.text, &mut event);
                event
            }
            None => ClassifiedEvent::bare(line, EventCategory::Other),
        }
    }

    /// Classify one line and resolve its stamp relative to `now`.
    pub fn classify_at(&self, line: &RawLine, now: DateTime<Utc>) -> ClassifiedEvent {
        let mut event = self.classify(line);
        event.time = time_normalizer::parse_at(&line.timestamp, now);
        event
    }

    /// Classify a batch in parallel, preserving input order.
    pub fn classify_batch(&self, lines: &[RawLine], now: DateTime<Utc>) -> Vec<ClassifiedEvent> {
        lines
            .par_iter()
            .map(|line| self.classify_at(line, now))
            .collect()
    }
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> ClassifiedEvent {
        LineClassifier::new().classify(&RawLine::new("Jun 14 15:16:01", text))
    }

    #[test]
    fn test_rule_order_is_fixed() {
        let names = LineClassifier::new().rule_names();
        assert_eq!(
            names,
            vec![
                "chat_guard",
                "kill",
                "connection",
                "disconnect",
                "gameplay",
                "game_state_system",
                "game_state_gameplay",
                "error",
                "system",
            ]
        );
    }

    #[test]
    fn test_quake_kill_line() {
        let event = classify("Kill: 0 1 10: Alice killed Bob by MOD_RAILGUN");
        assert_eq!(event.category, EventCategory::Kill);
        assert_eq!(event.player_name.as_deref(), Some("Alice"));
        assert_eq!(event.target.as_deref(), Some("Bob"));
        assert_eq!(event.weapon.as_deref(), Some("MOD_RAILGUN"));
        assert_eq!(event.subtype(), Some("kill"));
    }

    #[test]
    fn test_passive_kill_line() {
        let event = classify("Alice was killed by <world>");
        assert_eq!(event.category, EventCategory::Kill);
        assert_eq!(event.player_name.as_deref(), Some("<world>"));
        assert_eq!(event.target.as_deref(), Some("Alice"));
        assert_eq!(event.weapon, None);

        let event = classify("Bob was killed by Alice with Rocket Launcher");
        assert_eq!(event.player_name.as_deref(), Some("Alice"));
        assert_eq!(event.target.as_deref(), Some("Bob"));
        assert_eq!(event.weapon.as_deref(), Some("Rocket Launcher"));
    }

    #[test]
    fn test_kill_words_inside_names_are_not_kills() {
        let event = classify("ClientConnect: HeadshotHero");
        assert_eq!(event.category, EventCategory::Connection);
        assert_eq!(event.player_name.as_deref(), Some("HeadshotHero"));

        let event = classify("ClientDisconnect: xXGibbedXx");
        assert_eq!(event.category, EventCategory::Disconnect);
    }

    #[test]
    fn test_headshot_and_gib() {
        let event = classify("Alice headshot Bob with Sniper");
        assert_eq!(event.subtype(), Some("headshot"));
        assert_eq!(event.weapon.as_deref(), Some("Sniper"));

        let event = classify("Bob was gibbed by Alice");
        assert_eq!(event.category, EventCategory::Kill);
        assert_eq!(event.player_name.as_deref(), Some("Alice"));
        assert_eq!(event.target.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_damage_pattern() {
        let event = classify("Alice hit Bob for 45 damage");
        assert_eq!(event.category, EventCategory::Kill);
        assert_eq!(event.subtype(), Some("damage"));
        assert_eq!(event.detail.as_deref(), Some("45"));
    }

    #[test]
    fn test_client_connect_fields() {
        let event = classify("ClientConnect: Bob^7 from 10.0.0.5:27960 version 1.71");
        assert_eq!(event.category, EventCategory::Connection);
        assert_eq!(event.player_name.as_deref(), Some("Bob"));
        assert_eq!(event.ip.as_deref(), Some("10.0.0.5:27960"));
        assert_eq!(event.client_version.as_deref(), Some("1.71"));
        assert_eq!(event.subtype(), Some("connect"));
    }

    #[test]
    fn test_disconnected_is_not_a_connection() {
        let event = classify("Bob disconnected");
        assert_eq!(event.category, EventCategory::Disconnect);
        assert_eq!(event.player_name.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_disconnect_subtypes() {
        assert_eq!(classify("Bob timed out").subtype(), Some("timeout"));
        assert_eq!(classify("Bob was kicked (spamming)").detail.as_deref(), Some("spamming"));
        assert_eq!(classify("Bob left the game").subtype(), Some("leave"));
        assert_eq!(classify("ClientDisconnect: Bob").subtype(), Some("disconnect"));
    }

    #[test]
    fn test_download_and_checksum() {
        let event = classify("ClientDownload: Bob downloading maps/dm6.pk3");
        assert_eq!(event.subtype(), Some("download"));
        assert_eq!(event.detail.as_deref(), Some("maps/dm6.pk3"));

        let event = classify("Bob checksum mismatch: pak0.pk3");
        assert_eq!(event.category, EventCategory::Connection);
        assert_eq!(event.subtype(), Some("checksum_error"));
        assert_eq!(event.detail.as_deref(), Some("pak0.pk3"));
    }

    #[test]
    fn test_chat_marker_wins_over_everything() {
        for text in ["say: Alice killed Bob lol", "sayteam: I connected", "  SAY: map_restart"] {
            assert_eq!(classify(text).category, EventCategory::Other, "{}", text);
        }
    }

    #[test]
    fn test_structured_gameplay() {
        let event = classify("Gameplay: kill | Alice | Agent[BOT] | railgun");
        assert_eq!(event.category, EventCategory::Gameplay);
        assert_eq!(event.subtype(), Some("kill"));
        assert_eq!(event.player_name.as_deref(), Some("Alice"));
        assert_eq!(event.target.as_deref(), Some("Agent[BOT]"));
        assert_eq!(event.weapon.as_deref(), Some("railgun"));

        let event = classify("Gameplay: voice | Alice");
        assert_eq!(event.subtype(), Some("voice"));
        assert_eq!(event.target, None);
    }

    #[test]
    fn test_game_state_sub_table() {
        assert_eq!(classify("map_restart").category, EventCategory::System);
        assert_eq!(classify("Round 3 begins").category, EventCategory::System);
        assert_eq!(classify("Background task idle").category, EventCategory::Other);

        let event = classify("Alice captured the blue flag");
        assert_eq!(event.category, EventCategory::Gameplay);
        assert_eq!(event.subtype(), Some("flag"));
        assert_eq!(event.player_name.as_deref(), Some("Alice"));

        let event = classify("Red flag captured");
        assert_eq!(event.category, EventCategory::Gameplay);
        assert_eq!(event.player_name, None);
    }

    #[test]
    fn test_error_and_system() {
        assert_eq!(classify("ERROR: could not load maps/dm7.bsp").category, EventCategory::Error);
        assert_eq!(classify("broadcast: server restarting").category, EventCategory::System);
        assert_eq!(classify("Warmup ends in 10 seconds").category, EventCategory::System);
    }

    #[test]
    fn test_unrecognized_is_other() {
        let event = classify("some random noise 123");
        assert_eq!(event.category, EventCategory::Other);
        assert_eq!(event.player_name, None);
        assert_eq!(event.raw, "some random noise 123");
    }

    #[test]
    fn test_batch_preserves_order() {
        let classifier = LineClassifier::new();
        let lines: Vec<RawLine> = (0..200)
            .map(|i| RawLine::new("Jun 14 15:16:01", format!("ClientConnect: player{}", i)))
            .collect();
        let now = Utc::now();
        let events = classifier.classify_batch(&lines, now);
        assert_eq!(events.len(), 200);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.player_name.as_deref(), Some(format!("player{}", i).as_str()));
        }
    }
}
