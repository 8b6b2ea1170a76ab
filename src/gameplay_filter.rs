/// Gameplay event filtering
///
/// Drops bot-only gameplay traffic and events of an operator-excluded
/// account. Combat subtypes keep an event when either side is human; every
/// other subtype looks at the primary actor alone.
use crate::model::{ClassifiedEvent, EventCategory};
use smallvec::SmallVec;
use tracing::debug;

pub const DEFAULT_BOT_MARKER: &str = "[BOT]";
pub const DEFAULT_WORLD_ACTOR: &str = "<world>";

const COMBAT_SUBTYPES: &[&str] = &["kill", "death", "suicide", "teamkill"];

/// Rule deciding whether a player name belongs to a bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotPredicate {
    bot_marker: String,
    world_actor: String,
}

impl Default for BotPredicate {
    fn default() -> Self {
        Self::new(DEFAULT_BOT_MARKER, DEFAULT_WORLD_ACTOR)
    }
}

impl BotPredicate {
    pub fn new(bot_marker: impl Into<String>, world_actor: impl Into<String>) -> Self {
        Self {
            bot_marker: bot_marker.into().to_lowercase(),
            world_actor: world_actor.into().to_lowercase(),
        }
    }

    pub fn is_bot(&self, name: &str) -> bool {
        let lower = name.trim().to_lowercase();
        (!self.bot_marker.is_empty() && lower.contains(&self.bot_marker))
            || lower == self.world_actor
    }

    /// True when the event has a human participant, or no actor at all.
    pub fn involves_human(&self, event: &ClassifiedEvent) -> bool {
        let is_combat = event
            .subtype()
            .map(|subtype| COMBAT_SUBTYPES.contains(&subtype))
            .unwrap_or(false);

        if is_combat {
            let participants: SmallVec<[&str; 2]> = [event.player_name.as_deref(), event.target.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            participants.iter().any(|name| !self.is_bot(name))
        } else {
            match event.player_name.as_deref() {
                Some(actor) => !self.is_bot(actor),
                // Environmental events such as "Red flag captured"
                None => true,
            }
        }
    }
}

/// Case-insensitive exclusion against player names and the raw text.
pub fn is_excluded(event: &ClassifiedEvent, exclude_lower: &str) -> bool {
    event.mentions_player(exclude_lower) || event.raw.to_lowercase().contains(exclude_lower)
}

pub struct GameplayEventFilter {
    bots: BotPredicate,
}

impl GameplayEventFilter {
    pub fn new(bots: BotPredicate) -> Self {
        Self { bots }
    }

    pub fn bots(&self) -> &BotPredicate {
        &self.bots
    }

    /// Keep gameplay events that survive exclusion and involve a human.
    /// Events of other categories are dropped.
    pub fn filter(
        &self,
        events: Vec<ClassifiedEvent>,
        exclude_name: Option<&str>,
    ) -> Vec<ClassifiedEvent> {
        let exclude_lower = exclude_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_lowercase);

        let before = events.len();
        let kept: Vec<ClassifiedEvent> = events
            .into_iter()
            .filter(|event| event.category == EventCategory::Gameplay)
            .filter(|event| match &exclude_lower {
                Some(needle) => !is_excluded(event, needle),
                None => true,
            })
            .filter(|event| self.bots.involves_human(event))
            .collect();

        debug!(
            "Gameplay filter kept {} of {} events",
            kept.len(),
            before
        );
        kept
    }
}

impl Default for GameplayEventFilter {
    fn default() -> Self {
        Self::new(BotPredicate::default())
    }
}
