/// Batch query path
///
/// Fetches a preset lookback window from the log source, classifies it, and
/// applies category / player filters plus the session tracker or gameplay
/// filter the category asks for. Cancellation is cooperative: the token is
/// polled before the fetch, raced against the fetch, between classification
/// chunks, and before returning. A cancelled query yields no partial result.
use crate::chat;
use crate::gameplay_filter::{self, BotPredicate, GameplayEventFilter};
use crate::line_classifier::LineClassifier;
use crate::log_source::{LogSource, LogSourceError};
use crate::model::{
    ChatMessage, ClassifiedEvent, ConnectionSession, QueryCategory, QueryFilter, RawLine,
};
use crate::session_tracker::SessionTracker;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_CLASSIFY_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub events: Vec<ClassifiedEvent>,
    /// Only populated for the `connections` view
    pub sessions: Vec<ConnectionSession>,
    /// Only populated for the `chat` view
    pub chat_messages: Vec<ChatMessage>,
    pub total_lines: usize,
    pub filtered_count: usize,
}

#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Completed(QueryResult),
    Cancelled,
}

impl QueryOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryOutcome::Cancelled)
    }

    pub fn into_result(self) -> Option<QueryResult> {
        match self {
            QueryOutcome::Completed(result) => Some(result),
            QueryOutcome::Cancelled => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Source(#[from] LogSourceError),

    #[error("classification worker failed: {0}")]
    Worker(String),
}

pub struct QueryOrchestrator {
    source: Arc<dyn LogSource>,
    classifier: Arc<LineClassifier>,
    gameplay: GameplayEventFilter,
    batch_size: usize,
}

impl QueryOrchestrator {
    pub fn new(source: Arc<dyn LogSource>) -> Self {
        Self {
            source,
            classifier: Arc::new(LineClassifier::new()),
            gameplay: GameplayEventFilter::default(),
            batch_size: DEFAULT_CLASSIFY_BATCH_SIZE,
        }
    }

    pub fn with_bots(mut self, bots: BotPredicate) -> Self {
        self.gameplay = GameplayEventFilter::new(bots);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn classifier(&self) -> Arc<LineClassifier> {
        self.classifier.clone()
    }

    /// Run a query anchored at the current wall clock.
    pub async fn query(
        &self,
        filter: &QueryFilter,
        token: &CancellationToken,
    ) -> Result<QueryOutcome, QueryError> {
        self.query_at(filter, token, Utc::now()).await
    }

    /// Run a query anchored at `now`.
    pub async fn query_at(
        &self,
        filter: &QueryFilter,
        token: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<QueryOutcome, QueryError> {
        let started = Instant::now();

        if token.is_cancelled() {
            debug!("Query cancelled before fetch");
            return Ok(QueryOutcome::Cancelled);
        }

        let window = filter.time_range.window_ending_at(now);
        info!(
            "Querying {:?} view from {} for {} to {}",
            filter.category,
            self.source.name(),
            window.start,
            window.end
        );

        let lines = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Query cancelled during fetch");
                return Ok(QueryOutcome::Cancelled);
            }
            fetched = self.source.fetch(window) => fetched?,
        };

        if token.is_cancelled() {
            return Ok(QueryOutcome::Cancelled);
        }

        let total_lines = lines.len();
        let lines = Arc::new(lines);

        let classified = {
            let classifier = self.classifier.clone();
            let lines = lines.clone();
            let token = token.clone();
            let batch_size = self.batch_size;
            tokio::task::spawn_blocking(move || {
                classify_in_chunks(&classifier, &lines, now, batch_size, &token)
            })
            .await
            .map_err(|e| QueryError::Worker(e.to_string()))?
        };

        let Some(classified) = classified else {
            debug!("Query cancelled during classification");
            return Ok(QueryOutcome::Cancelled);
        };

        let result = self.assemble(filter, classified, &lines, total_lines, now);

        if token.is_cancelled() {
            return Ok(QueryOutcome::Cancelled);
        }

        info!(
            "Query complete: {} lines, {} events, {} sessions in {:?}",
            result.total_lines,
            result.filtered_count,
            result.sessions.len(),
            started.elapsed()
        );
        Ok(QueryOutcome::Completed(result))
    }

    fn assemble(
        &self,
        filter: &QueryFilter,
        classified: Vec<ClassifiedEvent>,
        lines: &[RawLine],
        total_lines: usize,
        now: DateTime<Utc>,
    ) -> QueryResult {
        let needle = filter.player_needle();
        let exclude = filter.exclude_needle();

        let mut events: Vec<ClassifiedEvent> = classified
            .into_iter()
            .filter(|event| filter.category.admits(event.category))
            .filter(|event| match needle.as_deref() {
                Some(needle) => event.mentions_player(needle),
                None => true,
            })
            .filter(|event| match exclude.as_deref() {
                Some(exclude) => !gameplay_filter::is_excluded(event, exclude),
                None => true,
            })
            .collect();

        let mut sessions = Vec::new();
        let mut chat_messages = Vec::new();

        match filter.category {
            QueryCategory::Connections => {
                let mut ordered: Vec<&ClassifiedEvent> =
                    events.iter().filter(|event| event.time.is_some()).collect();
                ordered.sort_by_key(|event| event.time);
                sessions = SessionTracker::reconstruct(ordered);
            }
            QueryCategory::Gameplay => {
                events = self.gameplay.filter(events, filter.exclude_name.as_deref());
            }
            QueryCategory::Chat => {
                chat_messages = chat::collect_chat(lines, now, needle.as_deref(), exclude.as_deref());
            }
            _ => {}
        }

        QueryResult {
            filtered_count: events.len(),
            events,
            sessions,
            chat_messages,
            total_lines,
        }
    }
}

/// Classify `lines` chunk by chunk, returning `None` once `token` fires.
fn classify_in_chunks(
    classifier: &LineClassifier,
    lines: &[RawLine],
    now: DateTime<Utc>,
    batch_size: usize,
    token: &CancellationToken,
) -> Option<Vec<ClassifiedEvent>> {
    let mut events = Vec::with_capacity(lines.len());
    for chunk in lines.chunks(batch_size.max(1)) {
        if token.is_cancelled() {
            return None;
        }
        events.extend(classifier.classify_batch(chunk, now));
    }
    Some(events)
}

// ============================================================================
// Last-request-wins gate
// ============================================================================

/// Handle for one in-flight query of a logical view.
#[derive(Debug, Clone)]
pub struct QueryTicket {
    view: String,
    generation: u64,
    token: CancellationToken,
}

impl QueryTicket {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Tracks the newest query per logical view. Starting a query cancels the
/// older in-flight one for the same view; stale results are discarded by
/// checking the ticket on arrival.
#[derive(Default)]
pub struct ViewGate {
    inflight: Mutex<FxHashMap<String, (u64, CancellationToken)>>,
    next_generation: AtomicU64,
}

impl ViewGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, view: &str) -> QueryTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((previous, previous_token)) =
            inflight.insert(view.to_string(), (generation, token.clone()))
        {
            debug!(
                "View {} superseded: generation {} replaces {}",
                view, generation, previous
            );
            previous_token.cancel();
        }

        QueryTicket {
            view: view.to_string(),
            generation,
            token,
        }
    }

    pub fn is_current(&self, ticket: &QueryTicket) -> bool {
        let inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        inflight
            .get(&ticket.view)
            .is_some_and(|(generation, _)| *generation == ticket.generation)
    }

    /// Release the ticket. Returns whether it was still the newest for its
    /// view, i.e. whether its result should be surfaced.
    pub fn finish(&self, ticket: &QueryTicket) -> bool {
        let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        let current = inflight
            .get(&ticket.view)
            .is_some_and(|(generation, _)| *generation == ticket.generation);
        if current {
            inflight.remove(&ticket.view);
        } else {
            warn!(
                "Discarding stale result for view {} (generation {})",
                ticket.view, ticket.generation
            );
        }
        current
    }
}
