/// External console log source
///
/// The raw log store is an opaque collaborator. `LogSource` is the seam the
/// query orchestrator fetches through, so it can be swapped for an in-memory
/// source in tests.
use crate::model::{RawLine, TimeWindow};
use crate::time_normalizer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogSourceError {
    #[error("log source request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("log source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Serialize)]
pub struct LogWindowQuery {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetch raw lines for a window, oldest first.
    async fn fetch(&self, window: TimeWindow) -> Result<Vec<RawLine>, LogSourceError>;

    /// Name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// HTTP source
// ============================================================================

pub struct HttpLogSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLogSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LogSource for HttpLogSource {
    async fn fetch(&self, window: TimeWindow) -> Result<Vec<RawLine>, LogSourceError> {
        let url = format!("{}/console/lines", self.base_url);

        tracing::info!(
            "Fetching console lines from {} for time range {} to {}",
            url,
            window.start,
            window.end
        );

        let query = LogWindowQuery {
            since: window.start,
            until: window.end,
        };

        let lines: Vec<RawLine> = self
            .client
            .get(&url)
            .query(&[
                ("since", query.since.to_rfc3339()),
                ("until", query.until.to_rfc3339()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::info!("✅ Fetched {} console lines", lines.len());
        Ok(lines)
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

// ============================================================================
// In-memory source
// ============================================================================

/// Holds lines in memory and serves the ones whose stamp falls inside the
/// requested window. Lines with malformed stamps are always served so the
/// caller can show them verbatim.
pub struct MemoryLogSource {
    lines: RwLock<Vec<RawLine>>,
    failure: RwLock<Option<String>>,
}

impl MemoryLogSource {
    pub fn new(lines: Vec<RawLine>) -> Self {
        Self {
            lines: RwLock::new(lines),
            failure: RwLock::new(None),
        }
    }

    /// Build from full console lines ("Mon D HH:MM:SS text").
    pub fn from_console_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(lines.into_iter().map(RawLine::from_console_line).collect())
    }

    pub fn push(&self, line: RawLine) {
        if let Ok(mut lines) = self.lines.write() {
            lines.push(line);
        }
    }

    /// Make every subsequent fetch fail with `reason` (or succeed again with `None`).
    pub fn set_failure(&self, reason: Option<String>) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = reason;
        }
    }
}

#[async_trait]
impl LogSource for MemoryLogSource {
    async fn fetch(&self, window: TimeWindow) -> Result<Vec<RawLine>, LogSourceError> {
        if let Some(reason) = self.failure.read().ok().and_then(|f| f.clone()) {
            return Err(LogSourceError::Unavailable(reason));
        }

        let lines = self
            .lines
            .read()
            .map_err(|_| LogSourceError::Unavailable("line store poisoned".to_string()))?;

        Ok(lines
            .iter()
            .filter(|line| match time_normalizer::parse_at(&line.timestamp, window.end) {
                Some(instant) => window.contains(instant),
                None => true,
            })
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
