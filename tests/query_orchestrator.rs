// Tests for the batch query path: windowing, category views, session
// reconstruction, gameplay filtering and cooperative cancellation.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use console_pipeline::log_source::{LogSource, LogSourceError, MemoryLogSource};
use console_pipeline::model::{
    EventCategory, QueryCategory, QueryFilter, RawLine, SessionStatus, TimeRangePreset, TimeWindow,
};
use console_pipeline::query::{QueryError, QueryOrchestrator, QueryOutcome, ViewGate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn june(day: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, h, m, s).unwrap()
}

fn orchestrator(lines: &[&str]) -> QueryOrchestrator {
    let source = Arc::new(MemoryLogSource::from_console_lines(lines.iter().copied()));
    QueryOrchestrator::new(source)
}

async fn completed(
    orchestrator: &QueryOrchestrator,
    filter: QueryFilter,
    now: DateTime<Utc>,
) -> console_pipeline::query::QueryResult {
    let token = CancellationToken::new();
    orchestrator
        .query_at(&filter, &token, now)
        .await
        .expect("query should succeed")
        .into_result()
        .expect("query should complete")
}

/// Source that never answers until the test is over.
struct StalledSource {
    fetches: AtomicUsize,
}

#[async_trait]
impl LogSource for StalledSource {
    async fn fetch(&self, _window: TimeWindow) -> Result<Vec<RawLine>, LogSourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![])
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

#[tokio::test]
async fn test_year_boundary_session_duration() {
    let orchestrator = orchestrator(&[
        "Dec 31 23:59:00 clientconnect: Bob",
        "Jan 01 00:00:05 clientdisconnect: Bob",
    ]);
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 1, 0).unwrap();

    let result = completed(
        &orchestrator,
        QueryFilter::new(TimeRangePreset::OneHour, QueryCategory::Connections),
        now,
    )
    .await;

    assert_eq!(result.events.len(), 2);
    assert_eq!(
        result.events[0].time,
        Some(Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap())
    );
    assert_eq!(result.sessions.len(), 1);
    assert_eq!(result.sessions[0].status, SessionStatus::Disconnected);
    assert_eq!(result.sessions[0].duration_seconds, Some(65));
}

#[tokio::test]
async fn test_window_excludes_older_lines() {
    let orchestrator = orchestrator(&[
        "Jun 10 09:00:00 ClientConnect: Old",
        "Jun 10 11:30:00 ClientConnect: Recent",
    ]);

    let result = completed(
        &orchestrator,
        QueryFilter::new(TimeRangePreset::OneHour, QueryCategory::Connections),
        june(10, 12, 0, 0),
    )
    .await;

    assert_eq!(result.total_lines, 1);
    assert_eq!(result.sessions.len(), 1);
    assert_eq!(result.sessions[0].player_name, "Recent");
    assert!(result.sessions[0].is_open());
}

#[tokio::test]
async fn test_sessions_only_for_connections_view() {
    let lines = [
        "Jun 10 11:00:00 ClientConnect: Bob",
        "Jun 10 11:10:00 Bob killed Carol by MOD_SHOTGUN",
        "Jun 10 11:20:00 ClientDisconnect: Bob",
    ];
    let orchestrator = orchestrator(&lines);
    let now = june(10, 12, 0, 0);

    let all = completed(
        &orchestrator,
        QueryFilter::new(TimeRangePreset::OneDay, QueryCategory::All),
        now,
    )
    .await;
    assert_eq!(all.filtered_count, 3);
    assert!(all.sessions.is_empty());

    let kills = completed(
        &orchestrator,
        QueryFilter::new(TimeRangePreset::OneDay, QueryCategory::Kills),
        now,
    )
    .await;
    assert_eq!(kills.filtered_count, 1);
    assert_eq!(kills.events[0].category, EventCategory::Kill);
    assert_eq!(kills.total_lines, 3);
}

#[tokio::test]
async fn test_player_substring_filter() {
    let orchestrator = orchestrator(&[
        "Jun 10 11:00:00 ClientConnect: Alice",
        "Jun 10 11:00:01 ClientConnect: Bob",
        "Jun 10 11:05:00 ClientDisconnect: Alice",
    ]);

    let result = completed(
        &orchestrator,
        QueryFilter::new(TimeRangePreset::OneDay, QueryCategory::Connections).with_player("ALI"),
        june(10, 12, 0, 0),
    )
    .await;

    assert_eq!(result.filtered_count, 2);
    assert_eq!(result.sessions.len(), 1);
    assert_eq!(result.sessions[0].player_name, "Alice");
    assert_eq!(result.sessions[0].duration_seconds, Some(300));
}

#[tokio::test]
async fn test_gameplay_view_drops_bot_traffic() {
    let orchestrator = orchestrator(&[
        "Jun 10 11:00:00 Gameplay: kill | Agent[BOT] | <world>",
        "Jun 10 11:00:01 Gameplay: kill | Alice | Agent[BOT] | railgun",
        "Jun 10 11:00:02 Gameplay: streak | AutoAdmin | | 5",
        "Jun 10 11:00:03 Gameplay: voice | Agent[BOT]",
    ]);
    let now = june(10, 12, 0, 0);

    let result = completed(
        &orchestrator,
        QueryFilter::new(TimeRangePreset::OneHour, QueryCategory::Gameplay),
        now,
    )
    .await;
    assert_eq!(result.filtered_count, 2);

    let result = completed(
        &orchestrator,
        QueryFilter::new(TimeRangePreset::OneHour, QueryCategory::Gameplay)
            .with_exclude_name("autoadmin"),
        now,
    )
    .await;
    assert_eq!(result.filtered_count, 1);
    assert_eq!(result.events[0].player_name.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn test_chat_never_leaks_into_event_views() {
    let orchestrator = orchestrator(&[
        "Jun 10 11:00:00 say: Alice: I killed Bob lol",
        "Jun 10 11:00:01 sayteam: Bob: ClientConnect: fake",
    ]);
    let now = june(10, 12, 0, 0);

    for category in [
        QueryCategory::All,
        QueryCategory::Connections,
        QueryCategory::Kills,
        QueryCategory::Errors,
        QueryCategory::Gameplay,
    ] {
        let result = completed(&orchestrator, QueryFilter::new(TimeRangePreset::OneHour, category), now).await;
        assert!(result.events.is_empty(), "{:?} leaked chat", category);
    }

    let other = completed(
        &orchestrator,
        QueryFilter::new(TimeRangePreset::OneHour, QueryCategory::Other),
        now,
    )
    .await;
    assert_eq!(other.filtered_count, 2);

    let chat = completed(
        &orchestrator,
        QueryFilter::new(TimeRangePreset::OneHour, QueryCategory::Chat),
        now,
    )
    .await;
    assert!(chat.events.is_empty());
    assert_eq!(chat.chat_messages.len(), 2);
    assert!(chat.chat_messages[1].team_only);
}

#[tokio::test]
async fn test_cancel_before_fetch() {
    let source = Arc::new(StalledSource {
        fetches: AtomicUsize::new(0),
    });
    let orchestrator = QueryOrchestrator::new(source.clone());
    let token = CancellationToken::new();
    token.cancel();

    let outcome = orchestrator
        .query(&QueryFilter::new(TimeRangePreset::OneMonth, QueryCategory::All), &token)
        .await
        .unwrap();

    assert!(outcome.is_cancelled());
    assert!(outcome.into_result().is_none());
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_during_fetch() {
    let source = Arc::new(StalledSource {
        fetches: AtomicUsize::new(0),
    });
    let orchestrator = Arc::new(QueryOrchestrator::new(source.clone()));
    let token = CancellationToken::new();

    let task = {
        let orchestrator = orchestrator.clone();
        let token = token.clone();
        tokio::spawn(async move {
            orchestrator
                .query(&QueryFilter::new(TimeRangePreset::OneMonth, QueryCategory::All), &token)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancellation should end the query promptly")
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, QueryOutcome::Cancelled));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_source_failure_is_an_error() {
    let source = Arc::new(MemoryLogSource::new(vec![]));
    source.set_failure(Some("connection refused".to_string()));
    let orchestrator = QueryOrchestrator::new(source);

    let err = orchestrator
        .query(
            &QueryFilter::new(TimeRangePreset::OneHour, QueryCategory::All),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Source(_)));
}

#[tokio::test]
async fn test_newer_query_supersedes_older_for_same_view() {
    let source = Arc::new(StalledSource {
        fetches: AtomicUsize::new(0),
    });
    let orchestrator = Arc::new(QueryOrchestrator::new(source));
    let gate = Arc::new(ViewGate::new());

    let first = gate.begin("connections-panel");
    let stale = {
        let orchestrator = orchestrator.clone();
        let token = first.token().clone();
        tokio::spawn(async move {
            orchestrator
                .query(&QueryFilter::new(TimeRangePreset::OneWeek, QueryCategory::Connections), &token)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = gate.begin("connections-panel");

    let outcome = tokio::time::timeout(Duration::from_secs(5), stale)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(outcome.is_cancelled());
    assert!(!gate.finish(&first));
    assert!(gate.is_current(&second));
}

#[tokio::test]
async fn test_small_batches_classify_everything() {
    let lines: Vec<String> = (0..57)
        .map(|i| format!("Jun 10 11:{:02}:00 ClientConnect: p{}", i, i))
        .collect();
    let source = Arc::new(MemoryLogSource::from_console_lines(lines.iter().map(String::as_str)));
    let orchestrator = QueryOrchestrator::new(source).with_batch_size(5);

    let result = completed(
        &orchestrator,
        QueryFilter::new(TimeRangePreset::OneDay, QueryCategory::Connections),
        june(10, 12, 0, 0),
    )
    .await;
    assert_eq!(result.filtered_count, 57);
    assert_eq!(result.sessions.len(), 57);
    assert_eq!(result.sessions[56].player_name, "p56");
}

#[tokio::test]
async fn test_excluded_account_hidden_from_every_view() {
    let orchestrator = orchestrator(&[
        "Jun 10 11:00:00 ClientConnect: AutoAdmin",
        "Jun 10 11:00:05 AutoAdmin killed Bob by MOD_RAILGUN",
        "Jun 10 11:00:10 ClientConnect: Alice",
        "Jun 10 11:00:20 say: AutoAdmin: next map in 5",
        "Jun 10 11:00:30 say: Alice: gg",
    ]);
    let now = june(10, 12, 0, 0);
    let hidden = |category| {
        QueryFilter::new(TimeRangePreset::OneHour, category).with_exclude_name("AUTOADMIN")
    };

    let all = completed(&orchestrator, hidden(QueryCategory::All), now).await;
    assert_eq!(all.filtered_count, 1);
    assert_eq!(all.events[0].player_name.as_deref(), Some("Alice"));

    let kills = completed(&orchestrator, hidden(QueryCategory::Kills), now).await;
    assert!(kills.events.is_empty());

    let connections = completed(&orchestrator, hidden(QueryCategory::Connections), now).await;
    assert_eq!(connections.filtered_count, 1);
    assert_eq!(connections.sessions.len(), 1);
    assert_eq!(connections.sessions[0].player_name, "Alice");

    let chat = completed(&orchestrator, hidden(QueryCategory::Chat), now).await;
    assert_eq!(chat.chat_messages.len(), 1);
    assert_eq!(chat.chat_messages[0].player_name, "Alice");
    assert_eq!(chat.total_lines, 5);
}
