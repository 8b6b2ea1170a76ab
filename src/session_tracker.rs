/// Connection session reconstruction
///
/// Consumes connection/disconnect events of one query window in ascending
/// time order and rebuilds per-player sessions:
///
///   pending → downloading → joined
///                 └──────→ checksum_error → downloading (retry)
///   (any) → disconnected
///
/// A progress notice that no open session accepts is applied to the newest
/// open session for that name; only a name with nothing open gets a new
/// session.
///
/// Player names are the only key, so concurrent sessions under one name are
/// paired first-in first-out. That is an approximation: two clients sharing a
/// display name cannot be told apart without a per-connection id upstream.
use crate::model::{ClassifiedEvent, ConnectionSession, EventCategory, SessionStatus};
use crate::time_normalizer;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::debug;

/// Progress events that move an open session forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Downloading,
    Joined,
    ChecksumError,
}

impl Progress {
    fn from_subtype(subtype: Option<&str>) -> Option<Self> {
        match subtype {
            Some("download") => Some(Progress::Downloading),
            Some("joined") => Some(Progress::Joined),
            Some("checksum_error") => Some(Progress::ChecksumError),
            _ => None,
        }
    }

    fn status(self) -> SessionStatus {
        match self {
            Progress::Downloading => SessionStatus::Downloading,
            Progress::Joined => SessionStatus::Joined,
            Progress::ChecksumError => SessionStatus::ChecksumError,
        }
    }

    /// Whether a session currently in `status` accepts this transition.
    /// A client rejected on checksum may retry the download.
    fn accepts(self, status: SessionStatus) -> bool {
        match self {
            Progress::Downloading => matches!(
                status,
                SessionStatus::Pending | SessionStatus::Downloading | SessionStatus::ChecksumError
            ),
            Progress::Joined | Progress::ChecksumError => matches!(
                status,
                SessionStatus::Pending | SessionStatus::Downloading
            ),
        }
    }
}

#[derive(Default)]
pub struct SessionTracker {
    sessions: Vec<ConnectionSession>,
    /// Indices into `sessions` of open sessions per name, oldest first
    open: FxHashMap<String, VecDeque<usize>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one atomic pass over a window's events.
    pub fn reconstruct<'a, I>(events: I) -> Vec<ConnectionSession>
    where
        I: IntoIterator<Item = &'a ClassifiedEvent>,
    {
        let mut tracker = Self::new();
        for event in events {
            tracker.observe(event);
        }
        tracker.finish()
    }

    /// Feed one event. Events without a player name or a resolved time are
    /// skipped.
    pub fn observe(&mut self, event: &ClassifiedEvent) {
        let (Some(name), Some(time)) = (event.player_name.as_deref(), event.time) else {
            debug!("Skipping session event without name or time: {}", event.raw);
            return;
        };

        match event.category {
            EventCategory::Connection => self.on_connection(name, time, event),
            EventCategory::Disconnect => self.on_disconnect(name, time),
            _ => {}
        }
    }

    fn on_connection(&mut self, name: &str, time: DateTime<Utc>, event: &ClassifiedEvent) {
        let Some(progress) = Progress::from_subtype(event.subtype()) else {
            let index = self.open_session(name, time, SessionStatus::Pending);
            self.fill_client_details(index, event);
            return;
        };

        let accepting = self.open.get(name).and_then(|queue| {
            queue
                .iter()
                .copied()
                .find(|&index| progress.accepts(self.sessions[index].status))
        });

        let index = match accepting {
            Some(index) => index,
            None if progress == Progress::Joined && self.has_joined_open(name) => {
                // Repeated join notice for a session already in game
                return;
            }
            // Out-of-order notice for a connection already open
            None => match self.newest_open(name) {
                Some(index) => index,
                // Connected before the window started
                None => self.open_session(name, time, SessionStatus::Pending),
            },
        };

        let session = &mut self.sessions[index];
        session.status = progress.status();
        match progress {
            Progress::Downloading => session.download_file = event.detail.clone(),
            Progress::ChecksumError => session.checksum_error = event.detail.clone(),
            Progress::Joined => {}
        }
        self.fill_client_details(index, event);
    }

    fn on_disconnect(&mut self, name: &str, time: DateTime<Utc>) {
        let Some(index) = self.open.get_mut(name).and_then(VecDeque::pop_front) else {
            debug!("Disconnect for {} without an open session in window", name);
            return;
        };
        if self.open.get(name).is_some_and(VecDeque::is_empty) {
            self.open.remove(name);
        }

        let session = &mut self.sessions[index];
        session.disconnect_time = Some(time);
        session.status = SessionStatus::Disconnected;
        session.duration_seconds = time_normalizer::duration(session.connect_time, time);
    }

    fn open_session(&mut self, name: &str, time: DateTime<Utc>, status: SessionStatus) -> usize {
        let index = self.sessions.len();
        self.sessions.push(ConnectionSession {
            player_name: name.to_string(),
            ip: None,
            client_version: None,
            connect_time: time,
            disconnect_time: None,
            status,
            download_file: None,
            checksum_error: None,
            duration_seconds: None,
        });
        self.open.entry(name.to_string()).or_default().push_back(index);
        index
    }

    fn newest_open(&self, name: &str) -> Option<usize> {
        self.open.get(name).and_then(|queue| queue.back().copied())
    }

    fn has_joined_open(&self, name: &str) -> bool {
        self.open.get(name).is_some_and(|queue| {
            queue
                .iter()
                .any(|&index| self.sessions[index].status == SessionStatus::Joined)
        })
    }

    fn fill_client_details(&mut self, index: usize, event: &ClassifiedEvent) {
        let session = &mut self.sessions[index];
        if session.ip.is_none() {
            session.ip = event.ip.clone();
        }
        if session.client_version.is_none() {
            session.client_version = event.client_version.clone();
        }
    }

    /// All sessions touched, in connect order.
    pub fn finish(self) -> Vec<ConnectionSession> {
        self.sessions
    }
}
