use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::workflows::candidates::CandidateId;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Candidates listed by one push, in the order they were numbered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushSession {
    pub id: String,
    pub candidate_ids: Vec<CandidateId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SessionState {
    sessions: HashMap<String, PushSession>,
    current_id: Option<String>,
}

/// Sessions by id plus the pointer to the newest one. Only the current session answers replies.
#[derive(Debug)]
pub struct PushSessionStore {
    state: RwLock<SessionState>,
    ttl: chrono::Duration,
}

impl Default for PushSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PushSessionStore {
    pub fn new() -> Self {
        Self::with_ttl(chrono::Duration::hours(24))
    }

    pub fn with_ttl(ttl: chrono::Duration) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            ttl,
        }
    }

    /// Store a session and make it current. Same-second ids get a `_<n>` suffix.
    pub fn create(&self, candidate_ids: Vec<CandidateId>, now: DateTime<Utc>) -> PushSession {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let base = format!("push_{}", now.timestamp());
        let mut id = base.clone();
        let mut suffix = 2;
        while state.sessions.contains_key(&id) {
            id = format!("{base}_{suffix}");
            suffix += 1;
        }

        let session = PushSession {
            id: id.clone(),
            candidate_ids,
            created_at: now,
        };
        state.sessions.insert(id.clone(), session.clone());
        state.current_id = Some(id);

        info!(
            session_id = %session.id,
            candidates = session.candidate_ids.len(),
            "push session created"
        );
        session
    }

    pub fn current(&self) -> Option<PushSession> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let id = state.current_id.as_ref()?;
        state.sessions.get(id).cloned()
    }

    pub fn get(&self, id: &str) -> Option<PushSession> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.sessions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions older than the ttl, clearing the current pointer when it goes too.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let cutoff = now - self.ttl;
        let before = state.sessions.len();
        state.sessions.retain(|_, session| session.created_at >= cutoff);
        let removed = before - state.sessions.len();

        let current_gone = state
            .current_id
            .as_ref()
            .is_some_and(|id| !state.sessions.contains_key(id));
        if current_gone {
            state.current_id = None;
        }

        if removed > 0 {
            info!(removed, remaining = state.sessions.len(), "expired push sessions swept");
        }
        removed
    }

    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + SWEEP_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = self.sweep(Utc::now());
                debug!(removed, "push session sweep ran");
            }
        })
    }
}
