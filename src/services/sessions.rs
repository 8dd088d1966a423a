//! Session manager: one live multi-step flow per user.
//!
//! Sessions sit in a keyed map behind an async lock; they are created on
//! flow-start, advanced through validated transitions, and removed when a
//! terminal state is reached. Expiry is lazy: an abandoned session is
//! discarded the next time anything touches it.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::{is_legal_transition, FlowCategory, FlowState, Session};

pub struct SessionManager {
    sessions: RwLock<HashMap<(i64, FlowCategory), Session>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn expired(&self, session: &Session) -> bool {
        let age = Utc::now().signed_duration_since(session.touched_at);
        age.to_std().map(|a| a >= self.ttl).unwrap_or(false)
    }

    /// Open a new session. Rejected with `flow_in_progress` while any live
    /// session exists for the user, whatever its category.
    pub async fn begin(
        &self,
        user_id: i64,
        chat_id: i64,
        category: FlowCategory,
        state: FlowState,
    ) -> AppResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|(uid, _), s| !(*uid == user_id && self.expired(s)));

        if sessions.keys().any(|(uid, _)| *uid == user_id) {
            return Err(AppError::FlowInProgress);
        }

        tracing::debug!(user_id, %category, state = %state, "flow started");
        sessions.insert((user_id, category), Session::new(user_id, chat_id, category, state));
        Ok(())
    }

    /// Snapshot of the user's open session, if any live one exists.
    pub async fn current(&self, user_id: i64) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let key = sessions
            .iter()
            .find(|((uid, _), _)| *uid == user_id)
            .map(|(k, _)| *k)?;

        if self.expired(&sessions[&key]) {
            tracing::debug!(user_id, category = %key.1, "expired session discarded");
            sessions.remove(&key);
            return None;
        }
        Some(sessions[&key].clone())
    }

    /// Advance the user's session to `next`, validating the edge. Terminal
    /// states remove the session from the map.
    pub async fn transition(&self, user_id: i64, next: FlowState) -> AppResult<()> {
        let mut sessions = self.sessions.write().await;
        let key = sessions
            .iter()
            .find(|((uid, _), _)| *uid == user_id)
            .map(|(k, _)| *k)
            .ok_or(AppError::NoActiveFlow)?;

        let current = &sessions[&key].state;
        if !is_legal_transition(current, &next) {
            return Err(AppError::Internal(anyhow!(
                "illegal flow transition {} -> {} for user {}",
                current,
                next,
                user_id
            )));
        }

        tracing::debug!(user_id, category = %key.1, from = %current, to = %next, "flow transition");
        if next.is_terminal() {
            sessions.remove(&key);
        } else if let Some(session) = sessions.get_mut(&key) {
            session.state = next;
            session.touched_at = Utc::now();
        }
        Ok(())
    }

    /// In-place update of the current state's data without leaving the
    /// station (e.g. a payment upgrading an open create flow). Returns
    /// whether a live session was found.
    pub async fn mutate_state(&self, user_id: i64, f: impl FnOnce(&mut FlowState)) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.values_mut().find(|s| s.user_id == user_id) {
            Some(session) => {
                f(&mut session.state);
                session.touched_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Refresh the touch time without changing state (reprompts).
    pub async fn touch(&self, user_id: i64) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions
            .values_mut()
            .find(|s| s.user_id == user_id)
        {
            session.touched_at = Utc::now();
        }
    }

    /// User-issued cancel: drops the session outright. Safe because no
    /// platform-visible effect happens before the committing state.
    pub async fn cancel(&self, user_id: i64) -> bool {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|(uid, _), _| *uid != user_id);
        before != sessions.len()
    }

    pub async fn open_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
