use std::collections::HashMap;

use tracing::{debug, warn};

use super::session::{ChartResult, Session, SessionRequest, SessionStatus};
use crate::recast::errors::SubmitError;

/// Authoritative store for every session, past or present.
///
/// The store is the sole writer of session state. All mutations are
/// synchronous and guarded by the current status, so late callbacks (a frame
/// arriving after `complete` or `close`) are discarded instead of corrupting
/// a finished session.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    active_session_id: Option<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            active_session_id: None,
        }
    }

    /// Create a session in `Idle`. Rejects an id that is still live;
    /// a terminal id may be recreated (the controller never reuses ids
    /// itself, but callers supplying their own ids may).
    pub fn create(&mut self, id: String, request: SessionRequest) -> Result<(), SubmitError> {
        if let Some(existing) = self.sessions.get(&id) {
            if !existing.is_terminal() {
                return Err(SubmitError::DuplicateSubmission { id });
            }
            debug!(session_id = %id, "recreating session over a terminal predecessor");
        }

        let session = Session::new(id.clone(), request);
        self.sessions.insert(id.clone(), session);

        // First session becomes active by default.
        if self.active_session_id.is_none() {
            self.active_session_id = Some(id);
        }
        Ok(())
    }

    /// `Idle -> Connecting`.
    pub fn mark_connecting(&mut self, id: &str) {
        self.transition(id, SessionStatus::Connecting, &[SessionStatus::Idle]);
    }

    /// `Connecting -> Streaming`. Must happen before any content is applied.
    pub fn mark_streaming(&mut self, id: &str) {
        self.transition(id, SessionStatus::Streaming, &[SessionStatus::Connecting]);
    }

    /// Append a decoded fragment to a text session's buffer.
    /// No-op (logged) unless the session is `Streaming`.
    pub fn append_text(&mut self, id: &str, fragment: &str) {
        let Some(session) = self.sessions.get_mut(id) else {
            warn!(session_id = %id, "append_text for unknown session; dropping fragment");
            return;
        };
        if session.status != SessionStatus::Streaming {
            warn!(
                session_id = %id,
                status = ?session.status,
                "late append_text discarded; session is not streaming"
            );
            return;
        }
        session.buffer.push_str(fragment);
        session.updated_at = std::time::SystemTime::now();
    }

    /// Finalize a text session, freezing its buffer.
    pub fn complete_text(&mut self, id: &str) {
        self.transition(id, SessionStatus::Complete, &[SessionStatus::Streaming]);
    }

    /// Finalize a chart session with its frozen result payload.
    pub fn complete_chart(&mut self, id: &str, result: ChartResult) {
        let Some(session) = self.sessions.get_mut(id) else {
            warn!(session_id = %id, "complete_chart for unknown session");
            return;
        };
        if session.status != SessionStatus::Streaming {
            warn!(
                session_id = %id,
                status = ?session.status,
                "complete_chart discarded; session is not streaming"
            );
            return;
        }
        session.chart_result = Some(result);
        session.status = SessionStatus::Complete;
        session.updated_at = std::time::SystemTime::now();
    }

    /// Fail a session. A synthetic failure record is appended to the buffer
    /// so consumers rendering the transcript show the failure inline rather
    /// than a disappearance.
    pub fn fail(&mut self, id: &str, reason: &str) {
        let Some(session) = self.sessions.get_mut(id) else {
            warn!(session_id = %id, "fail for unknown session");
            return;
        };
        if session.is_terminal() {
            warn!(
                session_id = %id,
                status = ?session.status,
                "late fail discarded; session already terminal"
            );
            return;
        }
        if !session.buffer.is_empty() {
            session.buffer.push('\n');
        }
        session.buffer.push_str(&format!("[failed: {reason}]"));
        session.failure = Some(reason.to_string());
        session.status = SessionStatus::Failed;
        session.updated_at = std::time::SystemTime::now();
    }

    /// Explicit consumer-initiated teardown. Idempotent: closing a session
    /// that is already terminal changes nothing.
    pub fn close(&mut self, id: &str) {
        let Some(session) = self.sessions.get_mut(id) else {
            warn!(session_id = %id, "close for unknown session");
            return;
        };
        if session.is_terminal() {
            debug!(session_id = %id, status = ?session.status, "close on terminal session is a no-op");
            return;
        }
        session.status = SessionStatus::Closed;
        session.updated_at = std::time::SystemTime::now();
    }

    /// Snapshot of a session by id.
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).cloned()
    }

    /// All sessions ordered by creation time.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    /// The N most recently updated sessions.
    pub fn list_recent(&self, limit: usize) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        sessions.truncate(limit);
        sessions
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Point live progress at a session. Never cancels the previously
    /// active session.
    pub fn set_active(&mut self, id: &str) -> bool {
        if self.sessions.contains_key(id) {
            self.active_session_id = Some(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn active_id(&self) -> Option<&String> {
        self.active_session_id.as_ref()
    }

    pub fn clear_active(&mut self) {
        self.active_session_id = None;
    }

    /// Discard every session (explicit reset; sessions are otherwise kept
    /// for the lifetime of the process).
    pub fn clear_all(&mut self) {
        self.sessions.clear();
        self.active_session_id = None;
    }

    fn transition(&mut self, id: &str, next: SessionStatus, allowed_from: &[SessionStatus]) {
        let Some(session) = self.sessions.get_mut(id) else {
            warn!(session_id = %id, next = ?next, "transition for unknown session");
            return;
        };
        if !allowed_from.contains(&session.status) {
            warn!(
                session_id = %id,
                from = ?session.status,
                to = ?next,
                "illegal transition discarded"
            );
            return;
        }
        session.status = next;
        session.updated_at = std::time::SystemTime::now();
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
