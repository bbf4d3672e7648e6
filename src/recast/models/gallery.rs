use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::session::{Session, SessionKind, SessionStatus};
use super::session_store::SessionStore;

/// Read-only derived view over completed sessions for later selection,
/// re-display, or export.
///
/// A pure projection: nothing here mutates session state except the active
/// pointer, and nothing here ever opens a transport.
pub struct ResultGallery {
    store: Arc<Mutex<SessionStore>>,
}

impl ResultGallery {
    pub fn new(store: Arc<Mutex<SessionStore>>) -> Self {
        Self { store }
    }

    /// Completed chart sessions, de-duplicated by logical request,
    /// most recent first.
    pub fn completed_chart_sessions(&self) -> Vec<Session> {
        self.completed(SessionKind::Chart)
    }

    /// Completed text sessions, de-duplicated by logical request,
    /// most recent first.
    pub fn completed_text_sessions(&self) -> Vec<Session> {
        self.completed(SessionKind::Text)
    }

    /// Point the active pointer at a gallery entry. Never re-runs the
    /// transformation.
    pub fn select(&self, id: &str) -> bool {
        self.store.lock().set_active(id)
    }

    fn completed(&self, kind: SessionKind) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .store
            .lock()
            .list()
            .into_iter()
            .filter(|s| s.kind == kind && s.status == SessionStatus::Complete)
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.created_at));

        let mut seen = HashSet::new();
        sessions.retain(|s| seen.insert(s.request.dedup_key()));
        sessions
    }
}
