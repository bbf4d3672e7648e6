use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::recast::config::RecastConfig;
use crate::recast::errors::{ExportError, SubmitError, TransportError};
use crate::recast::exporters::{ExportArtifact, export_chart_artifact};
use crate::recast::models::{
    Channel, ChartResult, Notification, NotificationBus, NotificationPayload, ResultGallery,
    Session, SessionKind, SessionRequest, SessionStatus, SessionStore, Subscription,
};
use crate::recast::services::frame_decoder;
use crate::recast::services::{ChartHttpTransport, TextStreamTransport, Transport, TransportEvent};

/// Drives every session through its lifecycle:
/// `Idle -> Connecting -> Streaming -> Complete | Failed`, plus `Closed` on
/// explicit teardown.
///
/// One tokio task per session opens the matching transport, feeds raw frames
/// through the frame decoder, updates the session store, and publishes
/// notifications. Sessions run concurrently; the store serializes all
/// mutations, so a slow or failed transport never touches an unrelated
/// session.
#[derive(Clone)]
pub struct SessionController {
    store: Arc<Mutex<SessionStore>>,
    bus: NotificationBus,
    chart_transport: Arc<dyn Transport>,
    text_transport: Arc<dyn Transport>,
    /// Cancel flags of in-flight transports, keyed by session id.
    live: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    connect_timeout: Duration,
}

impl SessionController {
    pub fn new(config: RecastConfig) -> Self {
        let chart_transport = Arc::new(ChartHttpTransport::new(config.chart_endpoint.clone()));
        let text_transport = Arc::new(TextStreamTransport::new(
            config.stream_endpoint.clone(),
            config.auth_token.clone(),
        ));
        Self::with_transports(chart_transport, text_transport, config.connect_timeout())
    }

    /// Build a controller over caller-supplied transports (tests, embeds).
    pub fn with_transports(
        chart_transport: Arc<dyn Transport>,
        text_transport: Arc<dyn Transport>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            store: Arc::new(Mutex::new(SessionStore::new())),
            bus: NotificationBus::new(),
            chart_transport,
            text_transport,
            live: Arc::new(Mutex::new(HashMap::new())),
            connect_timeout,
        }
    }

    /// Start a transformation under a freshly minted session id.
    ///
    /// Must be called from within a tokio runtime: the session runs on its
    /// own task.
    pub fn submit(&self, request: SessionRequest) -> Result<String, SubmitError> {
        self.submit_with_id(Uuid::new_v4().to_string(), request)
    }

    /// Start a transformation under a caller-supplied id. Rejects the id if
    /// a session for it is still live.
    pub fn submit_with_id(
        &self,
        id: String,
        request: SessionRequest,
    ) -> Result<String, SubmitError> {
        {
            let mut store = self.store.lock();
            store.create(id.clone(), request.clone())?;
            store.mark_connecting(&id);
        }
        self.publish(Channel::Connecting, &id, NotificationPayload::Connecting);
        debug!(session_id = %id, kind = ?request.kind(), "session submitted");

        let controller = self.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            controller.run_session(task_id, request).await;
        });
        Ok(id)
    }

    /// Explicit consumer teardown (e.g. modal dismissal). Idempotent; a
    /// second call observes the same state as the first. Frames racing past
    /// close are dropped by the store's status guards.
    pub fn close(&self, id: &str) {
        if let Some(cancel) = self.live.lock().remove(id) {
            cancel.store(true, Ordering::Relaxed);
        }
        self.store.lock().close(id);
    }

    /// Shutdown sweep: close every live session.
    pub fn close_all(&self) {
        let ids: Vec<String> = self.live.lock().keys().cloned().collect();
        for id in ids {
            self.close(&id);
        }
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.store.lock().get(id)
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.store.lock().list()
    }

    /// Completed sessions of one kind, de-duplicated, most recent first.
    pub fn list_completed(&self, kind: SessionKind) -> Vec<Session> {
        match kind {
            SessionKind::Chart => self.gallery().completed_chart_sessions(),
            SessionKind::Text => self.gallery().completed_text_sessions(),
        }
    }

    pub fn gallery(&self) -> ResultGallery {
        ResultGallery::new(Arc::clone(&self.store))
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.live.lock().contains_key(id)
    }

    pub fn set_active(&self, id: &str) -> bool {
        self.store.lock().set_active(id)
    }

    pub fn active_id(&self) -> Option<String> {
        self.store.lock().active_id().cloned()
    }

    /// Discard every session. The explicit reset; sessions are never
    /// deleted automatically.
    pub fn clear_all(&self) {
        self.close_all();
        self.store.lock().clear_all();
    }

    pub fn subscribe<F>(&self, channel: Channel, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.bus.subscribe(channel, handler)
    }

    /// Ask consumers to drop locally cached transcript for a session
    /// without touching the store.
    pub fn publish_reset(&self, id: &str) {
        self.publish(Channel::Reset, id, NotificationPayload::Reset);
    }

    /// Read the frozen export payload of a completed chart session. Never
    /// opens a transport.
    pub fn export_chart(&self, id: &str) -> Result<ExportArtifact, ExportError> {
        let session = self
            .store
            .lock()
            .get(id)
            .ok_or_else(|| ExportError::UnknownSession(id.to_string()))?;
        export_chart_artifact(&session)
    }

    async fn run_session(&self, id: String, request: SessionRequest) {
        let transport = match request.kind() {
            SessionKind::Chart => Arc::clone(&self.chart_transport),
            SessionKind::Text => Arc::clone(&self.text_transport),
        };

        // One connecting window covers transport open and the first event.
        let deadline = tokio::time::Instant::now() + self.connect_timeout;

        let mut handle = match tokio::time::timeout_at(deadline, transport.open(&request)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                self.fail_session(&id, &err);
                return;
            }
            Err(_) => {
                self.fail_session(&id, &TransportError::Timeout);
                return;
            }
        };
        self.live.lock().insert(id.clone(), handle.cancel_flag());
        // The consumer may have closed the session while the transport was
        // still opening; that close found no cancel flag to fire, so the
        // status check must come after the flag is registered.
        if self
            .store
            .lock()
            .get(&id)
            .is_some_and(|s| s.status == SessionStatus::Closed)
        {
            handle.close();
            self.live.lock().remove(&id);
            return;
        }

        let mut awaiting_first = true;
        loop {
            let event = if awaiting_first {
                match tokio::time::timeout_at(deadline, handle.next_event()).await {
                    Ok(event) => event,
                    Err(_) => {
                        handle.close();
                        self.fail_session(&id, &TransportError::Timeout);
                        break;
                    }
                }
            } else {
                handle.next_event().await
            };

            match event {
                Some(TransportEvent::Frame(raw)) => {
                    if awaiting_first {
                        self.store.lock().mark_streaming(&id);
                        awaiting_first = false;
                    }
                    let decoded = frame_decoder::decode(&raw);
                    if !decoded.content.is_empty() {
                        self.store.lock().append_text(&id, &decoded.content);
                        self.publish(
                            Channel::Progress,
                            &id,
                            NotificationPayload::Progress {
                                fragment: decoded.content,
                            },
                        );
                    }
                    if decoded.is_final {
                        handle.close();
                        self.complete_text_session(&id);
                        break;
                    }
                }
                Some(TransportEvent::Done(raw_final)) => {
                    if awaiting_first {
                        self.store.lock().mark_streaming(&id);
                    }
                    match request.kind() {
                        SessionKind::Chart => self.complete_chart_session(&id, raw_final),
                        SessionKind::Text => {
                            if let Some(raw) = raw_final {
                                let decoded = frame_decoder::decode(&raw);
                                if !decoded.content.is_empty() {
                                    self.store.lock().append_text(&id, &decoded.content);
                                    self.publish(
                                        Channel::Progress,
                                        &id,
                                        NotificationPayload::Progress {
                                            fragment: decoded.content,
                                        },
                                    );
                                }
                            }
                            self.complete_text_session(&id);
                        }
                    }
                    break;
                }
                Some(TransportEvent::Failed(err)) => {
                    self.fail_session(&id, &err);
                    break;
                }
                None => {
                    // Either the consumer closed the session, or the stream
                    // ended without any terminal signal.
                    let status = self.store.lock().get(&id).map(|s| s.status);
                    if status == Some(SessionStatus::Closed) {
                        debug!(session_id = %id, "session closed by consumer; reader stopping");
                    } else {
                        self.fail_session(
                            &id,
                            &TransportError::TerminalFrameMissing(
                                "stream ended without a terminal frame".to_string(),
                            ),
                        );
                    }
                    break;
                }
            }
        }
        self.live.lock().remove(&id);
    }

    fn complete_text_session(&self, id: &str) {
        let completed = {
            let mut store = self.store.lock();
            let streaming = store
                .get(id)
                .is_some_and(|s| s.status == SessionStatus::Streaming);
            if streaming {
                store.complete_text(id);
            }
            streaming
        };
        if completed {
            self.publish(Channel::Complete, id, NotificationPayload::Complete);
        }
    }

    fn complete_chart_session(&self, id: &str, raw_final: Option<String>) {
        let result = match Self::parse_chart_result(raw_final) {
            Ok(result) => result,
            Err(err) => {
                self.fail_session(id, &TransportError::Open(format!("{err:#}")));
                return;
            }
        };

        let completed = {
            let mut store = self.store.lock();
            let streaming = store
                .get(id)
                .is_some_and(|s| s.status == SessionStatus::Streaming);
            if streaming {
                store.complete_chart(id, result);
            }
            streaming
        };
        if completed {
            self.publish(Channel::Complete, id, NotificationPayload::Complete);
        }
    }

    fn parse_chart_result(raw_final: Option<String>) -> anyhow::Result<ChartResult> {
        let raw = raw_final.context("chart transport finished without a final body")?;
        let result: ChartResult =
            serde_json::from_str(&raw).context("chart response body did not parse")?;
        Ok(result)
    }

    /// Single funnel for every transport- and decode-level failure. The
    /// store records a synthetic inline failure record; unrelated sessions
    /// are untouched. Sessions already closed by the consumer stay closed.
    fn fail_session(&self, id: &str, err: &TransportError) {
        let applied = {
            let mut store = self.store.lock();
            let live = store.get(id).is_some_and(|s| !s.is_terminal());
            if live {
                store.fail(id, &err.to_string());
            } else {
                warn!(session_id = %id, error = %err, "failure after terminal state discarded");
            }
            live
        };
        if applied {
            self.publish(
                Channel::Fail,
                id,
                NotificationPayload::Fail {
                    message: err.to_string(),
                },
            );
        }
    }

    fn publish(&self, channel: Channel, id: &str, payload: NotificationPayload) {
        self.bus.publish(
            channel,
            Notification {
                session_id: id.to_string(),
                payload,
            },
        );
    }
}
