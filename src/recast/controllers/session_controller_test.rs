use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::session_controller::SessionController;
use crate::recast::errors::{SubmitError, TransportError};
use crate::recast::models::{
    Channel, ChartRequest, NotificationPayload, SessionKind, SessionRequest, SessionStatus,
    TextRequest,
};
use crate::recast::services::{Transport, TransportEvent, TransportHandle};

/// Route tracing output through the test harness; `RECAST_LOG` filters it.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_env("RECAST_LOG"))
            .with_test_writer()
            .try_init();
    });
}

/// Transport whose connections are scripted by the test through channels.
/// Each `open` pops the next scripted connection; the test drives frames by
/// sending into the paired sender.
struct ScriptedTransport {
    connections: Mutex<VecDeque<mpsc::UnboundedReceiver<TransportEvent>>>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                connections: Mutex::new(VecDeque::new()),
                opens: Arc::clone(&opens),
            }),
            opens,
        )
    }

    fn script(&self) -> mpsc::UnboundedSender<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().push_back(rx);
        tx
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, _request: &SessionRequest) -> Result<TransportHandle, TransportError> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let mut rx = self
            .connections
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::Open("no scripted connection".to_string()))?;
        let events = async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        };
        Ok(TransportHandle::new(
            Box::pin(events),
            Arc::new(AtomicBool::new(false)),
        ))
    }
}

fn text_request(text: &str) -> SessionRequest {
    SessionRequest::Text(TextRequest {
        text: text.into(),
        transformation: "formal".into(),
    })
}

fn chart_request(prompt: &str) -> SessionRequest {
    SessionRequest::Chart(ChartRequest {
        table_content: "a,b\n1,2".into(),
        source_caption: "Table 1".into(),
        user_prompt: prompt.into(),
        source_document_reference: "report.pdf".into(),
        page_number: 1,
    })
}

fn chart_body() -> String {
    serde_json::json!({
        "chart_image": "aW1hZ2UtYnl0ZXM=",
        "chart_export": "ZXhwb3J0LWJ5dGVz",
        "filename": "chart.xlsx",
    })
    .to_string()
}

fn controller_with(
    chart: Arc<ScriptedTransport>,
    text: Arc<ScriptedTransport>,
) -> SessionController {
    init_tracing();
    SessionController::with_transports(chart, text, Duration::from_secs(5))
}

/// Poll until `condition` holds or a deadline passes.
async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within deadline");
}

async fn wait_for_status(controller: &SessionController, id: &str, status: SessionStatus) {
    wait_until(|| controller.get_session(id).map(|s| s.status) == Some(status.clone())).await;
}

// Scenario A: frames "Hello ", "world", then a terminal frame carrying "!".
#[tokio::test]
async fn test_text_session_accumulates_in_arrival_order() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx = text.script();
    let controller = controller_with(chart, text);

    let id = controller.submit(text_request("hello")).unwrap();
    tx.send(TransportEvent::Frame("Hello ".into())).unwrap();
    tx.send(TransportEvent::Frame("world".into())).unwrap();
    tx.send(TransportEvent::Frame(
        r#"{"content":"!","type":"done"}"#.into(),
    ))
    .unwrap();

    wait_for_status(&controller, &id, SessionStatus::Complete).await;
    let session = controller.get_session(&id).unwrap();
    assert_eq!(session.buffer, "Hello world!");
    assert_eq!(session.kind, SessionKind::Text);
}

// Scenario B: malformed chart body -> failed session, nothing in the gallery.
#[tokio::test]
async fn test_chart_failure_stays_out_of_gallery() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx = chart.script();
    let controller = controller_with(chart, text);

    let id = controller.submit(chart_request("bar chart")).unwrap();
    tx.send(TransportEvent::Failed(TransportError::Open(
        "chart response is missing chart_image".into(),
    )))
    .unwrap();

    wait_for_status(&controller, &id, SessionStatus::Failed).await;
    let session = controller.get_session(&id).unwrap();
    assert!(session.failure.as_deref().unwrap().contains("chart_image"));
    assert!(controller.list_completed(SessionKind::Chart).is_empty());
}

// Scenario C: closing one chart session leaves a concurrent one untouched.
#[tokio::test]
async fn test_close_does_not_disturb_concurrent_session() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx_first = chart.script();
    let tx_second = chart.script();
    let controller = controller_with(chart, text);

    let first = controller.submit(chart_request("bar chart")).unwrap();
    wait_until(|| controller.is_live(&first)).await;
    let second = controller.submit(chart_request("pie chart")).unwrap();
    wait_until(|| controller.is_live(&second)).await;

    controller.close(&first);
    assert_eq!(
        controller.get_session(&first).unwrap().status,
        SessionStatus::Closed
    );

    tx_second
        .send(TransportEvent::Done(Some(chart_body())))
        .unwrap();
    wait_for_status(&controller, &second, SessionStatus::Complete).await;

    // Late events for the closed session are dropped.
    let _ = tx_first.send(TransportEvent::Done(Some(chart_body())));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        controller.get_session(&first).unwrap().status,
        SessionStatus::Closed
    );
    let completed = controller.list_completed(SessionKind::Chart);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, second);
}

// Scenario D: a prefixed JSON frame followed by the bare [DONE] sentinel.
#[tokio::test]
async fn test_prefixed_frame_then_done_sentinel() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx = text.script();
    let controller = controller_with(chart, text);

    let id = controller.submit(text_request("x")).unwrap();
    tx.send(TransportEvent::Frame(
        r#"data: {"content":"x","type":"chunk"}"#.into(),
    ))
    .unwrap();
    tx.send(TransportEvent::Frame("[DONE]".into())).unwrap();

    wait_for_status(&controller, &id, SessionStatus::Complete).await;
    assert_eq!(controller.get_session(&id).unwrap().buffer, "x");
}

#[tokio::test]
async fn test_duplicate_submission_rejected_until_terminal() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx = text.script();
    let _spare = text.script();
    let controller = controller_with(chart, text);

    let id = controller
        .submit_with_id("job-1".into(), text_request("hello"))
        .unwrap();
    let err = controller
        .submit_with_id("job-1".into(), text_request("hello"))
        .unwrap_err();
    assert!(matches!(err, SubmitError::DuplicateSubmission { .. }));

    tx.send(TransportEvent::Frame("[DONE]".into())).unwrap();
    wait_for_status(&controller, &id, SessionStatus::Complete).await;

    // Resubmission after completion mints a distinct session.
    let fresh = controller.submit(text_request("hello")).unwrap();
    assert_ne!(fresh, id);
}

#[tokio::test]
async fn test_connecting_timeout_fails_session() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    // Connection opens but never emits a first byte.
    let _tx = text.script();
    let controller =
        SessionController::with_transports(chart, text, Duration::from_millis(50));

    let id = controller.submit(text_request("slow")).unwrap();
    wait_for_status(&controller, &id, SessionStatus::Failed).await;
    let session = controller.get_session(&id).unwrap();
    assert!(session.buffer.contains("allowed window"));
}

#[tokio::test]
async fn test_abrupt_channel_drop_is_a_failure() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx = text.script();
    let controller = controller_with(chart, text);

    let id = controller.submit(text_request("hello")).unwrap();
    tx.send(TransportEvent::Frame("partial".into())).unwrap();
    wait_until(|| {
        controller
            .get_session(&id)
            .is_some_and(|s| s.buffer == "partial")
    })
    .await;
    // Dropping the sender ends the stream with no terminal frame.
    drop(tx);

    wait_for_status(&controller, &id, SessionStatus::Failed).await;
    let session = controller.get_session(&id).unwrap();
    assert!(session.buffer.starts_with("partial"));
    assert!(session.buffer.contains("[failed:"));
}

#[tokio::test]
async fn test_notifications_follow_lifecycle_order() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx = text.script();
    let controller = controller_with(chart, text);

    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut subscriptions = Vec::new();
    for channel in [
        Channel::Connecting,
        Channel::Progress,
        Channel::Complete,
        Channel::Fail,
    ] {
        let events = Arc::clone(&events);
        subscriptions.push(controller.subscribe(channel, move |n| {
            let label = match &n.payload {
                NotificationPayload::Connecting => "connecting".to_string(),
                NotificationPayload::Progress { fragment } => format!("progress:{fragment}"),
                NotificationPayload::Complete => "complete".to_string(),
                NotificationPayload::Fail { .. } => "fail".to_string(),
                NotificationPayload::Reset => "reset".to_string(),
            };
            events.lock().push(label);
        }));
    }

    let id = controller.submit(text_request("hello")).unwrap();
    tx.send(TransportEvent::Frame("Hi".into())).unwrap();
    tx.send(TransportEvent::Frame("[DONE]".into())).unwrap();
    wait_for_status(&controller, &id, SessionStatus::Complete).await;

    let seen = events.lock().clone();
    assert_eq!(seen, vec!["connecting", "progress:Hi", "complete"]);
}

#[tokio::test]
async fn test_export_reads_frozen_payload_without_transport() {
    let (chart, opens) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx = chart.script();
    let controller = controller_with(chart, text);

    let id = controller.submit(chart_request("bar chart")).unwrap();
    tx.send(TransportEvent::Done(Some(chart_body()))).unwrap();
    wait_for_status(&controller, &id, SessionStatus::Complete).await;

    let opens_before = opens.load(Ordering::Relaxed);
    let artifact = controller.export_chart(&id).unwrap();
    assert_eq!(artifact.filename, "chart.xlsx");
    assert_eq!(artifact.bytes, b"export-bytes");
    assert_eq!(opens.load(Ordering::Relaxed), opens_before);
}

#[tokio::test]
async fn test_close_twice_matches_close_once() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let _tx = text.script();
    let controller = controller_with(chart, text);

    let id = controller.submit(text_request("hello")).unwrap();
    wait_until(|| controller.is_live(&id)).await;
    controller.close(&id);
    let first = controller.get_session(&id).unwrap();
    controller.close(&id);
    let second = controller.get_session(&id).unwrap();
    assert_eq!(first.status, SessionStatus::Closed);
    assert_eq!(second.status, SessionStatus::Closed);
    assert_eq!(first.updated_at, second.updated_at);
}

// A chart body that reaches the controller but fails structured parse (no
// chart_image field) must fail the session, not complete it empty.
#[tokio::test]
async fn test_chart_body_without_image_field_fails_session() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx = chart.script();
    let controller = controller_with(chart, text);

    let id = controller.submit(chart_request("bar chart")).unwrap();
    tx.send(TransportEvent::Done(Some(
        r#"{"filename":"chart.xlsx"}"#.to_string(),
    )))
    .unwrap();

    wait_for_status(&controller, &id, SessionStatus::Failed).await;
    let session = controller.get_session(&id).unwrap();
    assert!(session.failure.as_deref().unwrap().contains("chart_image"));
    assert!(session.chart_result.is_none());
    assert!(controller.list_completed(SessionKind::Chart).is_empty());
}

/// Transport whose `open` blocks until the test releases a gate, exposing
/// the window between session close and transport registration.
struct GatedTransport {
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    cancel: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

#[async_trait]
impl Transport for GatedTransport {
    async fn open(&self, _request: &SessionRequest) -> Result<TransportHandle, TransportError> {
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let cancel = Arc::new(AtomicBool::new(false));
        *self.cancel.lock() = Some(Arc::clone(&cancel));
        Ok(TransportHandle::new(
            Box::pin(futures::stream::pending::<TransportEvent>()),
            cancel,
        ))
    }
}

// Closing a session while its transport is still opening must still abort
// the transport once the open completes.
#[tokio::test]
async fn test_close_during_open_aborts_transport() {
    init_tracing();
    let (chart, _) = ScriptedTransport::new();
    let (gate_tx, gate_rx) = oneshot::channel();
    let cancel_slot: Arc<Mutex<Option<Arc<AtomicBool>>>> = Arc::new(Mutex::new(None));
    let text = Arc::new(GatedTransport {
        gate: Mutex::new(Some(gate_rx)),
        cancel: Arc::clone(&cancel_slot),
    });
    let controller = SessionController::with_transports(chart, text, Duration::from_secs(5));

    let id = controller.submit(text_request("hello")).unwrap();
    controller.close(&id);
    assert_eq!(
        controller.get_session(&id).unwrap().status,
        SessionStatus::Closed
    );

    gate_tx.send(()).unwrap();
    wait_until(|| {
        cancel_slot
            .lock()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    })
    .await;
    wait_until(|| !controller.is_live(&id)).await;
    assert_eq!(
        controller.get_session(&id).unwrap().status,
        SessionStatus::Closed
    );
}

#[tokio::test]
async fn test_reset_reaches_subscribers_without_touching_store() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx = text.script();
    let controller = controller_with(chart, text);

    let resets: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let resets_clone = Arc::clone(&resets);
    let _sub = controller.subscribe(Channel::Reset, move |n| {
        assert!(matches!(n.payload, NotificationPayload::Reset));
        resets_clone.lock().push(n.session_id.clone());
    });

    let id = controller.submit(text_request("hello")).unwrap();
    tx.send(TransportEvent::Frame("Hi".into())).unwrap();
    tx.send(TransportEvent::Frame("[DONE]".into())).unwrap();
    wait_for_status(&controller, &id, SessionStatus::Complete).await;
    let before = controller.get_session(&id).unwrap();

    controller.publish_reset(&id);

    assert_eq!(*resets.lock(), vec![id.clone()]);
    let after = controller.get_session(&id).unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.buffer, before.buffer);
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn test_active_pointer_survives_new_submissions() {
    let (chart, _) = ScriptedTransport::new();
    let (text, _) = ScriptedTransport::new();
    let tx_a = text.script();
    let _tx_b = text.script();
    let controller = controller_with(chart, text);

    let a = controller.submit(text_request("first")).unwrap();
    tx_a.send(TransportEvent::Frame("done".into())).unwrap();
    tx_a.send(TransportEvent::Frame("[DONE]".into())).unwrap();
    wait_for_status(&controller, &a, SessionStatus::Complete).await;

    // A second live session does not steal the pointer; selection moves it
    // without cancelling anything.
    let b = controller.submit(text_request("second")).unwrap();
    assert_eq!(controller.active_id(), Some(a.clone()));
    assert!(controller.set_active(&b));
    assert_eq!(controller.active_id(), Some(b.clone()));
    assert_eq!(
        controller.get_session(&a).unwrap().status,
        SessionStatus::Complete
    );
}
