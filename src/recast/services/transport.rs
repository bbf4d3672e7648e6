use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::recast::errors::TransportError;
use crate::recast::models::SessionRequest;

/// One raw unit of transport activity for a session.
#[derive(Debug)]
pub enum TransportEvent {
    /// A raw frame; framing is resolved by the frame decoder.
    Frame(String),
    /// Exactly-one terminal: the transport finished, optionally with a
    /// final raw payload.
    Done(Option<String>),
    /// Exactly-one terminal: the transport failed.
    Failed(TransportError),
}

/// Boxed stream of transport events.
pub type EventStream = BoxStream<'static, TransportEvent>;

/// Live connection for one session: a stream of events plus a cancel flag.
///
/// `close` is idempotent: a no-op after completion, an abort mid-flight. No
/// event is observed after `close` returns because `next_event` stops
/// yielding once the flag is set, and producers check the flag between
/// frames.
pub struct TransportHandle {
    events: EventStream,
    cancel: Arc<AtomicBool>,
}

impl TransportHandle {
    pub fn new(events: EventStream, cancel: Arc<AtomicBool>) -> Self {
        Self { events, cancel }
    }

    /// Next event, or `None` once the stream is exhausted or the handle
    /// was closed.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.cancel.load(Ordering::Relaxed) {
            return None;
        }
        let event = self.events.next().await;
        if self.cancel.load(Ordering::Relaxed) {
            return None;
        }
        event
    }

    pub fn close(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Shared flag for closing the handle from outside the reader task.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

/// A transformation transport: single-shot request/response for charts,
/// duplex streaming for text. Both expose the same lifecycle: open, zero or
/// more frames, exactly one terminal event.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: &SessionRequest) -> Result<TransportHandle, TransportError>;
}
