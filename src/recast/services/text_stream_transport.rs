use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::transport::{Transport, TransportEvent, TransportHandle};
use crate::recast::errors::TransportError;
use crate::recast::models::SessionRequest;

/// Duplex streaming adapter for text transformation.
///
/// Opens a WebSocket, sends the transformation request as the first message,
/// then forwards every inbound text message as a raw frame. A clean close is
/// a terminal signal (the frame decoder handles the other two: completion
/// `type` and the `[DONE]` sentinel); an abrupt drop before any terminal
/// signal fails the session.
pub struct TextStreamTransport {
    endpoint: String,
    auth_token: Option<String>,
}

impl TextStreamTransport {
    pub fn new(endpoint: String, auth_token: Option<String>) -> Self {
        Self {
            endpoint,
            auth_token,
        }
    }
}

#[async_trait]
impl Transport for TextStreamTransport {
    async fn open(&self, request: &SessionRequest) -> Result<TransportHandle, TransportError> {
        let SessionRequest::Text(text_request) = request else {
            return Err(TransportError::Open(
                "text stream transport received a chart request".to_string(),
            ));
        };

        let (socket, _response) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|err| TransportError::Open(err.to_string()))?;
        let (mut sink, mut source) = socket.split();

        let first_message = serde_json::json!({
            "text": text_request.text,
            "transformation": text_request.transformation,
            "auth_token": self.auth_token,
        });
        sink.send(Message::text(first_message.to_string()))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))?;
        debug!(endpoint = %self.endpoint, "text stream opened");

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_in_stream = Arc::clone(&cancel);
        let events = async_stream::stream! {
            loop {
                if cancel_in_stream.load(Ordering::Relaxed) {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        yield TransportEvent::Frame(text.as_str().to_owned());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        // Clean close counts as a terminal signal.
                        yield TransportEvent::Done(None);
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong/binary carry no transformation content.
                        continue;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "text stream dropped mid-flight");
                        yield TransportEvent::Failed(TransportError::TerminalFrameMissing(
                            err.to_string(),
                        ));
                        return;
                    }
                }
            }
        };

        Ok(TransportHandle::new(Box::pin(events), cancel))
    }
}
