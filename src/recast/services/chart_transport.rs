use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::transport::{Transport, TransportEvent, TransportHandle};
use crate::recast::errors::TransportError;
use crate::recast::models::SessionRequest;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Single-shot request/response adapter for chart generation.
///
/// One POST, one terminal event. A response body lacking `chart_image` is a
/// failure, never an empty completion.
pub struct ChartHttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl ChartHttpTransport {
    pub fn new(endpoint: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }
}

#[async_trait]
impl Transport for ChartHttpTransport {
    async fn open(&self, request: &SessionRequest) -> Result<TransportHandle, TransportError> {
        let SessionRequest::Chart(chart_request) = request else {
            return Err(TransportError::Open(
                "chart transport received a text request".to_string(),
            ));
        };

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let body = serde_json::json!({
            "table_content": chart_request.table_content,
            "source_caption": chart_request.source_caption,
            "user_prompt": chart_request.user_prompt,
            "source_document_reference": chart_request.source_document_reference,
            "page_number": chart_request.page_number,
        });

        let cancel = Arc::new(AtomicBool::new(false));
        let events = async_stream::stream! {
            let response = match client.post(&endpoint).json(&body).send().await {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, "chart request could not be sent");
                    yield TransportEvent::Failed(TransportError::Open(err.to_string()));
                    return;
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    yield TransportEvent::Failed(TransportError::Open(err.to_string()));
                    return;
                }
            };

            if !status.is_success() {
                warn!(status = %status, "chart request rejected upstream");
                yield TransportEvent::Failed(TransportError::Open(format!(
                    "chart request failed with status {status}"
                )));
                return;
            }

            // The result field is mandatory; anything else is an error body.
            let has_image = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("chart_image").and_then(|c| c.as_str()).map(str::to_string))
                .is_some_and(|image| !image.is_empty());
            if !has_image {
                yield TransportEvent::Failed(TransportError::Open(
                    "chart response is missing chart_image".to_string(),
                ));
                return;
            }

            debug!(bytes = text.len(), "chart response received");
            yield TransportEvent::Done(Some(text));
        };

        Ok(TransportHandle::new(Box::pin(events), cancel))
    }
}
