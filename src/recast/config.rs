use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum wait for the first byte of a session, in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Endpoints and limits for the transformation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecastConfig {
    /// POST endpoint for table-to-chart generation.
    pub chart_endpoint: String,
    /// WebSocket endpoint for streaming text transformation.
    pub stream_endpoint: String,
    /// Bearer token sent in the first message of a text stream.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Maximum `connecting` duration before a session fails with a timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl RecastConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for RecastConfig {
    fn default() -> Self {
        Self {
            chart_endpoint: String::new(),
            stream_endpoint: String::new(),
            auth_token: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}
