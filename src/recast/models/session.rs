use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// What kind of transformation a session runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    Text,
    Chart,
}

/// Lifecycle status of a session.
///
/// Legal transitions: `Idle -> Connecting -> Streaming -> Complete | Failed`,
/// plus `Closed` on explicit consumer teardown from any non-terminal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Streaming,
    Complete,
    Failed,
    Closed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Closed)
    }
}

/// Parameters for a streaming text transformation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TextRequest {
    pub text: String,
    pub transformation: String,
}

/// Parameters for a single-shot table-to-chart generation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartRequest {
    pub table_content: String,
    pub source_caption: String,
    pub user_prompt: String,
    pub source_document_reference: String,
    pub page_number: u32,
}

/// The immutable parameters that produced a session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionRequest {
    Text(TextRequest),
    Chart(ChartRequest),
}

impl SessionRequest {
    pub fn kind(&self) -> SessionKind {
        match self {
            Self::Text(_) => SessionKind::Text,
            Self::Chart(_) => SessionKind::Chart,
        }
    }

    /// Stable key identifying the logical request, used by the gallery to
    /// de-duplicate repeated runs of the same transformation.
    pub fn dedup_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frozen result payload of a completed chart session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartResult {
    /// Rendered chart image, base64.
    pub chart_image: String,
    /// Auxiliary export artifact (e.g. spreadsheet), base64.
    pub chart_export: String,
    pub filename: String,
}

/// One tracked transformation request and its accumulated result.
///
/// The session store is the sole writer; consumers only ever see clones.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    /// Ordered accumulation of decoded fragments for text sessions.
    /// Monotonically growing while `Streaming`, immutable once terminal.
    pub buffer: String,
    /// Structured result for chart sessions, populated only on `Complete`.
    pub chart_result: Option<ChartResult>,
    pub request: SessionRequest,
    /// Human-readable failure reason, set only on `Failed`.
    pub failure: Option<String>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Session {
    pub fn new(id: String, request: SessionRequest) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            kind: request.kind(),
            status: SessionStatus::Idle,
            buffer: String::new(),
            chart_result: None,
            request,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
