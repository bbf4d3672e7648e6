use thiserror::Error;

/// Transport- and decode-level failures surfaced to the lifecycle controller.
///
/// These never propagate as panics or raw `Err` values to UI collaborators;
/// every variant funnels into a single `fail(id, error)` on the session.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("transport open failed: {0}")]
    Open(String),

    #[error("no terminal frame received within the allowed window")]
    Timeout,

    #[error("channel closed without a completion signal: {0}")]
    TerminalFrameMissing(String),

    #[error("transport send failed: {0}")]
    Send(String),
}

/// Errors returned synchronously from `submit`.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("session '{id}' is still live; duplicate submission rejected")]
    DuplicateSubmission { id: String },
}

/// Errors returned from read-side operations (export, snapshots).
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no session with id '{0}'")]
    UnknownSession(String),

    #[error("session '{0}' is not a completed chart session")]
    NotExportable(String),

    #[error("chart payload is not valid base64: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
}
