use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::recast::errors::ExportError;
use crate::recast::models::{Session, SessionStatus};

/// Decoded export artifact of a completed chart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Decode the frozen `chart_export` payload of a completed chart session.
///
/// Reads only the session snapshot; exporting never opens a transport or
/// re-runs the transformation.
pub fn export_chart_artifact(session: &Session) -> Result<ExportArtifact, ExportError> {
    if session.status != SessionStatus::Complete {
        return Err(ExportError::NotExportable(session.id.clone()));
    }
    let Some(result) = session.chart_result.as_ref() else {
        return Err(ExportError::NotExportable(session.id.clone()));
    };

    let bytes = STANDARD.decode(&result.chart_export)?;
    debug!(
        session_id = %session.id,
        filename = %result.filename,
        bytes = bytes.len(),
        "chart artifact decoded"
    );
    Ok(ExportArtifact {
        filename: result.filename.clone(),
        bytes,
    })
}
