pub mod chart_exporter;

pub use chart_exporter::{ExportArtifact, export_chart_artifact};
