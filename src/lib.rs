//! Client-side coordinator for streaming AI transformations.
//!
//! `recast` tracks every text-rewrite and table-to-chart request as a
//! session: it opens the matching transport, normalizes the service's
//! heterogeneous wire frames, accumulates partial results, and fans
//! lifecycle notifications out to any number of UI surfaces that never hold
//! references to each other. Completed sessions stay selectable and
//! exportable for the lifetime of the process.

pub mod recast;

pub use recast::SessionController;
pub use recast::config::RecastConfig;
pub use recast::errors::{ExportError, SubmitError, TransportError};
pub use recast::exporters::ExportArtifact;
pub use recast::models::{
    Channel, ChartRequest, ChartResult, Notification, NotificationBus, NotificationPayload,
    ResultGallery, Session, SessionKind, SessionRequest, SessionStatus, SessionStore, Subscription,
    TextRequest,
};
pub use recast::services::{DecodedFrame, Transport, TransportEvent, TransportHandle, decode};
