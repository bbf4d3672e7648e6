pub mod gallery;
pub mod notification_bus;
pub mod session;
pub mod session_store;

pub use gallery::ResultGallery;
pub use notification_bus::{Channel, Notification, NotificationBus, NotificationPayload, Subscription};
pub use session::{
    ChartRequest, ChartResult, Session, SessionKind, SessionRequest, SessionStatus, TextRequest,
};
pub use session_store::SessionStore;
