use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

/// Named channels carried by the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Connecting,
    Progress,
    Complete,
    Fail,
    /// Consumers use this to discard locally cached transcript without
    /// affecting the session store.
    Reset,
}

/// Ephemeral event broadcast on a channel. Notifications are not retained;
/// late subscribers must read current state from the session store.
#[derive(Clone, Debug)]
pub struct Notification {
    pub session_id: String,
    pub payload: NotificationPayload,
}

#[derive(Clone, Debug)]
pub enum NotificationPayload {
    /// Waiting for the first byte.
    Connecting,
    /// A decoded fragment was appended to the session buffer.
    Progress { fragment: String },
    Complete,
    Fail { message: String },
    Reset,
}

type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

struct BusInner {
    next_id: u64,
    handlers: HashMap<Channel, Vec<(u64, Handler)>>,
}

/// Process-wide typed publish/subscribe surface decoupling the lifecycle
/// controller from UI surfaces. Subscribers register independently of
/// session identity and filter by `session_id` themselves.
///
/// Events for a single session are delivered in publish order because the
/// controller publishes synchronously from one task per session; no ordering
/// is promised across different sessions.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<Mutex<BusInner>>,
}

/// Registration handle. Unsubscribes when dropped or via [`Subscription::unsubscribe`].
pub struct Subscription {
    inner: Weak<Mutex<BusInner>>,
    channel: Channel,
    id: u64,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                handlers: HashMap::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, channel: Channel, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .handlers
            .entry(channel)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            channel,
            id,
        }
    }

    pub fn publish(&self, channel: Channel, notification: Notification) {
        // Snapshot handlers so subscriber callbacks run outside the lock
        // and may themselves subscribe/unsubscribe.
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock();
            match inner.handlers.get(&channel) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => Vec::new(),
            }
        };
        debug!(
            channel = ?channel,
            session_id = %notification.session_id,
            subscribers = handlers.len(),
            "publishing notification"
        );
        for handler in handlers {
            handler(&notification);
        }
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.inner
            .lock()
            .handlers
            .get(&channel)
            .map_or(0, Vec::len)
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock();
            if let Some(list) = inner.handlers.get_mut(&self.channel) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
