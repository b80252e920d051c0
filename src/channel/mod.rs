//! Messaging between the host and the extension's UI surfaces.

pub mod messages;
pub mod native;

use messages::Notification;
use tokio::sync::broadcast;
use tracing::debug;

const NOTIFICATION_CAPACITY: usize = 16;

/// Fire-and-forget broadcast of [Notification]s. Delivery is at most once: nobody listening
/// means the notification is gone.
#[derive(Clone)]
pub struct EventChannel {
    sender: broadcast::Sender<Notification>,
}

impl EventChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self { sender }
    }

    pub fn notify(&self, notification: Notification) {
        if let Err(e) = self.sender.send(notification) {
            debug!("Dropped {:?}, no listeners", e.0);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}
