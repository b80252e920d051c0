use anyhow::Result;
use tokio::{
    io::AsyncWrite,
    select,
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::channel::{
    messages::{Notification, OutboundMessage},
    native::write_message,
};

/// The only writer of the browser pipe. Pending notifications go out before responses; the
/// writer finishes once every response sender is gone.
pub struct MessageWriter<W> {
    output: W,
    replies: mpsc::Receiver<OutboundMessage>,
    notifications: broadcast::Receiver<Notification>,
    shutdown: CancellationToken,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(
        output: W,
        replies: mpsc::Receiver<OutboundMessage>,
        notifications: broadcast::Receiver<Notification>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            output,
            replies,
            notifications,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut listening = true;
        loop {
            let message = select! {
                biased;
                notification = self.notifications.recv(), if listening => match notification {
                    Ok(notification) => OutboundMessage::Notification(notification),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Dropped {skipped} notifications");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        listening = false;
                        continue;
                    }
                },
                reply = self.replies.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };

            debug!("Sending {:?}", message);
            if let Err(e) = write_message(&mut self.output, &message).await {
                error!("Failed to write to browser {e:?}");
                self.shutdown.cancel();
                return Err(e);
            }
        }
        Ok(())
    }
}
