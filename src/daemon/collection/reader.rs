use anyhow::Result;
use tokio::{io::AsyncRead, select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{messages::InboundMessage, native::read_frame};

/// Reads framed messages from the browser and passes them on. The browser closing the pipe
/// is the normal way for the host to end, so end of input cancels `shutdown`.
pub struct MessageReader<R> {
    input: R,
    next: mpsc::Sender<InboundMessage>,
    shutdown: CancellationToken,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(input: R, next: mpsc::Sender<InboundMessage>, shutdown: CancellationToken) -> Self {
        Self {
            input,
            next,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let result = self.read_loop().await;
        // Dropping the sender lets the processing module drain and finish.
        self.shutdown.cancel();
        result
    }

    async fn read_loop(&mut self) -> Result<()> {
        loop {
            let frame = select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                frame = read_frame(&mut self.input) => frame,
            };

            let Some(frame) = frame.inspect_err(|e| error!("Failed to read from browser {e:?}"))?
            else {
                info!("Browser closed the connection");
                return Ok(());
            };

            match serde_json::from_slice::<InboundMessage>(&frame) {
                Ok(message) => {
                    debug!("Received {:?}", message);
                    self.next.send(message).await?;
                }
                Err(e) => warn!(
                    "Ignoring malformed message {}: {e}",
                    String::from_utf8_lossy(&frame)
                ),
            }
        }
    }
}
