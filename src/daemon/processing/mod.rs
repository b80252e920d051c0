use anyhow::Result;
use module::EventProcessor;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error};

use crate::channel::messages::InboundMessage;

pub mod dispatcher;
pub mod module;

/// Receives messages from the browser in order and hands each one to the processor. A failing
/// message is logged and dropped; the loop goes on.
pub struct ProcessingModule<Processor> {
    receiver: Receiver<InboundMessage>,
    processor: Processor,
}

impl<P: EventProcessor> ProcessingModule<P> {
    pub fn new(receiver: Receiver<InboundMessage>, processor: P) -> Self {
        Self {
            receiver,
            processor,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.receiver.recv().await {
            debug!("Processing message {:?}", message);
            if let Err(e) = self.processor.process_next(message.clone()).await {
                error!("Error processing message {:?}: {e:?}", message)
            }
        }

        let result = self.processor.finalize().await;
        self.receiver.close();
        result
    }
}
