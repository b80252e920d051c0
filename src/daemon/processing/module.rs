use anyhow::Result;

use crate::channel::messages::InboundMessage;

/// Represents an event processor: something that acts on every message coming from the
/// browser and gets a last chance to persist state when the stream ends.
pub trait EventProcessor {
    fn process_next(
        &mut self,
        message: InboundMessage,
    ) -> impl std::future::Future<Output = Result<()>>;

    fn finalize(&mut self) -> impl std::future::Future<Output = Result<()>>;
}
