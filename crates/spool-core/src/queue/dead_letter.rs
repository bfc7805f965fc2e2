//! Dead-letter router: moves poison messages off the primary queue.

use std::sync::Arc;

use tracing::{info, warn};

use super::Queue;
use crate::domain::{ClaimedMessage, MessageId, QueueError, Result};

/// Retry budget plus the queue that receives messages which blow it.
///
/// Once a claim pushes `tries` past `max_retries`, the payload is added to
/// the dead-letter queue and the original is completed on the primary. The
/// add happens first, so a crash in between can duplicate a dead letter but
/// never lose one.
#[derive(Clone)]
pub struct DeadLetter {
    queue: Arc<Queue>,
    max_retries: u32,
}

impl DeadLetter {
    pub fn new(queue: Arc<Queue>, max_retries: u32) -> Self {
        Self { queue, max_retries }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// A claim that produced `tries` must not be delivered.
    pub fn is_exhausted(&self, tries: u32) -> bool {
        tries > self.max_retries
    }

    /// Failing a delivery made at `tries` means the next claim dead-letters it.
    pub fn will_dead_letter(&self, tries: u32) -> bool {
        tries >= self.max_retries
    }

    /// Returns the id of the new dead letter.
    ///
    /// If the primary record was reclaimed by another consumer before it
    /// could be completed here, that consumer now owns it and will route it
    /// as well, so the dead-letter queue can end up holding a duplicate.
    pub(crate) async fn route(&self, from: &Queue, message: &ClaimedMessage) -> Result<MessageId> {
        let dead_id = self.queue.add(&message.payload).await?;
        match from.complete_held(&message.ack_token).await {
            Ok(_) => {
                info!(
                    queue = %from.name(),
                    dead_letter_queue = %self.queue.name(),
                    id = %message.id,
                    %dead_id,
                    tries = message.tries,
                    "message dead-lettered"
                );
            }
            Err(QueueError::UnknownLease(_)) => {
                warn!(
                    queue = %from.name(),
                    dead_letter_queue = %self.queue.name(),
                    id = %message.id,
                    %dead_id,
                    "message reclaimed during dead-lettering, dead letter may be duplicated"
                );
            }
            Err(e) => return Err(e),
        }
        Ok(dead_id)
    }
}
