//! QueueBuilder - queue の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `max_retries` と `dead_letter_queue` は必ずセットで指定する
//! - 片方だけなら build() が InvalidArgument を返す

use std::sync::Arc;
use std::time::Duration;

use super::{DEFAULT_VISIBILITY, DeadLetter, Queue};
use crate::domain::{QueueError, Result};
use crate::ports::{Clock, IdGenerator, MessageStore, SystemClock, UlidGenerator};

/// # 使用例
/// ```ignore
/// let dead = Arc::new(Queue::builder("deploy-dead", dead_store).build()?);
/// let queue = Queue::builder("deploy", store)
///     .visibility(Duration::from_secs(60))
///     .max_retries(5)
///     .dead_letter_queue(dead)
///     .build()?;
/// ```
pub struct QueueBuilder {
    name: String,
    store: Arc<dyn MessageStore>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    visibility: Duration,
    delay: Duration,
    max_retries: Option<u32>,
    dead_letter_queue: Option<Arc<Queue>>,
}

impl QueueBuilder {
    pub fn new(name: impl Into<String>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            name: name.into(),
            store,
            clock: None,
            ids: None,
            visibility: DEFAULT_VISIBILITY,
            delay: Duration::ZERO,
            max_retries: None,
            dead_letter_queue: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a [`UlidGenerator`] over the queue's clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Default lease length for `claim` and `heartbeat`.
    pub fn visibility(mut self, visibility: Duration) -> Self {
        self.visibility = visibility;
        self
    }

    /// Default initial delay for new messages.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn dead_letter_queue(mut self, queue: Arc<Queue>) -> Self {
        self.dead_letter_queue = Some(queue);
        self
    }

    pub fn build(self) -> Result<Queue> {
        if self.name.is_empty() {
            return Err(QueueError::invalid("queue name must not be empty"));
        }

        let dead_letter = match (self.max_retries, self.dead_letter_queue) {
            (None, None) => None,
            (Some(max_retries), Some(queue)) => Some(DeadLetter::new(queue, max_retries)),
            (Some(_), None) => {
                return Err(QueueError::invalid(format!(
                    "queue '{}': max_retries requires a dead_letter_queue",
                    self.name
                )));
            }
            (None, Some(queue)) => {
                return Err(QueueError::invalid(format!(
                    "queue '{}': dead_letter_queue '{}' given without max_retries",
                    self.name,
                    queue.name()
                )));
            }
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        Ok(Queue {
            name: self.name,
            store: self.store,
            clock,
            ids,
            visibility: self.visibility,
            delay: self.delay,
            dead_letter,
        })
    }
}
