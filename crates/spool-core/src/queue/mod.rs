//! Queue module: producer, lease protocol, dead-letter routing, stats.
//!
//! A [`Queue`] is a handle over one message collection. It holds no message
//! state of its own, so any number of handles (in any number of processes)
//! can work the same collection; the store's atomic update is what keeps
//! them from stepping on each other.

mod builder;
mod dead_letter;
mod lease;
mod producer;
mod stats;

pub use builder::QueueBuilder;
pub use dead_letter::DeadLetter;
pub use lease::{ClaimOptions, MAX_DEAD_LETTER_SWEEP};
pub use producer::AddOptions;
pub use stats::QueueStats;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::{QueueError, Result};
use crate::ports::{Clock, IdGenerator, MessageStore};

/// Default lease length when neither the queue nor the call says otherwise.
pub const DEFAULT_VISIBILITY: Duration = Duration::from_secs(30);

pub struct Queue {
    name: String,
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    visibility: Duration,
    delay: Duration,
    dead_letter: Option<DeadLetter>,
}

impl Queue {
    pub fn builder(name: impl Into<String>, store: Arc<dyn MessageStore>) -> QueueBuilder {
        QueueBuilder::new(name, store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn visibility(&self) -> Duration {
        self.visibility
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn dead_letter(&self) -> Option<&DeadLetter> {
        self.dead_letter.as_ref()
    }

    /// Set up the store's indexes. Call once at startup, before traffic.
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.store.ensure_indexes().await?;
        Ok(())
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("visibility", &self.visibility)
            .field("delay", &self.delay)
            .field(
                "dead_letter",
                &self.dead_letter.as_ref().map(|d| (d.queue().name(), d.max_retries())),
            )
            .finish()
    }
}

/// `now + after`, rejecting durations the timestamp type cannot hold.
pub(crate) fn deadline(now: DateTime<Utc>, after: Duration) -> Result<DateTime<Utc>> {
    TimeDelta::from_std(after)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| QueueError::invalid(format!("duration out of range: {after:?}")))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::impls::InMemoryMessageStore;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    pub(crate) fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    /// A queue over a fresh in-memory store with a hand-driven clock.
    pub(crate) fn fixture(name: &str) -> (Queue, InMemoryMessageStore, FixedClock) {
        let store = InMemoryMessageStore::new();
        let clock = FixedClock::new(start_time());
        let queue = Queue::builder(name, Arc::new(store.clone()))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        (queue, store, clock)
    }
}
