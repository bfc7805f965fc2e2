//! Producer: enqueue one or many messages, optionally delayed.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::{Queue, deadline};
use crate::domain::{MessageId, MessageRecord, QueueError, Result, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Overrides the queue's default delay.
    pub delay: Option<Duration>,
}

impl AddOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

impl Queue {
    pub async fn add<T: Serialize + ?Sized>(&self, payload: &T) -> Result<MessageId> {
        self.add_with(payload, AddOptions::default()).await
    }

    pub async fn add_with<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        opts: AddOptions,
    ) -> Result<MessageId> {
        let ids = self.insert(vec![encode(payload)?], opts).await?;
        ids.into_iter().next().ok_or_else(|| {
            QueueError::StoreUnavailable(StoreError::Unavailable(
                "insert returned no id".to_string(),
            ))
        })
    }

    /// Enqueue a batch in one store round trip. An empty batch is rejected
    /// and nothing is written.
    pub async fn add_many<T: Serialize>(&self, payloads: &[T]) -> Result<Vec<MessageId>> {
        self.add_many_with(payloads, AddOptions::default()).await
    }

    pub async fn add_many_with<T: Serialize>(
        &self,
        payloads: &[T],
        opts: AddOptions,
    ) -> Result<Vec<MessageId>> {
        if payloads.is_empty() {
            return Err(QueueError::invalid("batch must not be empty"));
        }
        let values = payloads.iter().map(encode).collect::<Result<Vec<_>>>()?;
        self.insert(values, opts).await
    }

    async fn insert(&self, values: Vec<serde_json::Value>, opts: AddOptions) -> Result<Vec<MessageId>> {
        let now = self.clock.now();
        let visible_at = deadline(now, opts.delay.unwrap_or(self.delay))?;

        let records = values
            .into_iter()
            .map(|payload| MessageRecord::new(self.ids.message_id(), payload, now, visible_at))
            .collect::<Vec<_>>();

        let ids = self.store.insert_many(records).await?;
        debug!(queue = %self.name, count = ids.len(), %visible_at, "messages added");
        Ok(ids)
    }
}

fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<serde_json::Value> {
    serde_json::to_value(payload)
        .map_err(|e| QueueError::invalid(format!("payload is not serializable: {e}")))
}
