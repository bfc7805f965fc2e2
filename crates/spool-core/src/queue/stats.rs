//! Stats and housekeeping.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::Queue;
use crate::domain::{MessageFilter, Result};

/// Point-in-time counts. With one `now` for all buckets,
/// `waiting + in_flight + delayed + done == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub waiting: u64,
    pub in_flight: u64,
    pub delayed: u64,
    pub done: u64,
}

impl Queue {
    pub async fn total(&self) -> Result<u64> {
        Ok(self.store.count(MessageFilter::All).await?)
    }

    /// Messages claimable right now.
    pub async fn size(&self) -> Result<u64> {
        let now = self.clock.now();
        Ok(self.store.count(MessageFilter::Waiting { now }).await?)
    }

    /// Messages behind a lease that has not expired.
    pub async fn in_flight(&self) -> Result<u64> {
        let now = self.clock.now();
        Ok(self.store.count(MessageFilter::Leased { now }).await?)
    }

    /// Messages added with a delay that has not elapsed.
    pub async fn delayed(&self) -> Result<u64> {
        let now = self.clock.now();
        Ok(self.store.count(MessageFilter::Delayed { now }).await?)
    }

    pub async fn done(&self) -> Result<u64> {
        Ok(self.store.count(MessageFilter::Completed).await?)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let now = self.clock.now();
        Ok(QueueStats {
            total: self.store.count(MessageFilter::All).await?,
            waiting: self.store.count(MessageFilter::Waiting { now }).await?,
            in_flight: self.store.count(MessageFilter::Leased { now }).await?,
            delayed: self.store.count(MessageFilter::Delayed { now }).await?,
            done: self.store.count(MessageFilter::Completed).await?,
        })
    }

    /// Physically remove completed messages. Never touches anything else, so
    /// it is safe to run alongside producers and workers.
    pub async fn purge(&self) -> Result<u64> {
        let removed = self.store.delete_many(MessageFilter::Completed).await?;
        if removed > 0 {
            info!(queue = %self.name, removed, "completed messages purged");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::AddOptions;
    use crate::queue::testing::fixture;
    use std::time::Duration;

    #[tokio::test]
    async fn counts_follow_lifecycle() {
        let (queue, _store, _clock) = fixture("builds");
        queue.add_many(&["a", "b", "c", "d"]).await.unwrap();
        queue
            .add_with(&"later", AddOptions::delayed(Duration::from_secs(60)))
            .await
            .unwrap();

        let a = queue.claim().await.unwrap().unwrap();
        let _b = queue.claim().await.unwrap().unwrap();
        queue.ack(&a.ack_token).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                total: 5,
                waiting: 2,
                in_flight: 1,
                delayed: 1,
                done: 1,
            }
        );
        assert_eq!(
            stats.waiting + stats.in_flight + stats.delayed + stats.done,
            stats.total
        );

        assert_eq!(queue.total().await.unwrap(), 5);
        assert_eq!(queue.size().await.unwrap(), 2);
        assert_eq!(queue.in_flight().await.unwrap(), 1);
        assert_eq!(queue.delayed().await.unwrap(), 1);
        assert_eq!(queue.done().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn purge_is_idempotent_and_spares_live_messages() {
        let (queue, _store, _clock) = fixture("builds");
        queue.add_many(&["a", "b", "c"]).await.unwrap();

        let a = queue.claim().await.unwrap().unwrap();
        queue.ack(&a.ack_token).await.unwrap();
        let _b = queue.claim().await.unwrap().unwrap();

        assert_eq!(queue.purge().await.unwrap(), 1);
        assert_eq!(queue.purge().await.unwrap(), 0);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.done, 0);
    }
}
