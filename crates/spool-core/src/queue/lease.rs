//! Lease protocol: claim, heartbeat, ack, fail.
//!
//! Every operation is exactly one `find_one_and_update` on the store. The
//! filter is the guard and the update is the transition, so two workers
//! racing for the same record cannot both win.

use std::time::Duration;

use tracing::{debug, warn};

use super::{Queue, deadline};
use crate::domain::{
    AckToken, ClaimedMessage, MessageFilter, MessageId, MessageUpdate, QueueError, Result,
};

/// Upper bound on exhausted messages a single `claim` call will dead-letter
/// before giving up for this round. The next call picks up where it stopped.
pub const MAX_DEAD_LETTER_SWEEP: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Overrides the queue's default visibility for this lease.
    pub visibility: Option<Duration>,
}

impl ClaimOptions {
    pub fn visibility(visibility: Duration) -> Self {
        Self {
            visibility: Some(visibility),
        }
    }
}

impl Queue {
    /// Lease the oldest waiting message. `Ok(None)` means the queue is empty
    /// right now, not an error.
    pub async fn claim(&self) -> Result<Option<ClaimedMessage>> {
        self.claim_with(ClaimOptions::default()).await
    }

    /// Exhausted messages are routed to the dead-letter queue inside this
    /// call; callers never see them.
    pub async fn claim_with(&self, opts: ClaimOptions) -> Result<Option<ClaimedMessage>> {
        let visibility = opts.visibility.unwrap_or(self.visibility);

        for _ in 0..MAX_DEAD_LETTER_SWEEP {
            let Some(message) = self.claim_once(visibility).await? else {
                return Ok(None);
            };

            match &self.dead_letter {
                Some(dead_letter) if dead_letter.is_exhausted(message.tries) => {
                    dead_letter.route(self, &message).await?;
                }
                _ => {
                    debug!(
                        queue = %self.name,
                        id = %message.id,
                        tries = message.tries,
                        "message claimed"
                    );
                    return Ok(Some(message));
                }
            }
        }

        warn!(
            queue = %self.name,
            limit = MAX_DEAD_LETTER_SWEEP,
            "dead-letter sweep limit reached, deferring to next claim"
        );
        Ok(None)
    }

    async fn claim_once(&self, visibility: Duration) -> Result<Option<ClaimedMessage>> {
        let now = self.clock.now();
        let update = MessageUpdate::new()
            .set_ack_token(self.ids.ack_token())
            .inc_tries(1)
            .set_visible_at(deadline(now, visibility)?);

        let record = self
            .store
            .find_one_and_update(MessageFilter::Waiting { now }, update)
            .await?;
        Ok(record.and_then(ClaimedMessage::from_record))
    }

    /// Extend a live lease by the queue's default visibility.
    pub async fn heartbeat(&self, token: &AckToken) -> Result<MessageId> {
        self.heartbeat_with(token, self.visibility).await
    }

    /// Extend a live lease to `now + visibility`. Fails with `UnknownLease`
    /// once the lease has expired, even if nobody reclaimed the message yet.
    pub async fn heartbeat_with(&self, token: &AckToken, visibility: Duration) -> Result<MessageId> {
        let now = self.clock.now();
        let update = MessageUpdate::new().set_visible_at(deadline(now, visibility)?);
        let id = self.update_live_lease(*token, now, update).await?;
        debug!(queue = %self.name, %id, "lease extended");
        Ok(id)
    }

    /// Complete the message. A worker whose lease expired gets `UnknownLease`
    /// here instead of completing work now owned by someone else.
    pub async fn ack(&self, token: &AckToken) -> Result<MessageId> {
        let now = self.clock.now();
        let update = MessageUpdate::new().set_deleted_at(now);
        let id = self.update_live_lease(*token, now, update).await?;
        debug!(queue = %self.name, %id, "message acked");
        Ok(id)
    }

    /// Give the message back immediately. `tries` is left alone; only a
    /// claim counts as a try.
    pub async fn fail(&self, token: &AckToken) -> Result<MessageId> {
        let now = self.clock.now();
        let update = MessageUpdate::new().set_visible_at(now).unset_ack_token();
        let id = self.update_live_lease(*token, now, update).await?;
        debug!(queue = %self.name, %id, "message failed, visible again");
        Ok(id)
    }

    /// Complete a message held under `token` whether or not its lease is
    /// still running. Used by the dead-letter router right after a claim,
    /// where a zero visibility would otherwise make the lease already expired.
    pub(crate) async fn complete_held(&self, token: &AckToken) -> Result<MessageId> {
        let now = self.clock.now();
        let record = self
            .store
            .find_one_and_update(
                MessageFilter::HeldBy { token: *token },
                MessageUpdate::new().set_deleted_at(now),
            )
            .await?;
        record
            .map(|r| r.id)
            .ok_or(QueueError::UnknownLease(*token))
    }

    async fn update_live_lease(
        &self,
        token: AckToken,
        now: chrono::DateTime<chrono::Utc>,
        update: MessageUpdate,
    ) -> Result<MessageId> {
        let record = self
            .store
            .find_one_and_update(MessageFilter::LiveLease { token, now }, update)
            .await?;
        record.map(|r| r.id).ok_or(QueueError::UnknownLease(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryMessageStore;
    use crate::ports::{Clock, FixedClock};
    use crate::queue::testing::{fixture, start_time};
    use chrono::TimeDelta;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn claim_sets_token_tries_and_lease() {
        let (queue, store, _clock) = fixture("builds");
        let id = queue.add(&json!({"image": "a"})).await.unwrap();

        let claimed = queue.claim().await.unwrap().unwrap();

        assert_eq!(claimed.id, id);
        assert_eq!(claimed.tries, 1);
        assert_eq!(claimed.payload, json!({"image": "a"}));

        let record = store.records().await.remove(0);
        assert_eq!(record.ack_token, Some(claimed.ack_token));
        assert_eq!(record.visible_at, start_time() + TimeDelta::seconds(30));
        assert_eq!(queue.in_flight().await.unwrap(), 1);
        assert_eq!(queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn claim_on_empty_queue_is_none() {
        let (queue, _store, _clock) = fixture("builds");
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_are_fifo() {
        let (queue, _store, _clock) = fixture("builds");
        queue.add(&"A").await.unwrap();
        queue.add(&"B").await.unwrap();
        queue.add(&"C").await.unwrap();

        let mut order = Vec::new();
        while let Some(msg) = queue.claim().await.unwrap() {
            order.push(msg.payload);
        }

        assert_eq!(order, vec![json!("A"), json!("B"), json!("C")]);
    }

    #[tokio::test]
    async fn ack_completes_message() {
        let (queue, _store, _clock) = fixture("builds");
        let id = queue.add(&"x").await.unwrap();
        let msg = queue.claim().await.unwrap().unwrap();

        assert_eq!(queue.ack(&msg.ack_token).await.unwrap(), id);

        assert_eq!(queue.done().await.unwrap(), 1);
        assert_eq!(queue.in_flight().await.unwrap(), 0);
        assert!(queue.claim().await.unwrap().is_none());

        // 二重 ack は失敗する
        let err = queue.ack(&msg.ack_token).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownLease(t) if t == msg.ack_token));
    }

    #[tokio::test]
    async fn ack_after_expiry_fails_and_message_is_redelivered() {
        let (queue, _store, _clock) = fixture("builds");
        queue.add(&"x").await.unwrap();

        let first = queue
            .claim_with(ClaimOptions::visibility(Duration::ZERO))
            .await
            .unwrap()
            .unwrap();

        let err = queue.ack(&first.ack_token).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownLease(_)));

        let second = queue.claim().await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_ne!(second.ack_token, first.ack_token);
        assert_eq!(second.tries, first.tries + 1);
    }

    #[tokio::test]
    async fn lease_expiry_is_derived_from_time() {
        let (queue, _store, clock) = fixture("builds");
        queue.add(&"x").await.unwrap();
        let first = queue.claim().await.unwrap().unwrap();

        clock.advance(TimeDelta::seconds(29));
        assert!(queue.claim().await.unwrap().is_none());

        clock.advance(TimeDelta::seconds(1));
        let second = queue.claim().await.unwrap().unwrap();
        assert_eq!(second.id, first.id);

        // 古い token では新しい所有者の仕事を壊せない
        assert!(queue.ack(&first.ack_token).await.is_err());
        assert!(queue.fail(&first.ack_token).await.is_err());
        assert!(queue.heartbeat(&first.ack_token).await.is_err());
        assert_eq!(queue.ack(&second.ack_token).await.unwrap(), second.id);
    }

    #[tokio::test]
    async fn fail_makes_message_visible_immediately() {
        let (queue, store, _clock) = fixture("builds");
        queue.add(&"x").await.unwrap();
        let first = queue.claim().await.unwrap().unwrap();

        queue.fail(&first.ack_token).await.unwrap();

        let record = store.records().await.remove(0);
        assert!(record.ack_token.is_none());
        assert_eq!(record.tries, 1);

        let second = queue.claim().await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.tries, 2);

        // fail 済みの token はもう使えない
        assert!(matches!(
            queue.fail(&first.ack_token).await,
            Err(QueueError::UnknownLease(_))
        ));
    }

    #[tokio::test]
    async fn heartbeat_extends_live_lease() {
        let (queue, store, clock) = fixture("builds");
        queue.add(&"x").await.unwrap();
        let msg = queue.claim().await.unwrap().unwrap();

        clock.advance(TimeDelta::seconds(20));
        queue
            .heartbeat_with(&msg.ack_token, Duration::from_secs(30))
            .await
            .unwrap();

        let record = store.records().await.remove(0);
        assert_eq!(record.visible_at, clock.now() + TimeDelta::seconds(30));

        // 元の期限（30s）を過ぎても lease は生きている
        clock.advance(TimeDelta::seconds(20));
        assert!(queue.claim().await.unwrap().is_none());
        queue.ack(&msg.ack_token).await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_after_expiry_fails() {
        let (queue, _store, clock) = fixture("builds");
        queue.add(&"x").await.unwrap();
        let msg = queue.claim().await.unwrap().unwrap();

        clock.advance(TimeDelta::seconds(31));
        let err = queue.heartbeat(&msg.ack_token).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownLease(_)));
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let (queue, _store, _clock) = fixture("builds");
        queue.add(&"x").await.unwrap();
        queue.claim().await.unwrap().unwrap();

        let forged = AckToken::from_ulid(ulid::Ulid::new());
        assert!(matches!(
            queue.ack(&forged).await,
            Err(QueueError::UnknownLease(t)) if t == forged
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_claims_hand_out_one_lease_per_message() {
        let store = InMemoryMessageStore::new();
        let clock = FixedClock::new(start_time());
        let queue = Arc::new(
            Queue::builder("builds", Arc::new(store))
                .clock(Arc::new(clock))
                .build()
                .unwrap(),
        );
        queue.add_many(&[1, 2, 3, 4, 5]).await.unwrap();

        let mut joins = Vec::new();
        for _ in 0..20 {
            let q = Arc::clone(&queue);
            joins.push(tokio::spawn(async move { q.claim().await.unwrap() }));
        }

        let mut claimed = Vec::new();
        for j in joins {
            if let Some(msg) = j.await.unwrap() {
                claimed.push(msg);
            }
        }

        assert_eq!(claimed.len(), 5);
        let ids: HashSet<_> = claimed.iter().map(|m| m.id).collect();
        let tokens: HashSet<_> = claimed.iter().map(|m| m.ack_token).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(tokens.len(), 5);
    }

    #[tokio::test]
    async fn two_handles_on_one_store_share_leases() {
        let store = InMemoryMessageStore::new();
        let clock = FixedClock::new(start_time());
        let build = || {
            Queue::builder("builds", Arc::new(store.clone()))
                .clock(Arc::new(clock.clone()))
                .build()
                .unwrap()
        };
        let worker_a = build();
        let worker_b = build();

        worker_a.add(&"only").await.unwrap();
        let msg = worker_a.claim().await.unwrap().unwrap();
        assert!(worker_b.claim().await.unwrap().is_none());

        worker_b.ack(&msg.ack_token).await.unwrap();
        assert_eq!(worker_a.done().await.unwrap(), 1);
    }
}
