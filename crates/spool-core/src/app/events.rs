//! EventBus - `QueueEvent` の配送
//!
//! broadcast channel の薄いラッパーです。送信は待たないので、遅い observer が
//! poll loop を止めることはありません（追いつけない observer はイベントを取りこぼす）。

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::domain::QueueEvent;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire and forget. No subscribers is not an error.
    pub fn emit(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Run `listener` on its own task for every event. The task ends once
    /// every sender is gone.
    pub fn on_event<F>(&self, listener: F) -> JoinHandle<()>
    where
        F: Fn(QueueEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => listener(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AckToken, ClaimedMessage, MessageId};
    use std::sync::{Arc, Mutex};
    use ulid::Ulid;

    fn succeeded() -> QueueEvent {
        QueueEvent::Succeeded {
            message: ClaimedMessage {
                id: MessageId::from_ulid(Ulid::new()),
                ack_token: AckToken::from_ulid(Ulid::new()),
                payload: serde_json::json!(1),
                tries: 1,
            },
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        EventBus::default().emit(succeeded());
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let event = succeeded();

        bus.emit(event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn listener_runs_until_bus_dropped() {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = bus.on_event(move |event| sink.lock().unwrap().push(event.name()));

        bus.emit(succeeded());
        bus.emit(succeeded());
        drop(bus);
        listener.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["succeeded", "succeeded"]);
    }
}
