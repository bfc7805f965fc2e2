//! Processor - 並列度を制限して queue を処理し続けるループ
//!
//! # フロー
//! 1. 空きスロット（`Semaphore` の permit）がある間 `claim` する
//! 2. claim できたメッセージごとに handler を別タスクで実行
//! 3. 成功なら `ack` → `Succeeded`、失敗なら `fail` → `Retrying` / `Failed`
//! 4. ticker / タスク完了 / shutdown のどれかで起きて 1 に戻る
//!
//! `stop()` は新しい claim をやめ、実行中の handler がすべて終わるまで待ちます。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::events::EventBus;
use super::handler::MessageHandler;
use crate::domain::{ClaimedMessage, HandlerError, QueueError, QueueEvent, Result};
use crate::queue::Queue;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    Stopped,
    Running,
    /// `stop()` was called; no new claims, waiting on in-flight handlers.
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Upper bound on the wait between polls while the queue looks empty.
    pub poll_interval: Duration,

    /// Extend the lease this often while a handler runs. `None` leaves
    /// long-running handlers to call `heartbeat` themselves.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: None,
        }
    }
}

/// Processor handle.
/// - `start()` は一度だけ（二度目は `AlreadyStarted`）
/// - drop すると poll loop は shutdown 扱いになる（実行中の handler は走りきる）
pub struct Processor {
    queue: Arc<Queue>,
    config: ProcessorConfig,
    events: EventBus,
    state: watch::Sender<ProcessorState>,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    poll_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Processor {
    pub fn new(queue: Arc<Queue>) -> Self {
        Self::with_config(queue, ProcessorConfig::default())
    }

    pub fn with_config(queue: Arc<Queue>, config: ProcessorConfig) -> Self {
        let (state, _) = watch::channel(ProcessorState::Stopped);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            config,
            events: EventBus::default(),
            state,
            shutdown_tx,
            started: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            poll_loop: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    /// Handlers currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn on_event<F>(&self, listener: F) -> JoinHandle<()>
    where
        F: Fn(QueueEvent) + Send + 'static,
    {
        self.events.on_event(listener)
    }

    /// Start the poll loop on the current tokio runtime with at most
    /// `parallelism` handlers running at once.
    pub fn start<H>(&self, parallelism: usize, handler: H) -> Result<()>
    where
        H: MessageHandler + 'static,
    {
        if parallelism == 0 {
            return Err(QueueError::invalid("parallelism must be at least 1"));
        }
        if self.config.poll_interval.is_zero() {
            return Err(QueueError::invalid("poll_interval must be non-zero"));
        }
        if self.config.heartbeat_interval.is_some_and(|every| every.is_zero()) {
            return Err(QueueError::invalid("heartbeat_interval must be non-zero"));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyStarted);
        }

        let poll = PollLoop {
            slots: Arc::new(Semaphore::new(parallelism)),
            shutdown_rx: self.shutdown_tx.subscribe(),
            poll_interval: self.config.poll_interval,
            delivery: Delivery {
                queue: Arc::clone(&self.queue),
                handler: Arc::new(handler),
                events: self.events.clone(),
                in_flight: Arc::clone(&self.in_flight),
                heartbeat_interval: self.config.heartbeat_interval,
            },
        };

        self.state.send_replace(ProcessorState::Running);
        let handle = tokio::spawn(poll.run());
        *self.poll_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(queue = %self.queue.name(), parallelism, "processor started");
        Ok(())
    }

    /// Stop claiming and wait for in-flight handlers. No-op unless running.
    /// Concurrent callers all return once the drain has finished.
    pub async fn stop(&self) {
        let handle = self
            .poll_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            // 別の stop() が drain 中なら終わるまで待つ
            let mut state = self.state.subscribe();
            let _ = state.wait_for(|s| *s == ProcessorState::Stopped).await;
            return;
        };

        self.state.send_replace(ProcessorState::Draining);
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = handle.await {
            warn!(queue = %self.queue.name(), error = %e, "poll loop ended abnormally");
        }

        self.state.send_replace(ProcessorState::Stopped);
        info!(queue = %self.queue.name(), "processor stopped");
    }
}

struct PollLoop {
    slots: Arc<Semaphore>,
    shutdown_rx: watch::Receiver<bool>,
    poll_interval: Duration,
    delivery: Delivery,
}

impl PollLoop {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks = JoinSet::new();

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                // Err は sender (Processor) が drop されたとき
                _ = self.shutdown_rx.changed() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(queue = %self.delivery.queue.name(), error = %e, "handler task panicked");
                    }
                }
                _ = ticker.tick() => {}
            }

            self.fill_slots(&mut tasks).await;
        }

        debug!(queue = %self.delivery.queue.name(), pending = tasks.len(), "draining");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(queue = %self.delivery.queue.name(), error = %e, "handler task panicked");
            }
        }
    }

    /// Claim until the slots are full, the queue is empty, or shutdown.
    async fn fill_slots(&self, tasks: &mut JoinSet<()>) {
        loop {
            if *self.shutdown_rx.borrow() {
                return;
            }
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                return;
            };

            let message = match self.delivery.queue.claim().await {
                Ok(Some(message)) => message,
                Ok(None) => return,
                Err(e) => {
                    // 次の tick で再試行する
                    warn!(queue = %self.delivery.queue.name(), error = %e, "claim failed");
                    return;
                }
            };

            let delivery = self.delivery.clone();
            let guard = InFlight::enter(&delivery.in_flight);
            tasks.spawn(async move {
                delivery.run(message, permit, guard).await;
            });
        }
    }
}

/// Everything one handler task needs.
#[derive(Clone)]
struct Delivery {
    queue: Arc<Queue>,
    handler: Arc<dyn MessageHandler>,
    events: EventBus,
    in_flight: Arc<AtomicUsize>,
    heartbeat_interval: Option<Duration>,
}

impl Delivery {
    async fn run(self, message: ClaimedMessage, _permit: OwnedSemaphorePermit, _guard: InFlight) {
        let queue = self.queue.name();
        match self.handle(&message).await {
            Ok(()) => match self.queue.ack(&message.ack_token).await {
                Ok(_) => self.events.emit(QueueEvent::Succeeded { message }),
                Err(QueueError::UnknownLease(_)) => {
                    // lease が切れていた: 他の worker に再配送される
                    warn!(%queue, id = %message.id, "lease lost before ack");
                }
                Err(e) => warn!(%queue, id = %message.id, error = %e, "ack failed"),
            },
            Err(error) => {
                match self.queue.fail(&message.ack_token).await {
                    Ok(_) => {}
                    Err(QueueError::UnknownLease(_)) => {
                        // 再配送は lease 切れに任せる。fail していないのでイベントは出さない
                        warn!(%queue, id = %message.id, %error, "lease lost before fail");
                        return;
                    }
                    Err(e) => {
                        warn!(%queue, id = %message.id, error = %e, "fail report failed");
                        return;
                    }
                }

                let last_try = self
                    .queue
                    .dead_letter()
                    .is_some_and(|dl| dl.will_dead_letter(message.tries));
                debug!(%queue, id = %message.id, tries = message.tries, %error, last_try, "handler failed");
                let event = if last_try {
                    QueueEvent::Failed { message, error }
                } else {
                    QueueEvent::Retrying { message, error }
                };
                self.events.emit(event);
            }
        }
    }

    async fn handle(&self, message: &ClaimedMessage) -> std::result::Result<(), HandlerError> {
        let mut work = self.handler.handle(message.clone());
        let Some(every) = self.heartbeat_interval else {
            return work.await;
        };

        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = ticker.tick() => {
                    if let Err(e) = self.queue.heartbeat(&message.ack_token).await {
                        warn!(queue = %self.queue.name(), id = %message.id, error = %e, "heartbeat failed");
                    }
                }
            }
        }
    }
}

/// Counts a running handler; decrements on drop, panics included.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
