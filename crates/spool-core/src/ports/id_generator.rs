//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use ulid::{Generator, Ulid};

use crate::domain::ids::{AckToken, MessageId};
use crate::ports::Clock;

/// IdGenerator は message ID と ack token を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから使える）
pub trait IdGenerator: Send + Sync {
    /// Message ID を生成。同じ generator から出た ID は単調増加する。
    fn message_id(&self) -> MessageId;

    /// Ack token を生成。claim ごとに新しい乱数ベースの値。
    fn ack_token(&self) -> AckToken;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// message ID は monotonic generator から取るので、同一ミリ秒内や
/// FixedClock の下でも挿入順にソートされます（FIFO の基準）。
pub struct UlidGenerator<C> {
    clock: C,
    monotonic: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            monotonic: Mutex::new(Generator::new()),
        }
    }

    fn timestamp(&self) -> SystemTime {
        SystemTime::from(self.clock.now())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn message_id(&self) -> MessageId {
        let at = self.timestamp();
        let mut generator = self.monotonic.lock().unwrap_or_else(PoisonError::into_inner);
        // Overflow needs 2^80 ids in one millisecond; fall back to a random one.
        let ulid = generator
            .generate_from_datetime(at)
            .unwrap_or_else(|_| Ulid::from_datetime(at));
        MessageId::from(ulid)
    }

    fn ack_token(&self) -> AckToken {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        AckToken::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
