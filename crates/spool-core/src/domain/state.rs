//! State - message の論理状態
//!
//! 状態はレコードに保存されません。`visible_at` / `ack_token` /
//! `deleted_at` と現在時刻から導出されます。lease の期限切れも書き込みではなく
//! 導出条件です。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::MessageRecord;

/// MessageState はメッセージの論理状態
///
/// # 状態遷移
/// - add → Waiting（delay 付きなら Delayed → 時間経過で Waiting）
/// - Waiting → claim → Leased
/// - Leased → fail / lease 期限切れ → Waiting
/// - Leased → ack → Completed
/// - Completed → purge で物理削除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Claimable right now.
    Waiting,
    /// Added with a delay that has not elapsed yet; never leased.
    Delayed,
    /// Hidden behind a live lease.
    Leased,
    /// Acknowledged; kept for statistics until purged.
    Completed,
}

impl MessageState {
    pub fn of(record: &MessageRecord, now: DateTime<Utc>) -> Self {
        if record.deleted_at.is_some() {
            MessageState::Completed
        } else if record.visible_at <= now {
            MessageState::Waiting
        } else if record.ack_token.is_some() {
            MessageState::Leased
        } else {
            MessageState::Delayed
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Completed)
    }

    pub fn is_claimable(self) -> bool {
        matches!(self, MessageState::Waiting)
    }
}
