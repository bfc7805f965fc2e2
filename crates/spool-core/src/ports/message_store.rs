//! MessageStore port - message document の正本（source of truth）
//!
//! queue の全状態はこの collection にあり、プロセス間の同期は
//! `find_one_and_update` の原子性だけに依存します（分散ロックは使わない）。

use async_trait::async_trait;

use crate::domain::{MessageFilter, MessageId, MessageRecord, MessageUpdate, StoreResult};

/// A shared document collection of [`MessageRecord`]s.
///
/// # 設計原則
/// - `find_one_and_update` は compare-and-swap として振る舞う: 複数の呼び出しが
///   同じレコードに競合しても、条件に一致して更新できるのは一つだけ
/// - 一致候補が複数あるときは `MessageId` の昇順で最初の一件（FIFO）
/// - 戻り値は更新後のレコード
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Create whatever indexes the backend needs for the queries below.
    /// Idempotent.
    async fn ensure_indexes(&self) -> StoreResult<()>;

    /// Insert all records in one round trip. Returns their ids in input order.
    async fn insert_many(&self, records: Vec<MessageRecord>) -> StoreResult<Vec<MessageId>>;

    /// Atomically update the oldest record matching `filter`.
    async fn find_one_and_update(
        &self,
        filter: MessageFilter,
        update: MessageUpdate,
    ) -> StoreResult<Option<MessageRecord>>;

    async fn count(&self, filter: MessageFilter) -> StoreResult<u64>;

    /// Physically remove every matching record. Returns how many were removed.
    async fn delete_many(&self, filter: MessageFilter) -> StoreResult<u64>;
}
