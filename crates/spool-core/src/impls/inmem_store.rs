//! InMemoryMessageStore - 開発・テスト用の message store
//!
//! # 実装詳細
//! - BTreeMap<MessageId, MessageRecord> で ID 順（= 挿入順）に保持
//! - tokio::sync::Mutex 一つで全操作を直列化するので、
//!   find_one_and_update は自然に原子的になる
//! - `set_available(false)` で障害を注入できる（StoreUnavailable のテスト用）

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    MessageFilter, MessageId, MessageRecord, MessageUpdate, StoreError, StoreResult,
};
use crate::ports::MessageStore;

/// Clones share the same collection, like two handles on one database.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    records: Arc<Mutex<BTreeMap<MessageId, MessageRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Snapshot of every record, in id order.
    pub async fn records(&self) -> Vec<MessageRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn ensure_indexes(&self) -> StoreResult<()> {
        // BTreeMap の key 順がそのまま index になる
        self.check_available()
    }

    async fn insert_many(&self, records: Vec<MessageRecord>) -> StoreResult<Vec<MessageId>> {
        self.check_available()?;
        let mut map = self.records.lock().await;

        // 一件でも重複があれば何も書かない
        if let Some(dup) = records.iter().find(|r| map.contains_key(&r.id)) {
            return Err(StoreError::DuplicateKey(dup.id.to_string()));
        }

        let ids = records.iter().map(|r| r.id).collect();
        for record in records {
            map.insert(record.id, record);
        }
        Ok(ids)
    }

    async fn find_one_and_update(
        &self,
        filter: MessageFilter,
        update: MessageUpdate,
    ) -> StoreResult<Option<MessageRecord>> {
        self.check_available()?;
        let mut map = self.records.lock().await;

        let Some(record) = map.values_mut().find(|r| filter.matches(r)) else {
            return Ok(None);
        };
        update.apply(record);
        Ok(Some(record.clone()))
    }

    async fn count(&self, filter: MessageFilter) -> StoreResult<u64> {
        self.check_available()?;
        let map = self.records.lock().await;
        Ok(map.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn delete_many(&self, filter: MessageFilter) -> StoreResult<u64> {
        self.check_available()?;
        let mut map = self.records.lock().await;
        let before = map.len();
        map.retain(|_, r| !filter.matches(r));
        Ok((before - map.len()) as u64)
    }
}
