//! Message record: the single persisted entity of a queue.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ids::{AckToken, MessageId};

/// One document in the message store.
///
/// Design:
/// - This is the "single source of truth" for a message.
/// - State is never stored; see [`super::MessageState::of`].
/// - Every mutation after insert goes through a single atomic
///   `find_one_and_update` on the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,

    /// Opaque caller payload.
    pub payload: serde_json::Value,

    /// Not claimable before this instant. Also the lease expiry while leased.
    pub visible_at: DateTime<Utc>,

    /// Present only while leased.
    pub ack_token: Option<AckToken>,

    /// Number of claims so far.
    pub tries: u32,

    pub created_at: DateTime<Utc>,

    /// Set on ack. The record stays around until purged.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    pub fn new(
        id: MessageId,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
        visible_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            visible_at,
            ack_token: None,
            tries: 0,
            created_at,
            deleted_at: None,
        }
    }
}

/// What a claimer receives. Handing this out does not expose the record itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedMessage {
    pub id: MessageId,
    pub ack_token: AckToken,
    pub payload: serde_json::Value,
    pub tries: u32,
}

impl ClaimedMessage {
    /// Build from a freshly claimed record. `None` if the record carries no token.
    pub fn from_record(record: MessageRecord) -> Option<Self> {
        let ack_token = record.ack_token?;
        Some(Self {
            id: record.id,
            ack_token,
            payload: record.payload,
            tries: record.tries,
        })
    }

    /// Decode the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
