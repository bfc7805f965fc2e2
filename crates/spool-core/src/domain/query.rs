//! Query - store に渡すフィルタと更新
//!
//! document store の「match-and-update-one」を表現するための plain data です。
//! `matches` / `apply` が意味の基準になり、どの adapter も同じ解釈をします。

use chrono::{DateTime, Utc};

use super::ids::AckToken;
use super::message::MessageRecord;

/// Selects records by logical state at a given instant.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageFilter {
    All,
    /// Not deleted and `visible_at <= now`.
    Waiting { now: DateTime<Utc> },
    /// Not deleted, not yet visible, no lease.
    Delayed { now: DateTime<Utc> },
    /// Not deleted, not yet visible, lease token present.
    Leased { now: DateTime<Utc> },
    /// `deleted_at` set.
    Completed,
    /// The record currently leased under `token`, lease not expired.
    LiveLease { token: AckToken, now: DateTime<Utc> },
    /// The record carrying `token`, expired or not, unless completed.
    HeldBy { token: AckToken },
}

impl MessageFilter {
    pub fn matches(&self, record: &MessageRecord) -> bool {
        let live = record.deleted_at.is_none();
        match self {
            MessageFilter::All => true,
            MessageFilter::Waiting { now } => live && record.visible_at <= *now,
            MessageFilter::Delayed { now } => {
                live && record.visible_at > *now && record.ack_token.is_none()
            }
            MessageFilter::Leased { now } => {
                live && record.visible_at > *now && record.ack_token.is_some()
            }
            MessageFilter::Completed => !live,
            MessageFilter::LiveLease { token, now } => {
                live && record.visible_at > *now && record.ack_token.as_ref() == Some(token)
            }
            MessageFilter::HeldBy { token } => live && record.ack_token.as_ref() == Some(token),
        }
    }
}

/// Field assignments applied atomically to the single matched record.
///
/// `ack_token: Some(None)` unsets the token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub visible_at: Option<DateTime<Utc>>,
    pub ack_token: Option<Option<AckToken>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub inc_tries: u32,
}

impl MessageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_visible_at(mut self, at: DateTime<Utc>) -> Self {
        self.visible_at = Some(at);
        self
    }

    pub fn set_ack_token(mut self, token: AckToken) -> Self {
        self.ack_token = Some(Some(token));
        self
    }

    pub fn unset_ack_token(mut self) -> Self {
        self.ack_token = Some(None);
        self
    }

    pub fn set_deleted_at(mut self, at: DateTime<Utc>) -> Self {
        self.deleted_at = Some(at);
        self
    }

    pub fn inc_tries(mut self, by: u32) -> Self {
        self.inc_tries = self.inc_tries.saturating_add(by);
        self
    }

    pub fn apply(&self, record: &mut MessageRecord) {
        if let Some(at) = self.visible_at {
            record.visible_at = at;
        }
        if let Some(token) = self.ack_token {
            record.ack_token = token;
        }
        if let Some(at) = self.deleted_at {
            record.deleted_at = Some(at);
        }
        record.tries = record.tries.saturating_add(self.inc_tries);
    }
}
