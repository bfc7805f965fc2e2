//! Events - processor のライフサイクルイベント
//!
//! observer へは fire-and-forget で配送されます（poll loop はブロックしない）。

use super::errors::HandlerError;
use super::message::ClaimedMessage;

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// Handler succeeded and the message was acked.
    Succeeded { message: ClaimedMessage },

    /// Handler failed; the message is visible again and will be redelivered.
    Retrying {
        message: ClaimedMessage,
        error: HandlerError,
    },

    /// Handler failed on the last allowed try; the next claim routes it to
    /// the dead-letter queue.
    Failed {
        message: ClaimedMessage,
        error: HandlerError,
    },
}

impl QueueEvent {
    pub fn message(&self) -> &ClaimedMessage {
        match self {
            QueueEvent::Succeeded { message }
            | QueueEvent::Retrying { message, .. }
            | QueueEvent::Failed { message, .. } => message,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Succeeded { .. } => "succeeded",
            QueueEvent::Retrying { .. } => "retrying",
            QueueEvent::Failed { .. } => "failed",
        }
    }
}
