//! Errors - エラー型と分類
//!
//! - `StoreError`: store adapter が返すインフラエラー（ドメインエラーは返さない）
//! - `QueueError`: queue / processor の公開 API が返すエラー
//! - `HandlerError`: 呼び出し側の handler が返すエラー（processor の外には出ない）

use super::ids::AckToken;

/// Low-level storage errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),
}

/// Error raised by caller-supplied processing logic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self(format!("json decode: {err}"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Misuse at the API boundary. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The token does not name a live lease (expired, acked, or never issued).
    #[error("unknown lease: {0}")]
    UnknownLease(AckToken),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error("processor already started")]
    AlreadyStarted,
}

impl QueueError {
    pub fn invalid(message: impl Into<String>) -> Self {
        QueueError::InvalidArgument(message.into())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
