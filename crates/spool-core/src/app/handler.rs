//! Handler - processor が呼び出す処理ロジック
//!
//! - `MessageHandler`: object-safe な trait（`Arc<dyn MessageHandler>` で保持）
//! - クロージャ `Fn(ClaimedMessage) -> Future` はそのまま handler になる
//! - `Typed<T, F>`: payload を `T` に decode してから呼ぶ adapter

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::domain::{ClaimedMessage, HandlerError};

/// Processes one claimed message. `Ok` acks it, `Err` fails it.
///
/// ```ignore
/// struct Thumbnailer;
///
/// #[async_trait]
/// impl MessageHandler for Thumbnailer {
///     async fn handle(&self, message: ClaimedMessage) -> Result<(), HandlerError> {
///         let job: ThumbnailJob = message.decode()?;
///         render(job).await.map_err(|e| HandlerError::new(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: ClaimedMessage) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(ClaimedMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: ClaimedMessage) -> Result<(), HandlerError> {
        (self)(message).await
    }
}

/// Decodes the payload into `T` before calling `f`. A payload that does not
/// decode counts as a handler failure, so it is retried and eventually
/// dead-lettered like any other.
pub struct Typed<T, F> {
    f: F,
    _marker: PhantomData<fn(T)>,
}

pub fn typed<T, F, Fut>(f: F) -> Typed<T, F>
where
    T: DeserializeOwned + Send,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Typed {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> MessageHandler for Typed<T, F>
where
    T: DeserializeOwned + Send,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: ClaimedMessage) -> Result<(), HandlerError> {
        let payload: T = message.decode()?;
        (self.f)(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AckToken, MessageId};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use ulid::Ulid;

    fn claimed(payload: serde_json::Value) -> ClaimedMessage {
        ClaimedMessage {
            id: MessageId::from_ulid(Ulid::new()),
            ack_token: AckToken::from_ulid(Ulid::new()),
            payload,
            tries: 1,
        }
    }

    #[derive(Deserialize)]
    struct Resize {
        width: u32,
    }

    #[tokio::test]
    async fn closure_is_a_handler() {
        let handler: Arc<dyn MessageHandler> = Arc::new(|message: ClaimedMessage| async move {
            if message.payload == json!("bad") {
                Err(HandlerError::new("bad payload"))
            } else {
                Ok(())
            }
        });

        assert!(handler.handle(claimed(json!("good"))).await.is_ok());
        let err = handler.handle(claimed(json!("bad"))).await.unwrap_err();
        assert_eq!(err.message(), "bad payload");
    }

    #[tokio::test]
    async fn typed_decodes_payload() {
        let seen = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&seen);
        let handler = typed(move |job: Resize| {
            let sink = Arc::clone(&sink);
            async move {
                sink.store(job.width, Ordering::SeqCst);
                Ok::<_, HandlerError>(())
            }
        });

        handler.handle(claimed(json!({"width": 640}))).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 640);
    }

    #[tokio::test]
    async fn typed_reports_undecodable_payload_as_failure() {
        let handler = typed(|_job: Resize| async { Ok::<_, HandlerError>(()) });

        let err = handler.handle(claimed(json!({"height": 10}))).await.unwrap_err();
        assert!(err.message().contains("json decode"));
    }
}
