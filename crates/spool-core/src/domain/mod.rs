//! Domain model (IDs, message record, state, store queries, errors, events).

pub mod errors;
pub mod events;
pub mod ids;
pub mod message;
pub mod query;
pub mod state;

pub use self::errors::{HandlerError, QueueError, Result, StoreError, StoreResult};
pub use self::events::QueueEvent;
pub use self::ids::{AckToken, MessageId};
pub use self::message::{ClaimedMessage, MessageRecord};
pub use self::query::{MessageFilter, MessageUpdate};
pub use self::state::MessageState;
