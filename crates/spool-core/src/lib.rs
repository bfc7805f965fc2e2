//! spool-core
//!
//! At-least-once work queue over a document store. Delivery safety between
//! any number of consumers comes from one primitive: the store's atomic
//! "find one matching document and update it".
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message, state, query, errors, events）
//! - **ports**: 抽象化レイヤー（MessageStore, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryMessageStore）
//! - **queue**: producer / lease protocol / dead-letter / stats
//! - **app**: processor, handler, registry, config
//! - **telemetry**: tracing subscriber の初期化

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod telemetry;

pub use app::{
    MessageHandler, Processor, ProcessorConfig, ProcessorState, QueueRegistry, SpoolConfig,
};
pub use domain::{
    AckToken, ClaimedMessage, HandlerError, MessageId, QueueError, QueueEvent, Result,
};
pub use queue::{AddOptions, ClaimOptions, Queue, QueueBuilder, QueueStats};
