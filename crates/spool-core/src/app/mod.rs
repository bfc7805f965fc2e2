//! App - queue を動かす周辺
//!
//! # 主要コンポーネント
//! - **Processor**: 並列度を制限した poll loop（start / stop / drain）
//! - **MessageHandler**: processor が呼ぶ処理ロジック
//! - **EventBus**: `QueueEvent` の配送
//! - **QueueRegistry**: config から queue を組み立てて名前で引く
//! - **SpoolConfig**: TOML 設定

pub mod config;
pub mod events;
pub mod handler;
pub mod processor;
pub mod registry;

pub use self::config::{ConfigError, ProcessorSettings, QueueConfig, SpoolConfig};
pub use self::events::EventBus;
pub use self::handler::{MessageHandler, Typed, typed};
pub use self::processor::{Processor, ProcessorConfig, ProcessorState};
pub use self::registry::{QueueRegistry, RegistryError};
