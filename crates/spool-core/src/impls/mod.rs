//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryMessageStore**: 開発・テスト用の message store
//!
//! 本番用の document store adapter は別クレートに配置します。

pub mod inmem_store;

pub use self::inmem_store::InMemoryMessageStore;
