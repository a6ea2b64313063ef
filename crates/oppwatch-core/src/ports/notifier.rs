//! Notifier port - 新着レコードの通知
//!
//! メッセージの組み立てと送信は実装側の責務。
//! core が受け取るのは成功 / 失敗の bool だけ。

use async_trait::async_trait;

use crate::domain::Record;

/// Notifier sends one message per new record.
///
/// Implementations must not panic or propagate errors past this boundary:
/// log the cause and return `false`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, record: &Record) -> bool;
}
