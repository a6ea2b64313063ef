//! Notifier の開発用実装
//!
//! - LogNotifier: 送信せずログに出すだけ（dry-run 用）
//! - RecordingNotifier: 呼び出しを記録し、指定 id だけ失敗させる（テスト用）

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::domain::Record;
use crate::ports::Notifier;

/// Logs each record instead of sending it. Always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, record: &Record) -> bool {
        info!(
            id = record.id(),
            title = record.title(),
            location = %record.location,
            time_posted = %record.time_posted,
            "new record (dry run, not sent)"
        );
        true
    }
}

/// Remembers every notified id; fails for the ids it was told to.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: ids.into_iter().map(Into::into).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Ids passed to `notify`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, record: &Record) -> bool {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.id().to_string());
        !self.failing.contains(record.id())
    }
}
