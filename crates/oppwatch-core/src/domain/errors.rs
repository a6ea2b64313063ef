//! Errors - サイクル失敗の分類
//!
//! 個々のフィールド・レコードの失敗は発生源で吸収される。
//! ここで扱うのはサイクル単位で supervisor に届く失敗だけ。

use std::fmt;

/// ErrorKind はサイクル失敗の運用分類
///
/// - SessionFailure: ログインできなかった（backoff で回復）
/// - ExtractionTimeout: カード一覧が現れなかった
/// - TargetCrashed / ConnectionClosed: 自動化プロセス側の障害（サイト側ではない）
/// - Navigation: ページ遷移の失敗
/// - Internal: 想定外（panic など）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SessionFailure,
    ExtractionTimeout,
    TargetCrashed,
    ConnectionClosed,
    Navigation,
    Internal,
}

impl ErrorKind {
    /// True when the fault lives in the automation process rather than the site.
    pub fn is_automation_fault(self) -> bool {
        matches!(self, ErrorKind::TargetCrashed | ErrorKind::ConnectionClosed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SessionFailure => "session_failure",
            ErrorKind::ExtractionTimeout => "extraction_timeout",
            ErrorKind::TargetCrashed => "target_crashed",
            ErrorKind::ConnectionClosed => "connection_closed",
            ErrorKind::Navigation => "navigation",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CycleFailure is what a failed cycle reports to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl CycleFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}
