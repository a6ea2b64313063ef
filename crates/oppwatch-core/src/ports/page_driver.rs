//! PageDriver port - ブラウザ自動化の抽象化
//!
//! SessionManager と RecordExtractor はこの trait だけを通してページを触る。
//! 具体的なエンジン（WebDriver, CDP など）は別クレートで実装する。
//!
//! # 前提
//! - 1 サイクル内の操作は逐次実行（driver は再入不可）
//! - 待機はすべて timeout 付き。無限に待つ操作は存在しない

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ErrorKind, SessionState};

/// How to locate an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    pub fn css(value: impl Into<String>) -> Self {
        Selector::Css(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Selector::XPath(value.into())
    }

    pub fn value(&self) -> &str {
        match self {
            Selector::Css(v) | Selector::XPath(v) => v,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(v) => write!(f, "css({v})"),
            Selector::XPath(v) => write!(f, "xpath({v})"),
        }
    }
}

/// Opaque handle to an element on the current page.
///
/// Only valid for the driver that produced it, and only until the page
/// changes underneath it (then operations report `StaleElement`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors surfaced by a page driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("no such element: {0}")]
    NoSuchElement(String),

    #[error("stale element reference: {0}")]
    StaleElement(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("automation target crashed: {0}")]
    TargetCrashed(String),

    #[error("automation connection closed: {0}")]
    ConnectionClosed(String),

    #[error("driver protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    pub fn timeout(what: impl fmt::Display, waited: Duration) -> Self {
        DriverError::Timeout {
            what: what.to_string(),
            waited,
        }
    }

    /// The automation process itself is gone; nothing else in this cycle can
    /// succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::TargetCrashed(_) | DriverError::ConnectionClosed(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }

    /// Cycle-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::TargetCrashed(_) => ErrorKind::TargetCrashed,
            DriverError::ConnectionClosed(_) => ErrorKind::ConnectionClosed,
            DriverError::Navigation { .. } | DriverError::Timeout { .. } => ErrorKind::Navigation,
            DriverError::NoSuchElement(_)
            | DriverError::StaleElement(_)
            | DriverError::Protocol(_) => ErrorKind::Internal,
        }
    }
}

/// PageDriver は 1 つのブラウザページ（+ context + process）を操作する
///
/// # Thread Safety
/// - `Send + Sync` を要求（`Arc<dyn PageDriver>` で保持する）
/// - ただし呼び出しは常に逐次
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Load `url` in the page.
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Wait until at least one element matches `selector` anywhere on the
    /// page and return the first match. Gives up with `DriverError::Timeout`.
    async fn wait_for(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError>;

    /// All current matches of `selector`, below `scope` if given, otherwise
    /// from the document root. No waiting; an empty vec means absent.
    async fn query_all(
        &self,
        scope: Option<&ElementRef>,
        selector: &Selector,
    ) -> Result<Vec<ElementRef>, DriverError>;

    /// Rendered text of the element.
    async fn text(&self, element: &ElementRef) -> Result<String, DriverError>;

    /// Attribute value, `None` when the attribute is absent.
    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError>;

    /// Empty an input field.
    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError>;

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), DriverError>;

    /// Snapshot of the current authentication state.
    async fn session_state(&self) -> Result<SessionState, DriverError>;

    /// Replace the current authentication state with `state`.
    async fn restore_session_state(&self, state: &SessionState) -> Result<(), DriverError>;

    /// Page-level cleanup.
    async fn close_page(&self) -> Result<(), DriverError>;

    /// Context-level cleanup (browser session / cookie jar).
    async fn close_context(&self) -> Result<(), DriverError>;

    /// Process-level cleanup (the automation engine itself).
    async fn close_process(&self) -> Result<(), DriverError>;

    /// First match of `selector` below `scope`, or `None`.
    async fn query_first(
        &self,
        scope: Option<&ElementRef>,
        selector: &Selector,
    ) -> Result<Option<ElementRef>, DriverError> {
        Ok(self.query_all(scope, selector).await?.into_iter().next())
    }
}

/// PageLauncher は毎サイクル新しい自動化コンテキストを用意する
///
/// サイクルをまたいで同じ driver を使い回すことはない。
#[async_trait]
pub trait PageLauncher: Send + Sync {
    async fn launch(&self) -> Result<std::sync::Arc<dyn PageDriver>, DriverError>;
}
