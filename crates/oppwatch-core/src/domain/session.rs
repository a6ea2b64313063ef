//! Session - 永続化されたログイン状態
//!
//! SessionState の中身は PageDriver だけが理解する（cookie や storage の snapshot）。
//! core は読み込み・保存するだけで、中身を解釈も合成もしない。

use serde::{Deserialize, Serialize};

/// SessionState is an opaque persisted authentication artifact.
///
/// Lifecycle: absent -> created on first successful login -> overwritten on
/// every successful login -> loaded at the start of every cycle. It is never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState(serde_json::Value);

impl SessionState {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Phases of the login state machine.
///
/// ```text
/// NoSession ──> Authenticating ──> Authenticated
///     │               │
///     └───────────────┴──────────> Failed
/// ```
/// A restored session that already shows the post-login marker goes straight
/// from NoSession to Authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NoSession,
    Authenticating,
    Authenticated,
    Failed,
}

/// How a cycle became authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// The persisted session was still valid; no credentials were typed.
    Restored,
    /// A full login flow ran and the session was persisted.
    LoggedIn,
}
