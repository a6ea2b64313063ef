//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **ScriptedPage / ScriptedLauncher**: ブラウザなしで動く PageDriver
//! - **LogNotifier**: dry-run 用
//! - **RecordingNotifier**: テスト用
//!
//! # 本番用実装
//! Chrome (CDP) と SMTP の実装は `oppwatch-cli` クレートにあります。

pub mod notify;
pub mod scripted_page;

// 主要な型を再エクスポート
pub use self::notify::{LogNotifier, RecordingNotifier};
pub use self::scripted_page::{
    CardFixture, CloseLevel, FakeElement, PageCall, ScriptedLauncher, ScriptedPage,
};
