//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! ブラウザ自動化・通知・時刻は外部の協調者であり、core はこの trait
//! 越しにだけ扱います。テストでは impls/ の fake を差し込みます。

pub mod clock;
pub mod notifier;
pub mod page_driver;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::notifier::Notifier;
pub use self::page_driver::{DriverError, ElementRef, PageDriver, PageLauncher, Selector};
