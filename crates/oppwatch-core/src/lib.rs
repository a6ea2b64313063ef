//! oppwatch-core
//!
//! Core of the dashboard monitor: log in, read the posted records, notify
//! about the ones not seen before, repeat.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Record, SessionState, CycleOutcome, ErrorKind）
//! - **ports**: 抽象化レイヤー（PageDriver, PageLauncher, Notifier, Clock）
//! - **app**: アプリケーションロジック（SessionManager, RecordExtractor, CycleRunner, WorkerSupervisor）
//! - **store**: JSON ファイルへの永続化（SeenStore, SessionFile）
//! - **impls**: 実装（ScriptedPage, RecordingNotifier など開発用）
//! - **config**: 起動時に一度だけ組み立てる MonitorConfig

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod store;
