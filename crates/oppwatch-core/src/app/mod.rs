//! App - アプリケーション層
//!
//! ports を組み合わせて監視ロジックを実装します。
//!
//! # 主要コンポーネント
//! - **SessionManager**: ログイン状態機械（restore → login → persist）
//! - **RecordExtractor**: ダッシュボードのカードから Record を取り出す
//! - **CycleRunner**: 1 回分のチェック（session → extract → diff → notify → save → cleanup）
//! - **WorkerSupervisor**: backoff と watchdog 付きの外側ループ

pub mod backoff;
pub mod cycle;
pub mod extractor;
pub mod session;
pub mod supervisor;

// 主要な型を再エクスポート
pub use self::backoff::{BackoffPolicy, BackoffState};
pub use self::cycle::{Cycle, CycleRunner};
pub use self::extractor::{Extraction, InvalidIdPattern, RecordExtractor};
pub use self::session::{LoginStep, SessionFailure, SessionManager, SessionOutcome};
pub use self::supervisor::{ExitReason, RESTART_EXIT_CODE, Watchdog, WorkerSupervisor};
