//! CycleRunner - 1 回分のチェック
//!
//! # フロー
//! 1. PageLauncher::launch() で新しい自動化コンテキストを取得（使い回さない）
//! 2. SessionManager::establish()
//! 3. SeenStore::load()
//! 4. RecordExtractor::extract()（空なら成功として終了）
//! 5. diff_new() → 新着ごとに Notifier::notify()
//! 6. 新着はすべて履歴に追加して SeenStore::save()（通知失敗もログだけ残して追加）
//! 7. cleanup: page → context → process の順。どの段の失敗も握りつぶす
//!
//! cleanup は panic を含むすべての経路で必ず実行される。

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::extractor::{InvalidIdPattern, RecordExtractor};
use super::session::{SessionManager, SessionOutcome};
use crate::config::MonitorConfig;
use crate::domain::{CycleOutcome, CycleStats, ErrorKind, ExtractionStatus};
use crate::ports::{Clock, Notifier, PageDriver, PageLauncher};
use crate::store::{SeenStore, diff_new};

/// One unit of supervised work.
///
/// The supervisor only needs this seam; tests drive it with scripted cycles.
#[async_trait]
pub trait Cycle: Send + Sync {
    async fn run_once(&self) -> CycleOutcome;
}

/// Orchestrates one check: session, extract, diff, notify, persist.
pub struct CycleRunner {
    launcher: Arc<dyn PageLauncher>,
    notifier: Arc<dyn Notifier>,
    sessions: SessionManager,
    extractor: RecordExtractor,
    seen: SeenStore,
}

impl CycleRunner {
    pub fn new(
        config: Arc<MonitorConfig>,
        launcher: Arc<dyn PageLauncher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InvalidIdPattern> {
        let extractor = RecordExtractor::new(
            config.profile.clone(),
            config.timeouts.extraction,
            clock,
        )?;
        Ok(Self {
            launcher,
            notifier,
            sessions: SessionManager::new(config.clone()),
            extractor,
            seen: SeenStore::new(config.seen_store_file.clone()),
        })
    }

    async fn check(&self, page: &dyn PageDriver) -> CycleOutcome {
        if let SessionOutcome::Failed(failure) = self.sessions.establish(page).await {
            return CycleOutcome::failure(failure.kind(), failure.to_string());
        }

        let mut seen = self.seen.load().await;
        info!(tracked = seen.len(), "loaded seen records");

        let extraction = match self.extractor.extract(page).await {
            Ok(extraction) => extraction,
            Err(e) => {
                if e.is_fatal() {
                    error!(error = %e, kind = %e.kind(), "automation target failed during extraction");
                }
                return CycleOutcome::failure(e.kind(), e.to_string());
            }
        };

        if extraction.records.is_empty() {
            match extraction.status {
                ExtractionStatus::TimedOut => {
                    info!(kind = %ErrorKind::ExtractionTimeout, "timed out waiting for records")
                }
                ExtractionStatus::Found => info!("no records on the page"),
            }
            return CycleOutcome::Success(CycleStats::empty(extraction.status, seen.len()));
        }

        let fresh = diff_new(&extraction.records, &seen);
        let mut notified = 0usize;
        for record in &fresh {
            debug!(id = record.id(), title = record.title(), "new record");
            if self.notifier.notify(record).await {
                notified += 1;
            } else {
                warn!(id = record.id(), title = record.title(), "notification failed");
            }
            // 通知の成否に関わらず履歴に入れる（再送はしない）
            seen.push(record.clone());
        }

        if !fresh.is_empty()
            && let Err(e) = self.seen.save(&seen).await
        {
            warn!(error = %e, path = %self.seen.path().display(), "failed to save seen records");
        }

        let stats = CycleStats {
            total: extraction.records.len(),
            new: fresh.len(),
            notified,
            tracked: seen.len(),
            extraction: extraction.status,
        };
        info!(
            total = stats.total,
            new = stats.new,
            notified = stats.notified,
            tracked = stats.tracked,
            "check complete"
        );
        CycleOutcome::Success(stats)
    }
}

#[async_trait]
impl Cycle for CycleRunner {
    async fn run_once(&self) -> CycleOutcome {
        let page = match self.launcher.launch().await {
            Ok(page) => page,
            Err(e) => {
                error!(error = %e, kind = %e.kind(), "failed to start automation context");
                return CycleOutcome::failure(e.kind(), e.to_string());
            }
        };

        let outcome = match std::panic::AssertUnwindSafe(self.check(page.as_ref()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "cycle panicked");
                CycleOutcome::failure(ErrorKind::Internal, format!("cycle panicked: {message}"))
            }
        };

        cleanup(page.as_ref()).await;
        outcome
    }
}

/// Close page, then context, then process. Each failure is logged and
/// swallowed so it never replaces the cycle's own outcome.
pub async fn cleanup(page: &dyn PageDriver) {
    if let Err(e) = page.close_page().await {
        warn!(error = %e, "failed to close page");
    }
    if let Err(e) = page.close_context().await {
        warn!(error = %e, "failed to close automation context");
    }
    if let Err(e) = page.close_process().await {
        warn!(error = %e, "failed to stop automation process");
    }
    debug!("automation resources released");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
