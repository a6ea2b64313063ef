//! oppwatch - ダッシュボード監視プロセス
//!
//! # 起動手順
//! 1. .env 読み込み → tracing 初期化
//! 2. MonitorConfig / SMTP / Chrome の設定を組み立てる（失敗したら exit 2、サイクル前）
//! 3. `--once` なら 1 サイクルだけ実行（成功 0 / 失敗 1）
//! 4. それ以外は WorkerSupervisor に渡して watchdog が止めるまで回す（exit 3 = 再起動して）

mod chrome;
mod email;
mod settings;
mod smtp;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oppwatch_core::app::{Cycle, CycleRunner, WorkerSupervisor};
use oppwatch_core::config::{ConfigError, MonitorConfig};
use oppwatch_core::impls::LogNotifier;
use oppwatch_core::ports::{Clock, Notifier, SystemClock};

use crate::chrome::ChromeLauncher;
use crate::settings::{BrowserSettings, SmtpSettings};
use crate::smtp::SmtpNotifier;

const EXIT_CYCLE_FAILED: u8 = 1;
const EXIT_BAD_CONFIG: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "oppwatch", version, about = "Watch a dashboard for new postings and email them")]
struct Cli {
    /// Run a single check and exit (0 on success, 1 on failure).
    #[arg(long)]
    once: bool,

    /// Log new records instead of emailing them; SMTP settings are not required.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,oppwatch_core=debug,oppwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();

    let app = match build(&cli) {
        Ok(built) => built,
        Err(e) => {
            error!("startup failed: {e:#}");
            return ExitCode::from(EXIT_BAD_CONFIG);
        }
    };

    if cli.once {
        let outcome = app.runner.run_once().await;
        info!(?outcome, "single check finished");
        return if outcome.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(EXIT_CYCLE_FAILED)
        };
    }

    let supervisor = WorkerSupervisor::new(&app.config, app.runner, app.clock);
    let reason = supervisor.run().await;
    info!(?reason, code = reason.exit_code(), "exiting for restart");
    ExitCode::from(reason.exit_code())
}

struct Built {
    config: Arc<MonitorConfig>,
    runner: Arc<dyn Cycle>,
    clock: Arc<dyn Clock>,
}

/// Everything that can fail before the first cycle.
fn build(cli: &Cli) -> anyhow::Result<Built> {
    let config = Arc::new(MonitorConfig::from_env().context("monitor configuration")?);
    info!(
        dashboard = %config.profile.dashboard_url,
        headless = config.headless,
        interval_secs = config.check_interval.as_secs(),
        once = cli.once,
        dry_run = cli.dry_run,
        "configuration loaded"
    );

    let notifier: Arc<dyn Notifier> = if cli.dry_run {
        Arc::new(LogNotifier)
    } else {
        let smtp = load_smtp().context("smtp configuration")?;
        info!(server = %smtp.server, recipients = smtp.recipients.len(), "email notifications enabled");
        Arc::new(
            SmtpNotifier::new(&smtp, &config.profile.dashboard_url)
                .context("smtp notifier")?,
        )
    };

    let browser = BrowserSettings::from_lookup(|key| std::env::var(key).ok());
    let launcher = ChromeLauncher::new(&browser, &config).context("browser configuration")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let runner = CycleRunner::new(config.clone(), Arc::new(launcher), notifier, clock.clone())
        .context("page profile")?;

    Ok(Built {
        config,
        runner: Arc::new(runner),
        clock,
    })
}

fn load_smtp() -> Result<SmtpSettings, ConfigError> {
    SmtpSettings::from_lookup(|key| std::env::var(key).ok())
}
