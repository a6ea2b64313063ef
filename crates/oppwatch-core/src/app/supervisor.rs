//! WorkerSupervisor - 外側のループ
//!
//! # フロー
//! 1. Cycle::run_once()（常に 1 本ずつ、並行実行はしない）
//! 2. 成功 → backoff リセット、`interval - 所要時間` だけ sleep
//! 3. 失敗 → `current_delay` だけ sleep、次回の delay を倍に（上限あり）
//! 4. cleanup 後・sleep 前に watchdog を確認し、超えていればループを抜ける
//!
//! 経過時間は `Clock::monotonic` で測る（壁時計が戻っても uptime は減らない）。
//!
//! プロセスの終了（exit code）は呼び出し側の責務。ここでは理由を返すだけ。

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info, warn};

use super::backoff::{BackoffPolicy, BackoffState};
use super::cycle::Cycle;
use crate::config::{MonitorConfig, WatchdogSettings};
use crate::domain::{CycleOutcome, ErrorKind};
use crate::ports::Clock;

/// Exit status that asks the external process manager for a restart.
pub const RESTART_EXIT_CODE: u8 = 3;

/// Why the supervisor stopped looping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    UptimeExceeded { uptime: Duration },
    CycleLimitReached { cycles: u64 },
}

impl ExitReason {
    pub fn exit_code(&self) -> u8 {
        RESTART_EXIT_CODE
    }
}

/// Uptime / cycle-count ceilings, evaluated between cycles.
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    settings: WatchdogSettings,
}

impl Watchdog {
    pub fn new(settings: WatchdogSettings) -> Self {
        Self { settings }
    }

    /// `Some` once either ceiling is reached.
    pub fn check(&self, uptime: Duration, cycles: u64) -> Option<ExitReason> {
        if let Some(max) = self.settings.max_uptime
            && uptime >= max
        {
            return Some(ExitReason::UptimeExceeded { uptime });
        }
        if let Some(max) = self.settings.max_cycles
            && cycles >= max
        {
            return Some(ExitReason::CycleLimitReached { cycles });
        }
        None
    }
}

/// Strictly serial cycle scheduler with backoff and watchdog.
pub struct WorkerSupervisor {
    cycle: Arc<dyn Cycle>,
    clock: Arc<dyn Clock>,
    policy: BackoffPolicy,
    interval: Duration,
    watchdog: Watchdog,
}

impl WorkerSupervisor {
    pub fn new(config: &MonitorConfig, cycle: Arc<dyn Cycle>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cycle,
            clock,
            policy: BackoffPolicy::from(config.backoff),
            interval: config.check_interval,
            watchdog: Watchdog::new(config.watchdog),
        }
    }

    /// Loop until the watchdog trips. Cycle failures never escape.
    pub async fn run(&self) -> ExitReason {
        let started = self.clock.monotonic();
        let mut backoff = self.policy.initial_state();
        let mut cycles: u64 = 0;

        info!(
            interval_secs = self.interval.as_secs(),
            base_delay_secs = self.policy.base_delay.as_secs(),
            max_delay_secs = self.policy.max_delay.as_secs(),
            "supervisor started"
        );

        loop {
            let cycle_started = self.clock.monotonic();
            let outcome = self.run_cycle().await;
            cycles += 1;
            let took = self.clock.monotonic().saturating_sub(cycle_started);

            let pause = self.after_cycle(&outcome, took, &mut backoff);

            let uptime = self.clock.monotonic().saturating_sub(started);
            if let Some(reason) = self.watchdog.check(uptime, cycles) {
                warn!(
                    ?reason,
                    uptime_secs = uptime.as_secs(),
                    cycles,
                    "watchdog tripped, requesting restart"
                );
                return reason;
            }

            self.clock.sleep(pause).await;
        }
    }

    async fn run_cycle(&self) -> CycleOutcome {
        match std::panic::AssertUnwindSafe(self.cycle.run_once())
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => CycleOutcome::failure(ErrorKind::Internal, "cycle panicked"),
        }
    }

    /// Update backoff bookkeeping and decide how long to pause.
    fn after_cycle(
        &self,
        outcome: &CycleOutcome,
        took: Duration,
        backoff: &mut BackoffState,
    ) -> Duration {
        match outcome {
            CycleOutcome::Success(_) => {
                backoff.record_success(&self.policy);
                let pause = self.interval.saturating_sub(took);
                info!(
                    took_secs = took.as_secs(),
                    next_in_secs = pause.as_secs(),
                    "cycle succeeded"
                );
                pause
            }
            CycleOutcome::Failure(failure) => {
                let delay = backoff.record_failure(&self.policy);
                if failure.kind.is_automation_fault() {
                    error!(
                        kind = %failure.kind,
                        error = %failure.message,
                        "automation process fault"
                    );
                } else {
                    warn!(kind = %failure.kind, error = %failure.message, "cycle failed");
                }
                warn!(
                    failures = backoff.consecutive_failures,
                    delay_secs = delay.as_secs(),
                    "backing off"
                );
                delay
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffSettings, Credentials};
    use crate::domain::{CycleStats, ExtractionStatus};
    use crate::ports::ManualClock;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn ok() -> CycleOutcome {
        CycleOutcome::Success(CycleStats::empty(ExtractionStatus::Found, 0))
    }

    fn fail() -> CycleOutcome {
        CycleOutcome::failure(ErrorKind::SessionFailure, "login marker never appeared")
    }

    /// Plays back outcomes; each run takes `took` of virtual time.
    struct ScriptedCycle {
        clock: Arc<ManualClock>,
        took: Duration,
        script: Mutex<VecDeque<CycleOutcome>>,
        runs: Mutex<u64>,
    }

    impl ScriptedCycle {
        fn new(clock: Arc<ManualClock>, took: Duration, script: Vec<CycleOutcome>) -> Self {
            Self {
                clock,
                took,
                script: Mutex::new(script.into()),
                runs: Mutex::new(0),
            }
        }

        fn runs(&self) -> u64 {
            *self.runs.lock().unwrap()
        }
    }

    #[async_trait]
    impl Cycle for ScriptedCycle {
        async fn run_once(&self) -> CycleOutcome {
            *self.runs.lock().unwrap() += 1;
            self.clock.advance(self.took);
            self.script.lock().unwrap().pop_front().unwrap_or_else(ok)
        }
    }

    struct PanickingCycle;

    #[async_trait]
    impl Cycle for PanickingCycle {
        async fn run_once(&self) -> CycleOutcome {
            panic!("boom")
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        ))
    }

    fn config(watchdog: WatchdogSettings) -> MonitorConfig {
        let mut config = MonitorConfig::new(Credentials {
            identity: "me@example.com".into(),
            secret: "s3cret".into(),
        });
        config.check_interval = Duration::from_secs(300);
        config.backoff = BackoffSettings {
            base: Duration::from_secs(120),
            max: Duration::from_secs(900),
        };
        config.watchdog = watchdog;
        config
    }

    fn secs(sleeps: Vec<Duration>) -> Vec<u64> {
        sleeps.into_iter().map(|d| d.as_secs()).collect()
    }

    #[tokio::test]
    async fn failures_back_off_and_success_resets() {
        let clock = clock();
        let script = vec![fail(), fail(), fail(), fail(), fail(), ok(), fail()];
        let cycle = Arc::new(ScriptedCycle::new(clock.clone(), Duration::ZERO, script));
        let config = config(WatchdogSettings {
            max_uptime: None,
            max_cycles: Some(7),
        });
        let supervisor = WorkerSupervisor::new(&config, cycle.clone(), clock.clone());

        let reason = supervisor.run().await;

        assert_eq!(reason, ExitReason::CycleLimitReached { cycles: 7 });
        assert_eq!(cycle.runs(), 7);
        // 7 回目の後は watchdog が先に判定するので sleep しない
        assert_eq!(secs(clock.sleeps()), vec![120, 240, 480, 900, 900, 300]);
    }

    #[tokio::test]
    async fn success_sleeps_for_the_rest_of_the_interval() {
        let clock = clock();
        let cycle = Arc::new(ScriptedCycle::new(
            clock.clone(),
            Duration::from_secs(40),
            vec![],
        ));
        let config = config(WatchdogSettings {
            max_uptime: None,
            max_cycles: Some(3),
        });
        let supervisor = WorkerSupervisor::new(&config, cycle, clock.clone());

        supervisor.run().await;

        assert_eq!(secs(clock.sleeps()), vec![260, 260]);
    }

    #[tokio::test]
    async fn slow_cycle_does_not_sleep() {
        let clock = clock();
        let cycle = Arc::new(ScriptedCycle::new(
            clock.clone(),
            Duration::from_secs(400),
            vec![],
        ));
        let config = config(WatchdogSettings {
            max_uptime: None,
            max_cycles: Some(2),
        });
        let supervisor = WorkerSupervisor::new(&config, cycle, clock.clone());

        supervisor.run().await;

        assert_eq!(secs(clock.sleeps()), vec![0]);
    }

    #[tokio::test]
    async fn uptime_ceiling_ends_after_the_crossing_cycle() {
        let clock = clock();
        let cycle = Arc::new(ScriptedCycle::new(
            clock.clone(),
            Duration::from_secs(100),
            vec![],
        ));
        let config = config(WatchdogSettings {
            max_uptime: Some(Duration::from_secs(1000)),
            max_cycles: None,
        });
        let supervisor = WorkerSupervisor::new(&config, cycle.clone(), clock.clone());

        let reason = supervisor.run().await;

        // 0-100, 300-400, 600-700, 900-1000 → 4 回目の終わりで 1000s に到達
        assert_eq!(cycle.runs(), 4);
        assert_eq!(
            reason,
            ExitReason::UptimeExceeded {
                uptime: Duration::from_secs(1000)
            }
        );
        assert_eq!(reason.exit_code(), RESTART_EXIT_CODE);
    }

    /// Steps the wall clock back an hour during every run.
    struct WallRewindingCycle {
        clock: Arc<ManualClock>,
        took: Duration,
    }

    #[async_trait]
    impl Cycle for WallRewindingCycle {
        async fn run_once(&self) -> CycleOutcome {
            self.clock.advance(self.took);
            self.clock.set_wall(self.clock.now() - chrono::Duration::hours(1));
            ok()
        }
    }

    #[tokio::test]
    async fn uptime_ceiling_survives_wall_clock_stepping_back() {
        let clock = clock();
        let cycle = Arc::new(WallRewindingCycle {
            clock: clock.clone(),
            took: Duration::from_secs(100),
        });
        let config = config(WatchdogSettings {
            max_uptime: Some(Duration::from_secs(1000)),
            max_cycles: Some(50),
        });
        let supervisor = WorkerSupervisor::new(&config, cycle, clock.clone());

        let reason = supervisor.run().await;

        assert_eq!(
            reason,
            ExitReason::UptimeExceeded {
                uptime: Duration::from_secs(1000)
            }
        );
        // 所要時間も monotonic で測るので interval の残りはずれない
        assert_eq!(secs(clock.sleeps()), vec![200, 200, 200]);
    }

    #[tokio::test]
    async fn panicking_cycle_counts_as_failure() {
        let clock = clock();
        let config = config(WatchdogSettings {
            max_uptime: None,
            max_cycles: Some(2),
        });
        let supervisor = WorkerSupervisor::new(&config, Arc::new(PanickingCycle), clock.clone());

        supervisor.run().await;

        assert_eq!(secs(clock.sleeps()), vec![120]);
    }

    #[rstest]
    #[case::below_both(Some(100), Some(5), 99, 4, None)]
    #[case::uptime_hit(Some(100), Some(5), 100, 1, Some(ExitReason::UptimeExceeded { uptime: Duration::from_secs(100) }))]
    #[case::cycles_hit(None, Some(5), 10_000, 5, Some(ExitReason::CycleLimitReached { cycles: 5 }))]
    #[case::disabled(None, None, 10_000_000, 1_000_000, None)]
    fn watchdog_ceilings(
        #[case] max_uptime: Option<u64>,
        #[case] max_cycles: Option<u64>,
        #[case] uptime: u64,
        #[case] cycles: u64,
        #[case] expected: Option<ExitReason>,
    ) {
        let watchdog = Watchdog::new(WatchdogSettings {
            max_uptime: max_uptime.map(Duration::from_secs),
            max_cycles,
        });
        assert_eq!(watchdog.check(Duration::from_secs(uptime), cycles), expected);
    }
}
