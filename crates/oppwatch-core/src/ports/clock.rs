//! Clock port - 時刻と待機の抽象化
//!
//! # テスト容易性
//! - trait により時刻を差し替え可能
//! - テストでは ManualClock を使用（sleep すると仮想時刻が進む）
//!
//! `now` は記録用の壁時計、`monotonic` は経過時間の計測用（壁時計の補正に影響されない）。

use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Clock は現在時刻と sleep を提供
#[async_trait]
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Time since a fixed, arbitrary origin. Never goes backwards.
    fn monotonic(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// 本番用
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// テスト用の仮想時計
///
/// `sleep` は即座に返り、時刻を `duration` だけ進めて記録する。
/// `set_wall` は壁時計だけを動かす（NTP 補正の再現用）。
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    ticks: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            ticks: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        *self.ticks.lock().unwrap_or_else(|e| e.into_inner()) += by;
    }

    /// Jump the wall clock without touching monotonic time.
    pub fn set_wall(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn monotonic(&self) -> Duration {
        *self.ticks.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn manual_clock_advances_on_sleep() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_secs(90)).await;
        clock.advance(Duration::from_secs(10));

        assert_eq!(clock.now(), start + chrono::Duration::seconds(100));
        assert_eq!(clock.monotonic(), Duration::from_secs(100));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(90)]);
    }

    #[test]
    fn wall_clock_jump_leaves_monotonic_time_alone() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(30));

        clock.set_wall(start - chrono::Duration::hours(1));

        assert_eq!(clock.now(), start - chrono::Duration::hours(1));
        assert_eq!(clock.monotonic(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn system_clock_monotonic_follows_tokio_time() {
        let clock = SystemClock::new();

        clock.sleep(Duration::from_secs(5)).await;

        assert!(clock.monotonic() >= Duration::from_secs(5));
    }
}
