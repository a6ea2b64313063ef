//! Configuration: one explicit value built at process start.
//!
//! Nothing below the binary reads the environment. `MonitorConfig` is built
//! once (from `from_env` or any key/value lookup) and handed down by
//! reference.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::ports::Selector;

/// Configuration errors. Both are fatal before the first cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Login identity and secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Timeout budgets for the bounded waits of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Page loads and the HTTP calls behind them.
    pub navigation: Duration,
    /// Waiting for an individual control during login.
    pub action: Duration,
    /// Waiting for the post-login marker after submitting credentials.
    pub login: Duration,
    /// Checking whether a restored session is still logged in.
    pub session_probe: Duration,
    /// Waiting for the first card on the dashboard.
    pub extraction: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
            action: Duration::from_secs(20),
            login: Duration::from_secs(30),
            session_probe: Duration::from_secs(10),
            extraction: Duration::from_secs(15),
        }
    }
}

/// Exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSettings {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(120),
            max: Duration::from_secs(900),
        }
    }
}

/// Self-termination ceilings. `None` disables a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogSettings {
    pub max_uptime: Option<Duration>,
    pub max_cycles: Option<u64>,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            max_uptime: Some(Duration::from_secs(6 * 60 * 60)),
            max_cycles: None,
        }
    }
}

/// Selectors and patterns describing the one dashboard this monitor targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageProfile {
    pub dashboard_url: String,
    /// Cookies outside this domain are not restored.
    pub session_domain: String,

    // login
    pub identity_input: Selector,
    pub continue_control: Selector,
    pub credential_input: Selector,
    pub primary_submit: Selector,
    pub generic_submit: Selector,
    /// Present only once logged in.
    pub logged_in_marker: Selector,

    // dashboard
    pub card_marker: Selector,
    pub container: Selector,
    pub record_marker: Selector,
    pub title: Selector,
    pub id_element: Selector,
    pub id_attribute: String,
    /// Must have one capture group holding the id.
    pub id_pattern: String,
    pub categories: Selector,
    pub category_separator: char,
    pub description: Selector,
    pub location: Selector,
    pub location_strip: String,
    pub time_posted: Selector,
    pub new_badge: Selector,
}

impl Default for PageProfile {
    fn default() -> Self {
        Self {
            dashboard_url: "https://app.gocatalant.com/c/_/u/0/dashboard/".to_string(),
            session_domain: ".gocatalant.com".to_string(),
            identity_input: Selector::css("input[name='email']"),
            continue_control: Selector::xpath(
                "//button[contains(normalize-space(.),'Continue') or contains(normalize-space(.),'Next')]",
            ),
            credential_input: Selector::css("input[name='password']"),
            primary_submit: Selector::xpath(
                "//button[contains(normalize-space(.),'Login') or contains(normalize-space(.),'Log in')]",
            ),
            generic_submit: Selector::css("button[type='submit']"),
            logged_in_marker: Selector::css(".need-card-inline-name"),
            card_marker: Selector::css(".need-card-inline-name"),
            container: Selector::css("div.card-block"),
            record_marker: Selector::css(".need-card-inline"),
            title: Selector::css(".need-card-inline-name .line-clamp-2"),
            id_element: Selector::css("[data-ajax-post*='need/']"),
            id_attribute: "data-ajax-post".to_string(),
            id_pattern: r"/need/([^/]+)/".to_string(),
            categories: Selector::css(".need-card-inline-pools .small.text-muted"),
            category_separator: '|',
            description: Selector::css(".need-card-inline-details .line-clamp-2"),
            location: Selector::css(".text-gray-25.font-weight-semibold"),
            location_strip: "Remote".to_string(),
            time_posted: Selector::xpath(
                ".//div[contains(@class,'small') and contains(@class,'text-gray-20') and contains(@class,'mt-1')]//span[contains(text(),'Posted')]",
            ),
            new_badge: Selector::css(".badge-success"),
        }
    }
}

/// Everything the core needs to run, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub credentials: Credentials,
    pub profile: PageProfile,
    pub session_file: PathBuf,
    pub seen_store_file: PathBuf,
    pub headless: bool,
    /// Nominal time between the starts of two successful cycles.
    pub check_interval: Duration,
    pub timeouts: Timeouts,
    pub backoff: BackoffSettings,
    pub watchdog: WatchdogSettings,
}

impl MonitorConfig {
    /// Config with defaults for everything except the credentials.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            profile: PageProfile::default(),
            session_file: PathBuf::from("session_state.json"),
            seen_store_file: PathBuf::from("seen_records.json"),
            headless: true,
            check_interval: Duration::from_secs(300),
            timeouts: Timeouts::default(),
            backoff: BackoffSettings::default(),
            watchdog: WatchdogSettings::default(),
        }
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let mut config = Self::new(Credentials {
            identity: env.required("LOGIN_IDENTITY")?,
            secret: env.required("LOGIN_SECRET")?,
        });

        if let Some(url) = env.get("DASHBOARD_URL") {
            config.profile.dashboard_url = url;
        }
        if let Some(domain) = env.get("SESSION_DOMAIN") {
            config.profile.session_domain = domain;
        }
        if let Some(path) = env.get("SESSION_FILE") {
            config.session_file = PathBuf::from(path);
        }
        if let Some(path) = env.get("SEEN_STORE_FILE") {
            config.seen_store_file = PathBuf::from(path);
        }
        if let Some(headless) = env.parsed_bool("HEADLESS")? {
            config.headless = headless;
        }
        if let Some(d) = env.seconds("CHECK_INTERVAL_SECS")? {
            config.check_interval = d;
        }

        let t = &mut config.timeouts;
        if let Some(d) = env.seconds("NAVIGATION_TIMEOUT_SECS")? {
            t.navigation = d;
        }
        if let Some(d) = env.seconds("ACTION_TIMEOUT_SECS")? {
            t.action = d;
        }
        if let Some(d) = env.seconds("LOGIN_TIMEOUT_SECS")? {
            t.login = d;
        }
        if let Some(d) = env.seconds("SESSION_PROBE_TIMEOUT_SECS")? {
            t.session_probe = d;
        }
        if let Some(d) = env.seconds("EXTRACTION_TIMEOUT_SECS")? {
            t.extraction = d;
        }

        if let Some(d) = env.seconds("BACKOFF_BASE_SECS")? {
            config.backoff.base = d;
        }
        if let Some(d) = env.seconds("BACKOFF_MAX_SECS")? {
            config.backoff.max = d;
        }
        if config.backoff.max < config.backoff.base {
            return Err(ConfigError::Invalid {
                key: "BACKOFF_MAX_SECS",
                value: config.backoff.max.as_secs().to_string(),
                reason: "must not be smaller than BACKOFF_BASE_SECS".to_string(),
            });
        }

        // 0 = 無効
        if let Some(d) = env.seconds("WATCHDOG_MAX_UPTIME_SECS")? {
            config.watchdog.max_uptime = (!d.is_zero()).then_some(d);
        }
        if let Some(n) = env.parsed::<u64>("WATCHDOG_MAX_CYCLES")? {
            config.watchdog.max_cycles = (n > 0).then_some(n);
        }

        Ok(config)
    }
}

/// Small helper over a lookup closure so every key gets the same treatment.
pub struct Lookup<F>(pub F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    pub fn parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                }),
        }
    }

    pub fn seconds(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parsed::<u64>(key)?.map(Duration::from_secs))
    }

    pub fn parsed_bool(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(ConfigError::Invalid {
                    key,
                    value,
                    reason: "expected true or false".to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_credentials_are_reported_by_name() {
        let err = MonitorConfig::from_lookup(lookup(&[("LOGIN_IDENTITY", "me@example.com")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("LOGIN_SECRET"));
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let err = MonitorConfig::from_lookup(lookup(&[
            ("LOGIN_IDENTITY", "   "),
            ("LOGIN_SECRET", "pw"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("LOGIN_IDENTITY"));
    }

    #[test]
    fn defaults_apply_when_only_credentials_are_given() {
        let config = MonitorConfig::from_lookup(lookup(&[
            ("LOGIN_IDENTITY", "me@example.com"),
            ("LOGIN_SECRET", "pw"),
        ]))
        .unwrap();

        assert!(config.headless);
        assert_eq!(config.backoff.base, Duration::from_secs(120));
        assert_eq!(config.backoff.max, Duration::from_secs(900));
        assert_eq!(config.watchdog.max_cycles, None);
        assert_eq!(config.profile, PageProfile::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = MonitorConfig::from_lookup(lookup(&[
            ("LOGIN_IDENTITY", "me@example.com"),
            ("LOGIN_SECRET", "pw"),
            ("HEADLESS", "False"),
            ("CHECK_INTERVAL_SECS", "60"),
            ("WATCHDOG_MAX_UPTIME_SECS", "0"),
            ("WATCHDOG_MAX_CYCLES", "50"),
            ("SEEN_STORE_FILE", "/tmp/seen.json"),
        ]))
        .unwrap();

        assert!(!config.headless);
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.watchdog.max_uptime, None);
        assert_eq!(config.watchdog.max_cycles, Some(50));
        assert_eq!(config.seen_store_file, PathBuf::from("/tmp/seen.json"));
    }

    #[test]
    fn unparsable_number_is_invalid() {
        let err = MonitorConfig::from_lookup(lookup(&[
            ("LOGIN_IDENTITY", "me@example.com"),
            ("LOGIN_SECRET", "pw"),
            ("BACKOFF_BASE_SECS", "two minutes"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BACKOFF_BASE_SECS", .. }));
    }

    #[test]
    fn secret_is_not_printed() {
        let creds = Credentials {
            identity: "me@example.com".into(),
            secret: "hunter2".into(),
        };
        let printed = format!("{creds:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("me@example.com"));
    }
}
