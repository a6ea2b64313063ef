//! Binary-only settings: SMTP delivery and the Chrome executable.
//!
//! Read with the same lookup rules as `MonitorConfig` (blank means unset).

use std::fmt;
use std::path::PathBuf;

use oppwatch_core::config::{ConfigError, Lookup};

pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub sender: String,
    pub password: String,
    pub recipients: Vec<String>,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("sender", &self.sender)
            .field("password", &"<redacted>")
            .field("recipients", &self.recipients)
            .finish()
    }
}

impl SmtpSettings {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let recipients: Vec<String> = env
            .required("RECIPIENT_EMAILS")?
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        if recipients.is_empty() {
            return Err(ConfigError::Missing("RECIPIENT_EMAILS"));
        }

        Ok(Self {
            server: env.required("SMTP_SERVER")?,
            port: env.parsed("SMTP_PORT")?.unwrap_or(DEFAULT_SMTP_PORT),
            sender: env.required("SENDER_EMAIL")?,
            password: env.required("SENDER_PASSWORD")?,
            recipients,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSettings {
    /// Chrome binary; unset means let chromiumoxide find one.
    pub chrome_path: Option<PathBuf>,
}

impl BrowserSettings {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        Self {
            chrome_path: env.get("CHROME_PATH").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const SMTP: &[(&str, &str)] = &[
        ("SMTP_SERVER", "smtp.example.com"),
        ("SENDER_EMAIL", "bot@example.com"),
        ("SENDER_PASSWORD", "pw"),
        ("RECIPIENT_EMAILS", " a@example.com, ,b@example.com "),
    ];

    #[test]
    fn recipients_are_split_and_blanks_dropped() {
        let smtp = SmtpSettings::from_lookup(lookup(SMTP)).unwrap();

        assert_eq!(smtp.recipients, vec!["a@example.com", "b@example.com"]);
        assert_eq!(smtp.port, DEFAULT_SMTP_PORT);
        assert!(!format!("{smtp:?}").contains("pw\""));
    }

    #[test]
    fn missing_server_is_reported_by_key() {
        let pairs: Vec<_> = SMTP
            .iter()
            .copied()
            .filter(|(k, _)| *k != "SMTP_SERVER")
            .collect();

        let err = SmtpSettings::from_lookup(lookup(&pairs)).unwrap_err();

        assert_eq!(err, ConfigError::Missing("SMTP_SERVER"));
    }

    #[test]
    fn recipients_of_only_commas_count_as_missing() {
        let mut pairs = SMTP.to_vec();
        pairs.retain(|(k, _)| *k != "RECIPIENT_EMAILS");
        pairs.push(("RECIPIENT_EMAILS", " , ,"));

        let err = SmtpSettings::from_lookup(lookup(&pairs)).unwrap_err();

        assert_eq!(err, ConfigError::Missing("RECIPIENT_EMAILS"));
    }

    #[test]
    fn chrome_path_is_optional() {
        let browser = BrowserSettings::from_lookup(lookup(&[("CHROME_PATH", " ")]));
        assert_eq!(browser.chrome_path, None);

        let browser = BrowserSettings::from_lookup(lookup(&[("CHROME_PATH", "/opt/chrome/chrome")]));
        assert_eq!(browser.chrome_path, Some(PathBuf::from("/opt/chrome/chrome")));
    }
}
