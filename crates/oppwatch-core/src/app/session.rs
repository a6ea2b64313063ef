//! SessionManager - ログイン状態機械
//!
//! # フロー
//! 1. 永続化された session があれば restore → dashboard → marker を短く確認
//!    - marker があれば Authenticated（認証情報は一切入力しない）
//! 2. なければ Authenticating
//!    - identity 入力欄: readonly かつ入力済みならそのまま使う
//!    - 「Continue / Next」があれば押してから credential 欄を待つ
//!    - credential を入力し、primary → generic の順で submit を探す
//!    - login marker を timeout 付きで待つ
//! 3. Authenticated になったら session を保存（失敗しても致命的ではない）

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::domain::{AuthMethod, ErrorKind, SessionPhase};
use crate::ports::{DriverError, ElementRef, PageDriver, Selector};
use crate::store::SessionFile;

/// Steps of the login flow, for failure reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    OpenLogin,
    Identity,
    Continue,
    Credential,
    Submit,
    Marker,
}

/// Why a session could not be established.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFailure {
    #[error("login step {step:?} failed: {source}")]
    Step {
        step: LoginStep,
        #[source]
        source: DriverError,
    },

    #[error("no submit control found on the login form")]
    NoSubmitControl,
}

impl SessionFailure {
    fn at(step: LoginStep) -> impl FnOnce(DriverError) -> SessionFailure {
        move |source| SessionFailure::Step { step, source }
    }

    /// Automation faults keep their own classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionFailure::Step { source, .. } if source.is_fatal() => source.kind(),
            _ => ErrorKind::SessionFailure,
        }
    }
}

/// Terminal result of [`SessionManager::establish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Authenticated(AuthMethod),
    Failed(SessionFailure),
}

/// Produces an authenticated page from a possibly stale persisted session.
#[derive(Debug, Clone)]
pub struct SessionManager {
    config: Arc<MonitorConfig>,
    session_file: SessionFile,
}

impl SessionManager {
    pub fn new(config: Arc<MonitorConfig>) -> Self {
        let session_file = SessionFile::new(config.session_file.clone());
        Self {
            config,
            session_file,
        }
    }

    /// Drive `page` to the authenticated dashboard.
    ///
    /// Never returns an error: failures come back as `SessionOutcome::Failed`.
    pub async fn establish(&self, page: &dyn PageDriver) -> SessionOutcome {
        let mut phase = SessionPhase::NoSession;
        debug!(?phase, "establishing session");

        if self.try_restore(page).await {
            phase = transition(phase, SessionPhase::Authenticated);
            debug!(?phase, "session restored");
            return SessionOutcome::Authenticated(AuthMethod::Restored);
        }

        phase = transition(phase, SessionPhase::Authenticating);
        match self.authenticate(page).await {
            Ok(()) => {
                transition(phase, SessionPhase::Authenticated);
                self.persist(page).await;
                SessionOutcome::Authenticated(AuthMethod::LoggedIn)
            }
            Err(failure) => {
                transition(phase, SessionPhase::Failed);
                warn!(error = %failure, kind = %failure.kind(), "login failed");
                SessionOutcome::Failed(failure)
            }
        }
    }

    /// Restore the persisted session and check for the logged-in marker.
    async fn try_restore(&self, page: &dyn PageDriver) -> bool {
        let Some(state) = self.session_file.load().await else {
            return false;
        };
        let profile = &self.config.profile;

        if let Err(e) = page.restore_session_state(&state).await {
            warn!(error = %e, "failed to restore persisted session");
            return false;
        }
        if let Err(e) = page.navigate(&profile.dashboard_url).await {
            warn!(error = %e, "dashboard navigation after restore failed");
            return false;
        }
        match page
            .wait_for(&profile.logged_in_marker, self.config.timeouts.session_probe)
            .await
        {
            Ok(_) => {
                info!("logged in via persisted session");
                true
            }
            Err(e) => {
                debug!(error = %e, "persisted session is no longer valid");
                false
            }
        }
    }

    async fn authenticate(&self, page: &dyn PageDriver) -> Result<(), SessionFailure> {
        let profile = &self.config.profile;
        let timeouts = &self.config.timeouts;

        page.navigate(&profile.dashboard_url)
            .await
            .map_err(SessionFailure::at(LoginStep::OpenLogin))?;

        // identity
        let identity = page
            .wait_for(&profile.identity_input, timeouts.action)
            .await
            .map_err(SessionFailure::at(LoginStep::Identity))?;
        self.fill_identity(page, &identity)
            .await
            .map_err(SessionFailure::at(LoginStep::Identity))?;

        // 中間ステップは条件付き: credential 欄がまだ無く、continue がある時だけ押す
        let credential = match page.query_first(None, &profile.credential_input).await {
            Ok(Some(el)) => el,
            Ok(None) => {
                self.continue_if_present(page)
                    .await
                    .map_err(SessionFailure::at(LoginStep::Continue))?;
                page.wait_for(&profile.credential_input, timeouts.action)
                    .await
                    .map_err(SessionFailure::at(LoginStep::Credential))?
            }
            Err(e) => return Err(SessionFailure::at(LoginStep::Credential)(e)),
        };
        page.clear(&credential)
            .await
            .map_err(SessionFailure::at(LoginStep::Credential))?;
        page.type_text(&credential, &self.config.credentials.secret)
            .await
            .map_err(SessionFailure::at(LoginStep::Credential))?;

        let submit = self
            .find_submit(page)
            .await
            .map_err(SessionFailure::at(LoginStep::Submit))?
            .ok_or(SessionFailure::NoSubmitControl)?;
        page.click(&submit)
            .await
            .map_err(SessionFailure::at(LoginStep::Submit))?;

        page.wait_for(&profile.logged_in_marker, timeouts.login)
            .await
            .map_err(SessionFailure::at(LoginStep::Marker))?;
        info!("login successful");
        Ok(())
    }

    /// Accept a read-only prefilled identity, otherwise replace it.
    async fn fill_identity(
        &self,
        page: &dyn PageDriver,
        input: &ElementRef,
    ) -> Result<(), DriverError> {
        let readonly = page.attribute(input, "readonly").await?.is_some();
        let current = page.attribute(input, "value").await?.unwrap_or_default();

        if readonly && !current.trim().is_empty() {
            debug!("identity field is read-only and prefilled, keeping it");
            return Ok(());
        }
        if readonly {
            warn!("identity field is read-only but empty, typing anyway");
        }
        page.clear(input).await?;
        page.type_text(input, &self.config.credentials.identity).await
    }

    async fn continue_if_present(&self, page: &dyn PageDriver) -> Result<(), DriverError> {
        let control = self.config.profile.continue_control.clone();
        if let Some(button) = page.query_first(None, &control).await? {
            debug!("passing through interstitial continue step");
            page.click(&button).await?;
        }
        Ok(())
    }

    async fn find_submit(&self, page: &dyn PageDriver) -> Result<Option<ElementRef>, DriverError> {
        let profile = &self.config.profile;
        let candidates: [&Selector; 2] = [&profile.primary_submit, &profile.generic_submit];
        for selector in candidates {
            if let Some(el) = page.query_first(None, selector).await? {
                return Ok(Some(el));
            }
        }
        Ok(None)
    }

    /// Save the fresh session. A failure only costs a login next cycle.
    async fn persist(&self, page: &dyn PageDriver) {
        match page.session_state().await {
            Ok(state) => {
                if let Err(e) = self.session_file.save(&state).await {
                    warn!(error = %e, "failed to persist session state");
                }
            }
            Err(e) => warn!(error = %e, "failed to read session state from page"),
        }
    }
}

fn transition(from: SessionPhase, to: SessionPhase) -> SessionPhase {
    debug!(?from, ?to, "session phase");
    to
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::domain::SessionState;
    use crate::impls::{FakeElement, PageCall, ScriptedPage};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Arc<MonitorConfig>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MonitorConfig::new(Credentials {
            identity: "me@example.com".into(),
            secret: "s3cret".into(),
        });
        config.session_file = dir.path().join("session.json");
        config.timeouts.action = Duration::from_millis(10);
        config.timeouts.login = Duration::from_millis(10);
        config.timeouts.session_probe = Duration::from_millis(10);
        Fixture {
            _dir: dir,
            config: Arc::new(config),
        }
    }

    /// Login form whose submit reveals the dashboard marker.
    fn login_page(config: &MonitorConfig, identity: FakeElement) -> (ScriptedPage, ElementRef, ElementRef) {
        let p = &config.profile;
        let page = ScriptedPage::new();
        let id_input = page.add(None, &p.identity_input, identity);
        let secret = page.add(None, &p.credential_input, FakeElement::new());
        let submit = page.add(None, &p.generic_submit, FakeElement::new());
        let marker = page.add(None, &p.logged_in_marker, FakeElement::new().hidden());
        page.reveal_on_click(&submit, &marker);
        page.set_session_state(SessionState::new(json!([{"name": "sid", "value": "fresh"}])));
        (page, id_input, secret)
    }

    fn typed(page: &ScriptedPage) -> Vec<String> {
        page.calls()
            .into_iter()
            .filter_map(|c| match c {
                PageCall::TypeText(_, text) => Some(text),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn fresh_login_types_credentials_and_persists_session() {
        let fx = fixture();
        let (page, id_input, secret) = login_page(&fx.config, FakeElement::new());
        let manager = SessionManager::new(fx.config.clone());

        let outcome = manager.establish(&page).await;

        assert_eq!(outcome, SessionOutcome::Authenticated(AuthMethod::LoggedIn));
        assert_eq!(page.value_of(&id_input).as_deref(), Some("me@example.com"));
        assert_eq!(page.value_of(&secret).as_deref(), Some("s3cret"));
        let saved = SessionFile::new(fx.config.session_file.clone()).load().await;
        assert_eq!(saved, Some(SessionState::new(json!([{"name": "sid", "value": "fresh"}]))));
    }

    #[tokio::test]
    async fn valid_persisted_session_skips_credentials() {
        let fx = fixture();
        let stored = SessionState::new(json!([{"name": "sid", "value": "old"}]));
        SessionFile::new(fx.config.session_file.clone())
            .save(&stored)
            .await
            .unwrap();

        let page = ScriptedPage::new();
        let marker = page.add(None, &fx.config.profile.logged_in_marker, FakeElement::new().hidden());
        page.accept_session(stored, &[marker]);

        let outcome = SessionManager::new(fx.config.clone()).establish(&page).await;

        assert_eq!(outcome, SessionOutcome::Authenticated(AuthMethod::Restored));
        assert!(typed(&page).is_empty());
        assert!(!page.calls().contains(&PageCall::SaveSession));
    }

    #[tokio::test]
    async fn stale_persisted_session_falls_back_to_login() {
        let fx = fixture();
        SessionFile::new(fx.config.session_file.clone())
            .save(&SessionState::new(json!([{"name": "sid", "value": "expired"}])))
            .await
            .unwrap();
        let (page, _, _) = login_page(&fx.config, FakeElement::new());

        let outcome = SessionManager::new(fx.config.clone()).establish(&page).await;

        assert_eq!(outcome, SessionOutcome::Authenticated(AuthMethod::LoggedIn));
        assert!(page.calls().contains(&PageCall::RestoreSession));
        assert_eq!(typed(&page), vec!["me@example.com".to_string(), "s3cret".to_string()]);
    }

    #[tokio::test]
    async fn readonly_prefilled_identity_is_kept() {
        let fx = fixture();
        let identity = FakeElement::new()
            .attr("readonly", "true")
            .attr("value", "prefilled@example.com");
        let (page, id_input, _) = login_page(&fx.config, identity);

        let outcome = SessionManager::new(fx.config.clone()).establish(&page).await;

        assert_eq!(outcome, SessionOutcome::Authenticated(AuthMethod::LoggedIn));
        assert_eq!(page.value_of(&id_input).as_deref(), Some("prefilled@example.com"));
        assert_eq!(typed(&page), vec!["s3cret".to_string()]);
    }

    #[tokio::test]
    async fn editable_identity_is_cleared_before_typing() {
        let fx = fixture();
        let (page, id_input, _) =
            login_page(&fx.config, FakeElement::new().attr("value", "someone-else"));

        SessionManager::new(fx.config.clone()).establish(&page).await;

        assert_eq!(page.value_of(&id_input).as_deref(), Some("me@example.com"));
    }

    #[tokio::test]
    async fn interstitial_continue_is_clicked_before_credential() {
        let fx = fixture();
        let p = &fx.config.profile;
        let page = ScriptedPage::new();
        page.add(None, &p.identity_input, FakeElement::new());
        let next = page.add(None, &p.continue_control, FakeElement::new());
        let secret = page.add(None, &p.credential_input, FakeElement::new().hidden());
        let submit = page.add(None, &p.primary_submit, FakeElement::new());
        let marker = page.add(None, &p.logged_in_marker, FakeElement::new().hidden());
        page.reveal_on_click(&next, &secret);
        page.reveal_on_click(&submit, &marker);

        let outcome = SessionManager::new(fx.config.clone()).establish(&page).await;

        assert_eq!(outcome, SessionOutcome::Authenticated(AuthMethod::LoggedIn));
        let clicks: Vec<_> = page
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                PageCall::Click(el) => Some(el),
                _ => None,
            })
            .collect();
        assert_eq!(clicks, vec![next, submit]);
    }

    #[tokio::test]
    async fn primary_submit_wins_over_generic() {
        let fx = fixture();
        let p = &fx.config.profile;
        let (page, _, _) = login_page(&fx.config, FakeElement::new());
        let primary = page.add(None, &p.primary_submit, FakeElement::new());
        let marker = page.add(None, &p.logged_in_marker, FakeElement::new().hidden());
        page.reveal_on_click(&primary, &marker);

        SessionManager::new(fx.config.clone()).establish(&page).await;

        assert!(page.calls().contains(&PageCall::Click(primary)));
    }

    #[tokio::test]
    async fn missing_marker_fails_with_session_failure() {
        let fx = fixture();
        let p = &fx.config.profile;
        let page = ScriptedPage::new();
        page.add(None, &p.identity_input, FakeElement::new());
        page.add(None, &p.credential_input, FakeElement::new());
        page.add(None, &p.generic_submit, FakeElement::new());

        let outcome = SessionManager::new(fx.config.clone()).establish(&page).await;

        let SessionOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert!(matches!(failure, SessionFailure::Step { step: LoginStep::Marker, .. }));
        assert_eq!(failure.kind(), ErrorKind::SessionFailure);
        assert!(!page.calls().contains(&PageCall::SaveSession));
    }

    #[tokio::test]
    async fn no_submit_control_is_reported() {
        let fx = fixture();
        let p = &fx.config.profile;
        let page = ScriptedPage::new();
        page.add(None, &p.identity_input, FakeElement::new());
        page.add(None, &p.credential_input, FakeElement::new());

        let outcome = SessionManager::new(fx.config.clone()).establish(&page).await;

        assert_eq!(outcome, SessionOutcome::Failed(SessionFailure::NoSubmitControl));
    }

    #[tokio::test]
    async fn crashed_target_is_classified_as_automation_fault() {
        let fx = fixture();
        let page = ScriptedPage::new();
        page.crash(DriverError::TargetCrashed("renderer gone".into()));

        let outcome = SessionManager::new(fx.config.clone()).establish(&page).await;

        let SessionOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind(), ErrorKind::TargetCrashed);
    }
}
