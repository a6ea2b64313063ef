//! ScriptedPage - 開発用・テスト用の PageDriver
//!
//! # 学習ポイント
//! - 本物のブラウザなしで SessionManager / RecordExtractor を動かす
//! - 要素ツリーは (parent, selector) で引く単純なモデル
//! - 呼び出しはすべて journal に残り、テストで順序を検証できる

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::PageProfile;
use crate::domain::SessionState;
use crate::ports::{DriverError, ElementRef, PageDriver, PageLauncher, Selector};

/// Content of a fake element.
#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    text: String,
    attrs: HashMap<String, String>,
    hidden: bool,
}

impl FakeElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Not matched by queries until revealed by a click or a session restore.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// One observed driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCall {
    Navigate(String),
    Click(ElementRef),
    Clear(ElementRef),
    TypeText(ElementRef, String),
    SaveSession,
    RestoreSession,
    ClosePage,
    CloseContext,
    CloseProcess,
}

/// Which cleanup level to make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseLevel {
    Page,
    Context,
    Process,
}

#[derive(Debug)]
struct Node {
    parent: Option<ElementRef>,
    selector: Selector,
    element: FakeElement,
    failure: Option<DriverError>,
}

#[derive(Debug, Default)]
struct PageState {
    next_id: u64,
    nodes: HashMap<ElementRef, Node>,
    order: Vec<ElementRef>,
    reveal_on_click: HashMap<ElementRef, Vec<ElementRef>>,
    accepted_session: Option<(SessionState, Vec<ElementRef>)>,
    session_state: Option<SessionState>,
    crashed: Option<DriverError>,
    close_failures: HashSet<CloseLevel>,
    calls: Vec<PageCall>,
}

impl PageState {
    fn check_alive(&self) -> Result<(), DriverError> {
        match &self.crashed {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn node(&self, element: &ElementRef) -> Result<&Node, DriverError> {
        self.check_alive()?;
        let node = self
            .nodes
            .get(element)
            .ok_or_else(|| DriverError::StaleElement(element.to_string()))?;
        match &node.failure {
            Some(err) => Err(err.clone()),
            None => Ok(node),
        }
    }

    fn matches(&self, scope: Option<&ElementRef>, selector: &Selector) -> Vec<ElementRef> {
        self.order
            .iter()
            .filter(|id| {
                let node = &self.nodes[*id];
                !node.element.hidden
                    && node.selector == *selector
                    && (scope.is_none() || node.parent.as_ref() == scope)
            })
            .cloned()
            .collect()
    }

    fn reveal(&mut self, targets: &[ElementRef]) {
        for target in targets {
            if let Some(node) = self.nodes.get_mut(target) {
                node.element.hidden = false;
            }
        }
    }
}

/// In-memory page driver.
///
/// Queries with a scope only see direct registrations under that scope;
/// `wait_for` and unscoped queries see every visible element. `wait_for`
/// never sleeps: absent means an immediate `Timeout`.
#[derive(Debug, Default)]
pub struct ScriptedPage {
    state: Mutex<PageState>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an element matched by `selector` under `parent`.
    pub fn add(
        &self,
        parent: Option<&ElementRef>,
        selector: &Selector,
        element: FakeElement,
    ) -> ElementRef {
        let mut state = self.lock();
        state.next_id += 1;
        let id = ElementRef::new(format!("el-{}", state.next_id));
        state.nodes.insert(
            id.clone(),
            Node {
                parent: parent.cloned(),
                selector: selector.clone(),
                element,
                failure: None,
            },
        );
        state.order.push(id.clone());
        id
    }

    /// Clicking `trigger` makes `target` visible.
    pub fn reveal_on_click(&self, trigger: &ElementRef, target: &ElementRef) {
        self.lock()
            .reveal_on_click
            .entry(trigger.clone())
            .or_default()
            .push(target.clone());
    }

    /// Restoring exactly `state` makes `reveals` visible (a still-valid session).
    pub fn accept_session(&self, state: SessionState, reveals: &[ElementRef]) {
        self.lock().accepted_session = Some((state, reveals.to_vec()));
    }

    /// What `session_state()` reports.
    pub fn set_session_state(&self, state: SessionState) {
        self.lock().session_state = Some(state);
    }

    /// Every operation on `element` (or scoped under it) fails with `error`.
    pub fn fail_element(&self, element: &ElementRef, error: DriverError) {
        if let Some(node) = self.lock().nodes.get_mut(element) {
            node.failure = Some(error);
        }
    }

    /// Every subsequent call fails with `error`, cleanup included.
    pub fn crash(&self, error: DriverError) {
        self.lock().crashed = Some(error);
    }

    pub fn fail_close(&self, level: CloseLevel) {
        self.lock().close_failures.insert(level);
    }

    pub fn calls(&self) -> Vec<PageCall> {
        self.lock().calls.clone()
    }

    /// Current `value` attribute of an input.
    pub fn value_of(&self, element: &ElementRef) -> Option<String> {
        self.lock()
            .nodes
            .get(element)
            .and_then(|n| n.element.attrs.get("value").cloned())
    }

    /// Add one dashboard card laid out per `profile`.
    pub fn add_card(&self, profile: &PageProfile, card: &CardFixture) -> ElementRef {
        let container = self.add(None, &profile.container, FakeElement::new());
        let scope = Some(&container);

        if card.is_record {
            self.add(scope, &profile.record_marker, FakeElement::new());
        }
        if let Some(title) = &card.title {
            self.add(scope, &profile.card_marker, FakeElement::new());
            self.add(scope, &profile.title, FakeElement::new().text(title));
        }
        if let Some(attr) = &card.id_attribute {
            self.add(
                scope,
                &profile.id_element,
                FakeElement::new().attr(profile.id_attribute.clone(), attr),
            );
        }
        if let Some(text) = &card.categories {
            self.add(scope, &profile.categories, FakeElement::new().text(text));
        }
        if let Some(text) = &card.description {
            self.add(scope, &profile.description, FakeElement::new().text(text));
        }
        if let Some(text) = &card.location {
            self.add(scope, &profile.location, FakeElement::new().text(text));
        }
        if let Some(text) = &card.time_posted {
            self.add(scope, &profile.time_posted, FakeElement::new().text(text));
        }
        if card.new_badge {
            self.add(scope, &profile.new_badge, FakeElement::new().text("New"));
        }
        container
    }

    fn record(&self, call: PageCall) -> Result<MutexGuard<'_, PageState>, DriverError> {
        let mut state = self.lock();
        state.calls.push(call);
        state.check_alive()?;
        Ok(state)
    }

    fn close(&self, call: PageCall, level: CloseLevel) -> Result<(), DriverError> {
        let state = self.record(call)?;
        if state.close_failures.contains(&level) {
            return Err(DriverError::Protocol(format!("{level:?} refused to close")));
        }
        Ok(())
    }
}

/// Raw card content; `None` leaves the sub-element out entirely.
#[derive(Debug, Clone)]
pub struct CardFixture {
    pub is_record: bool,
    pub id_attribute: Option<String>,
    pub title: Option<String>,
    pub categories: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub time_posted: Option<String>,
    pub new_badge: bool,
}

impl CardFixture {
    /// A record card with only the required fields.
    pub fn minimal(id: &str, title: &str) -> Self {
        Self {
            is_record: true,
            id_attribute: Some(format!("/api/need/{id}/like/")),
            title: Some(title.to_string()),
            categories: None,
            description: None,
            location: None,
            time_posted: None,
            new_badge: false,
        }
    }

    /// A structural card (banner, header, ad) without the record marker.
    pub fn noise() -> Self {
        Self {
            is_record: false,
            id_attribute: None,
            title: None,
            categories: None,
            description: None,
            location: None,
            time_posted: None,
            new_badge: false,
        }
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.record(PageCall::Navigate(url.to_string()))?;
        Ok(())
    }

    async fn wait_for(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError> {
        let state = self.lock();
        state.check_alive()?;
        state
            .order
            .iter()
            .find(|id| {
                let node = &state.nodes[*id];
                !node.element.hidden && node.selector == *selector
            })
            .cloned()
            .ok_or_else(|| DriverError::timeout(selector, timeout))
    }

    async fn query_all(
        &self,
        scope: Option<&ElementRef>,
        selector: &Selector,
    ) -> Result<Vec<ElementRef>, DriverError> {
        let state = self.lock();
        state.check_alive()?;
        if let Some(scope) = scope {
            state.node(scope)?;
        }
        Ok(state.matches(scope, selector))
    }

    async fn text(&self, element: &ElementRef) -> Result<String, DriverError> {
        Ok(self.lock().node(element)?.element.text.clone())
    }

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        Ok(self.lock().node(element)?.element.attrs.get(name).cloned())
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        let mut state = self.record(PageCall::Click(element.clone()))?;
        state.node(element)?;
        let targets = state.reveal_on_click.get(element).cloned().unwrap_or_default();
        state.reveal(&targets);
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError> {
        let mut state = self.record(PageCall::Clear(element.clone()))?;
        state.node(element)?;
        if let Some(node) = state.nodes.get_mut(element) {
            node.element.attrs.insert("value".to_string(), String::new());
        }
        Ok(())
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), DriverError> {
        let mut state = self.record(PageCall::TypeText(element.clone(), text.to_string()))?;
        state.node(element)?;
        if let Some(node) = state.nodes.get_mut(element) {
            node.element
                .attrs
                .entry("value".to_string())
                .or_default()
                .push_str(text);
        }
        Ok(())
    }

    async fn session_state(&self) -> Result<SessionState, DriverError> {
        let state = self.record(PageCall::SaveSession)?;
        Ok(state
            .session_state
            .clone()
            .unwrap_or_else(|| SessionState::new(serde_json::json!([]))))
    }

    async fn restore_session_state(&self, session: &SessionState) -> Result<(), DriverError> {
        let mut state = self.record(PageCall::RestoreSession)?;
        let reveals = match &state.accepted_session {
            Some((accepted, reveals)) if accepted == session => reveals.clone(),
            _ => Vec::new(),
        };
        state.reveal(&reveals);
        Ok(())
    }

    async fn close_page(&self) -> Result<(), DriverError> {
        self.close(PageCall::ClosePage, CloseLevel::Page)
    }

    async fn close_context(&self) -> Result<(), DriverError> {
        self.close(PageCall::CloseContext, CloseLevel::Context)
    }

    async fn close_process(&self) -> Result<(), DriverError> {
        self.close(PageCall::CloseProcess, CloseLevel::Process)
    }
}

/// Hands out pre-built pages, one per launch.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    pages: Mutex<VecDeque<Arc<ScriptedPage>>>,
}

impl ScriptedLauncher {
    pub fn new(pages: impl IntoIterator<Item = Arc<ScriptedPage>>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
        }
    }
}

#[async_trait]
impl PageLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Arc<dyn PageDriver>, DriverError> {
        let page = self
            .pages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| DriverError::ConnectionClosed("no scripted page left".to_string()))?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hidden_elements_appear_after_click() {
        let page = ScriptedPage::new();
        let button = page.add(None, &Selector::css("button"), FakeElement::new());
        let panel = page.add(None, &Selector::css(".panel"), FakeElement::new().hidden());
        page.reveal_on_click(&button, &panel);

        let wait = Duration::from_millis(10);
        assert!(page.wait_for(&Selector::css(".panel"), wait).await.is_err());
        page.click(&button).await.unwrap();
        assert_eq!(page.wait_for(&Selector::css(".panel"), wait).await.unwrap(), panel);
    }

    #[tokio::test]
    async fn scoped_queries_only_see_children() {
        let page = ScriptedPage::new();
        let sel = Selector::css(".x");
        let a = page.add(None, &Selector::css(".card"), FakeElement::new());
        let b = page.add(None, &Selector::css(".card"), FakeElement::new());
        let child = page.add(Some(&a), &sel, FakeElement::new());

        assert_eq!(page.query_all(Some(&a), &sel).await.unwrap(), vec![child]);
        assert!(page.query_all(Some(&b), &sel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn crashed_page_fails_everything() {
        let page = ScriptedPage::new();
        page.crash(DriverError::TargetCrashed("boom".into()));

        assert!(page.navigate("https://example.com").await.unwrap_err().is_fatal());
        assert!(page.close_page().await.is_err());
        assert_eq!(page.calls().len(), 2);
    }

    #[tokio::test]
    async fn launcher_runs_dry() {
        let launcher = ScriptedLauncher::new([Arc::new(ScriptedPage::new())]);
        assert!(launcher.launch().await.is_ok());
        assert!(launcher.launch().await.err().unwrap().is_fatal());
    }
}
