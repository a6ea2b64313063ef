//! Chrome page driver
//!
//! chromiumoxide で Chrome を CDP 経由で操作する PageDriver 実装。
//!
//! # ライフサイクル
//! - launch() ごとに Chrome を起動し、専用の browser context とタブを作る
//! - close_page → タブを閉じる
//! - close_context → browser context を破棄（cookie もここで消える）
//! - close_process → Browser.close してプロセスの終了を待つ
//!
//! ElementRef は Runtime の RemoteObjectId。ナビゲーションで無効になる（StaleElement）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::cdp::browser_protocol::network::{ClearBrowserCookiesParams, CookieParam};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    CallFunctionOnParams, EvaluateParams, GetPropertiesParams, RemoteObject, RemoteObjectId,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::Handler;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use oppwatch_core::config::MonitorConfig;
use oppwatch_core::domain::SessionState;
use oppwatch_core::ports::{DriverError, ElementRef, PageDriver, PageLauncher, Selector};

use crate::settings::BrowserSettings;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Starts one Chrome process per cycle.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    settings: BrowserSettings,
    headless: bool,
    page_load: Duration,
    origin: String,
    session_domain: String,
}

impl ChromeLauncher {
    pub fn new(settings: &BrowserSettings, config: &MonitorConfig) -> Result<Self, DriverError> {
        let dashboard = Url::parse(&config.profile.dashboard_url).map_err(|e| {
            DriverError::Navigation {
                url: config.profile.dashboard_url.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            settings: settings.clone(),
            headless: config.headless,
            page_load: config.timeouts.navigation,
            origin: dashboard.origin().ascii_serialization(),
            session_domain: config.profile.session_domain.clone(),
        })
    }

    fn browser_config(&self) -> Result<BrowserConfig, DriverError> {
        // ヘッドレス指定は chrome_args 側で持つので builder の既定は切る
        let mut builder = BrowserConfig::builder()
            .with_head()
            .request_timeout(self.page_load)
            .args(chrome_args(self.headless));
        if let Some(path) = &self.settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(DriverError::Protocol)
    }
}

#[async_trait]
impl PageLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn PageDriver>, DriverError> {
        let (browser, handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(|e| DriverError::ConnectionClosed(format!("failed to launch chrome: {e}")))?;
        let events = tokio::spawn(drive(handler));

        // ここから先で失敗してもプロセスを残さない
        let page = ChromePage {
            browser: Mutex::new(browser),
            events,
            context: Mutex::new(None),
            page: Mutex::new(None),
            origin: self.origin.clone(),
            session_domain: self.session_domain.clone(),
        };
        if let Err(e) = page.open_tab().await {
            if let Err(close) = page.close_process().await {
                debug!(error = %close, "chrome shutdown after failed launch");
            }
            return Err(e);
        }
        info!(headless = self.headless, "browser started");

        Ok(Arc::new(page))
    }
}

/// Pump CDP messages until the connection ends.
async fn drive(mut handler: Handler) {
    while let Some(event) = handler.next().await {
        if let Err(e) = event {
            debug!(error = %e, "cdp handler error");
        }
    }
    debug!("cdp connection ended");
}

/// One Chrome process with a single tab in its own browser context.
pub struct ChromePage {
    browser: Mutex<Browser>,
    events: JoinHandle<()>,
    context: Mutex<Option<BrowserContextId>>,
    page: Mutex<Option<Page>>,
    origin: String,
    session_domain: String,
}

impl ChromePage {
    async fn open_tab(&self) -> Result<(), DriverError> {
        let browser = self.browser.lock().await;
        let context = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(map_error)?
            .result
            .browser_context_id;
        *self.context.lock().await = Some(context.clone());

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context)
            .build()
            .map_err(DriverError::Protocol)?;
        let page = browser.new_page(target).await.map_err(map_error)?;
        *self.page.lock().await = Some(page);
        Ok(())
    }

    async fn tab(&self) -> Result<Page, DriverError> {
        self.page
            .lock()
            .await
            .clone()
            .ok_or_else(|| DriverError::ConnectionClosed("tab already closed".into()))
    }

    /// Run `function` with `this` bound to `target`.
    async fn call_on(
        &self,
        target: &RemoteObjectId,
        function: String,
        by_value: bool,
    ) -> Result<RemoteObject, DriverError> {
        let params = CallFunctionOnParams::builder()
            .function_declaration(function)
            .object_id(target.clone())
            .return_by_value(by_value)
            .build()
            .map_err(DriverError::Protocol)?;
        let returns = self.tab().await?.execute(params).await.map_err(map_error)?.result;
        if let Some(ex) = returns.exception_details {
            return Err(DriverError::Protocol(format!("script failed: {}", ex.text)));
        }
        Ok(returns.result)
    }

    async fn document(&self) -> Result<RemoteObjectId, DriverError> {
        let params = EvaluateParams::builder()
            .expression("document")
            .return_by_value(false)
            .build()
            .map_err(DriverError::Protocol)?;
        let returns = self.tab().await?.execute(params).await.map_err(map_error)?.result;
        returns
            .result
            .object_id
            .ok_or_else(|| DriverError::Protocol("document has no object id".into()))
    }

    /// Elements of a JS array handle, in index order.
    async fn array_items(&self, array: RemoteObjectId) -> Result<Vec<ElementRef>, DriverError> {
        let params = GetPropertiesParams::builder()
            .object_id(array)
            .own_properties(true)
            .build()
            .map_err(DriverError::Protocol)?;
        let properties = self.tab().await?.execute(params).await.map_err(map_error)?.result;

        let mut items: Vec<(usize, ElementRef)> = properties
            .result
            .into_iter()
            .filter_map(|p| {
                let index = p.name.parse::<usize>().ok()?;
                let id = p.value?.object_id?;
                Some((index, ElementRef::new(id.inner().clone())))
            })
            .collect();
        items.sort_by_key(|(index, _)| *index);
        Ok(items.into_iter().map(|(_, el)| el).collect())
    }

    async fn value_of(&self, element: &ElementRef, function: String) -> Result<Value, DriverError> {
        let result = self.call_on(&object_id(element), function, true).await?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    /// Cookies from `state` that belong to the monitored site.
    fn site_cookies<'a>(&self, state: &'a SessionState) -> Vec<&'a Value> {
        site_cookies(state.as_value(), &self.session_domain)
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        debug!(url, "navigate");
        match self.tab().await?.goto(url).await.map_err(map_error) {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Err(DriverError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn wait_for(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError> {
        let poll = async {
            loop {
                match self.query_first(None, selector).await {
                    Ok(Some(element)) => return Ok(element),
                    Ok(None) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => debug!(%selector, error = %e, "query failed while waiting"),
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::timeout(selector, timeout)),
        }
    }

    async fn query_all(
        &self,
        scope: Option<&ElementRef>,
        selector: &Selector,
    ) -> Result<Vec<ElementRef>, DriverError> {
        let root = match scope {
            Some(el) => object_id(el),
            None => self.document().await?,
        };
        let array = self.call_on(&root, query_function(selector), false).await?;
        match array.object_id {
            Some(id) => self.array_items(id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn text(&self, element: &ElementRef) -> Result<String, DriverError> {
        let value = self
            .value_of(element, "function() { return this.innerText || ''; }".into())
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let function = format!(
            "function() {{ return this.getAttribute({}); }}",
            js_string(name)
        );
        let value = self.value_of(element, function).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        let function =
            "function() { this.scrollIntoView({ block: 'center' }); this.click(); }".to_string();
        self.call_on(&object_id(element), function, true).await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError> {
        let function = "function() { this.focus(); this.value = ''; \
                        this.dispatchEvent(new Event('input', { bubbles: true })); }"
            .to_string();
        self.call_on(&object_id(element), function, true).await?;
        Ok(())
    }

    /// Focus, then insert through the Input domain so the page sees real input events.
    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), DriverError> {
        self.call_on(&object_id(element), "function() { this.focus(); }".into(), true)
            .await?;
        self.tab()
            .await?
            .execute(InsertTextParams::new(text))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn session_state(&self) -> Result<SessionState, DriverError> {
        let cookies = self.tab().await?.get_cookies().await.map_err(map_error)?;
        let value = serde_json::to_value(&cookies)
            .map_err(|e| DriverError::Protocol(format!("cookies not serializable: {e}")))?;
        Ok(SessionState::new(value))
    }

    /// Cookies are set while the site origin is loaded.
    async fn restore_session_state(&self, state: &SessionState) -> Result<(), DriverError> {
        self.navigate(&self.origin).await?;
        let tab = self.tab().await?;
        tab.execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(map_error)?;

        let cookies = self.site_cookies(state);
        let mut restored = 0usize;
        for cookie in &cookies {
            let Some(param) = cookie_param(cookie) else {
                warn!(cookie = %cookie["name"], "cookie without name or value skipped");
                continue;
            };
            match tab.set_cookie(param).await.map_err(map_error) {
                Ok(_) => restored += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(cookie = %cookie["name"], error = %e, "cookie rejected"),
            }
        }
        debug!(restored, offered = cookies.len(), "cookies restored");
        Ok(())
    }

    async fn close_page(&self) -> Result<(), DriverError> {
        let Some(page) = self.page.lock().await.take() else {
            return Ok(());
        };
        page.close().await.map_err(map_error)
    }

    async fn close_context(&self) -> Result<(), DriverError> {
        let Some(context) = self.context.lock().await.take() else {
            return Ok(());
        };
        self.browser
            .lock()
            .await
            .execute(DisposeBrowserContextParams::new(context))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn close_process(&self) -> Result<(), DriverError> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await.map_err(map_error);
        let exited = browser
            .wait()
            .await
            .map_err(|e| DriverError::Protocol(format!("waiting for chrome to exit: {e}")));
        self.events.abort();
        closed?;
        exited?;
        debug!("chrome stopped");
        Ok(())
    }
}

fn object_id(element: &ElementRef) -> RemoteObjectId {
    RemoteObjectId::new(element.as_str())
}

/// JSON string literal, safe to splice into a function body.
fn js_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

/// Function returning every match below `this` as an array.
fn query_function(selector: &Selector) -> String {
    match selector {
        Selector::Css(css) => format!(
            "function() {{ return Array.from(this.querySelectorAll({})); }}",
            js_string(css)
        ),
        Selector::XPath(xpath) => format!(
            "function() {{ \
             const found = document.evaluate({}, this, null, \
             XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
             const out = []; \
             for (let i = 0; i < found.snapshotLength; i++) out.push(found.snapshotItem(i)); \
             return out; }}",
            js_string(xpath)
        ),
    }
}

fn chrome_args(headless: bool) -> Vec<String> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        format!("--user-agent={USER_AGENT}"),
    ];
    if headless {
        args.insert(0, "--headless=new".to_string());
    }
    args
}

fn site_cookies<'a>(cookies: &'a Value, session_domain: &str) -> Vec<&'a Value> {
    let wanted = session_domain.trim_start_matches('.');
    cookies
        .as_array()
        .map(|list| {
            list.iter()
                .filter(|c| {
                    c["domain"]
                        .as_str()
                        .is_some_and(|d| d.trim_start_matches('.').ends_with(wanted))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Persisted cookie (CDP `Network.Cookie` JSON) to a set-cookie parameter.
fn cookie_param(cookie: &Value) -> Option<CookieParam> {
    let mut builder = CookieParam::builder()
        .name(cookie["name"].as_str()?)
        .value(cookie["value"].as_str()?);
    if let Some(domain) = cookie["domain"].as_str() {
        builder = builder.domain(domain);
    }
    if let Some(path) = cookie["path"].as_str() {
        builder = builder.path(path);
    }
    if let Some(secure) = cookie["secure"].as_bool() {
        builder = builder.secure(secure);
    }
    if let Some(http_only) = cookie["httpOnly"].as_bool() {
        builder = builder.http_only(http_only);
    }
    builder.build().ok()
}

fn map_error(e: CdpError) -> DriverError {
    match e {
        CdpError::Timeout => DriverError::timeout("chrome response", Duration::ZERO),
        other => classify(&other.to_string()),
    }
}

/// Classify a CDP error message.
fn classify(message: &str) -> DriverError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("target crashed") || lowered.contains("tab crashed") {
        return DriverError::TargetCrashed(message.to_string());
    }
    if lowered.contains("could not find object with given id")
        || lowered.contains("cannot find context with specified id")
        || lowered.contains("node with given id does not belong")
    {
        return DriverError::StaleElement(message.to_string());
    }
    const GONE: [&str; 6] = [
        "websocket",
        "connection closed",
        "channel",
        "target closed",
        "session with given id not found",
        "no response",
    ];
    if GONE.iter().any(|needle| lowered.contains(needle)) {
        return DriverError::ConnectionClosed(message.to_string());
    }
    DriverError::Protocol(message.to_string())
}
