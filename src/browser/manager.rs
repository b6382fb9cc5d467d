use super::config::{accept_language, humanize_value, local_storage_script, LaunchSettings, STEALTH_SCRIPT};
use super::page::Page;
use super::scraper::{cdp_params, ChromePage};
use crate::config::ExtractionConfig;
use crate::storage_state::{OriginStorage, StorageEntry, StorageState, StoredCookie};
use headless_chrome::browser::tab::EventListener;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::{Emulation, Network, Page as CdpPage};
use headless_chrome::{Browser, LaunchOptions, Tab};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TRAFFIC_HANDLER: &str = "traffic-log";

/// One isolated browser process with a single page, owned by one request
pub trait Session {
    fn page(&self) -> &dyn Page;

    /// Snapshot cookies and localStorage for persistence
    fn storage_state(&self) -> Result<StorageState, BrowserError>;

    /// Close the page and its browsing context
    fn close_context(&mut self) -> Result<(), BrowserError>;

    /// Shut down the browser process and its DevTools connection
    fn close_browser(&mut self) -> Result<(), BrowserError>;
}

/// Opens sessions for requests
pub trait SessionLauncher: Send + Sync {
    type Session: Session;

    /// Start a browser configured for `config`, restoring the storage state
    /// at `storage_state_path` when that file exists.
    fn open(
        &self,
        config: &ExtractionConfig,
        storage_state_path: Option<&Path>,
    ) -> Result<Self::Session, BrowserError>;
}

/// Outcome of a teardown; failures are diagnostic only
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub persisted: bool,
    pub failures: Vec<(&'static str, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Session lifecycle entry points
pub struct SessionManager;

impl SessionManager {
    /// Open a session through `launcher`, logging the outcome
    pub fn open<L: SessionLauncher>(
        launcher: &L,
        config: &ExtractionConfig,
        storage_state_path: Option<&Path>,
    ) -> Result<L::Session, BrowserError> {
        log::info!(
            "opening browser session humanize={} storage={}",
            config.humanize,
            storage_state_path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        launcher.open(config, storage_state_path)
    }

    /// Tear a session down and drop it
    pub fn close<S: Session>(mut session: S, persist_to: Option<&Path>) -> TeardownReport {
        let report = Self::teardown(&mut session, persist_to);
        drop(session);
        report
    }

    /// Every step runs even when an earlier one failed: persist storage
    /// state (only if `persist_to` is given), close the context, close the
    /// browser. The caller drops the handle afterwards.
    pub fn teardown<S: Session + ?Sized>(
        session: &mut S,
        persist_to: Option<&Path>,
    ) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(path) = persist_to {
            match session.storage_state().and_then(|state| state.save(path)) {
                Ok(()) => {
                    report.persisted = true;
                    log::info!("storage state saved path={}", path.display());
                }
                Err(e) => report.failures.push(("persist", e.to_string())),
            }
        }

        if let Err(e) = session.close_context() {
            report.failures.push(("close_context", e.to_string()));
        }

        if let Err(e) = session.close_browser() {
            report.failures.push(("close_browser", e.to_string()));
        }

        for (step, err) in &report.failures {
            log::warn!("session teardown step={} failed: {}", step, err);
        }
        report
    }
}

/// Launches headless Chrome sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeLauncher;

impl ChromeLauncher {
    /// Build Chrome launch options from our settings
    fn build_launch_options(settings: &LaunchSettings) -> Result<LaunchOptions<'_>, BrowserError> {
        let args: Vec<&OsStr> = settings.chrome_flags.iter().map(OsStr::new).collect();

        LaunchOptions::default_builder()
            .headless(settings.headless)
            .window_size(settings.window_size)
            .idle_browser_timeout(settings.idle_timeout)
            .args(args)
            .build()
            .map_err(|e| BrowserError::ConfigurationError(e.to_string()))
    }
}

impl SessionLauncher for ChromeLauncher {
    type Session = ChromeSession;

    fn open(
        &self,
        config: &ExtractionConfig,
        storage_state_path: Option<&Path>,
    ) -> Result<ChromeSession, BrowserError> {
        let settings = LaunchSettings::from_config(config);
        let options = Self::build_launch_options(&settings)?;

        let browser = Browser::new(options)
            .map_err(|e| BrowserError::InitializationError(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::TabCreationError(e.to_string()))?;
        let page = ChromePage::new(tab.clone(), settings.timeout);

        let locale = if config.humanize {
            humanize_value(config.locale.as_deref())
        } else {
            None
        };
        let language = locale.map(accept_language);

        if let Some(ua) = config.user_agent_override() {
            tab.set_user_agent(ua, language.as_deref(), None)
                .map_err(|e| BrowserError::ConfigurationError(format!("user agent: {}", e)))?;
        }

        if let Some(cookie) = config.cookie_header_value() {
            // Helps when the stored clearance cookie is missing or stale
            tab.set_extra_http_headers(HashMap::from([("cookie", cookie)]))
                .map_err(|e| BrowserError::ConfigurationError(format!("cookie header: {}", e)))?;
            log::info!("using cookie_header length={}", cookie.len());
        }

        if config.humanize {
            apply_humanize(&tab, &page, config, locale, language.as_deref());
        }

        let loaded_state = match storage_state_path {
            Some(path) => match StorageState::load_if_exists(path) {
                Ok(Some(state)) => {
                    if let Err(e) = restore_storage_state(&tab, &state) {
                        log::warn!("storage state only partly restored: {}", e);
                    }
                    log::info!(
                        "storage state loaded path={} cookies={}",
                        path.display(),
                        state.cookies.len()
                    );
                    state
                }
                Ok(None) => StorageState::default(),
                Err(e) => {
                    log::warn!("starting with a fresh context: {}", e);
                    StorageState::default()
                }
            },
            None => StorageState::default(),
        };

        if config.debug_http {
            attach_traffic_log(&tab, config.debug_http_body_max_chars)?;
        }

        Ok(ChromeSession {
            browser: Some(browser),
            tab,
            page,
            loaded_state,
        })
    }
}

/// Stealth and emulation tweaks. Each step is best-effort: a failure is
/// logged and the session carries on without it.
fn apply_humanize(
    tab: &Arc<Tab>,
    page: &ChromePage,
    config: &ExtractionConfig,
    locale: Option<&str>,
    language: Option<&str>,
) {
    if let Err(e) = tab.set_bounds(headless_chrome::types::Bounds::Normal {
        left: Some(0),
        top: Some(0),
        width: Some(config.viewport_width as f64),
        height: Some(config.viewport_height as f64),
    }) {
        log::warn!("humanize step=viewport skipped: {}", e);
    }

    if let Some(locale) = locale {
        let applied = cdp_params::<Emulation::SetLocaleOverride>(json!({ "locale": locale }))
            .and_then(|call| {
                tab.call_method(call)
                    .map_err(|e| BrowserError::ConfigurationError(e.to_string()))
            });
        if let Err(e) = applied {
            log::warn!("humanize step=locale skipped: {}", e);
        }
    }
    if let Some(timezone) = humanize_value(config.timezone_id.as_deref()) {
        let applied =
            cdp_params::<Emulation::SetTimezoneOverride>(json!({ "timezoneId": timezone }))
                .and_then(|call| {
                    tab.call_method(call)
                        .map_err(|e| BrowserError::ConfigurationError(e.to_string()))
                });
        if let Err(e) = applied {
            log::warn!("humanize step=timezone skipped: {}", e);
        }
    }

    if let Err(e) = add_init_script(tab, STEALTH_SCRIPT) {
        log::warn!("humanize step=stealth skipped: {}", e);
    }

    // Request headers must not advertise the headless build either
    if config.user_agent_override().is_none() {
        if let Ok(Value::String(ua)) = page.evaluate("navigator.userAgent") {
            if ua.contains("HeadlessChrome") {
                let patched = ua.replace("HeadlessChrome", "Chrome");
                if let Err(e) = tab.set_user_agent(&patched, language, None) {
                    log::debug!("user agent patch skipped: {}", e);
                }
            }
        }
    }

    let jitter = rand::thread_rng().gen_range(120..=380);
    page.pause(Duration::from_millis(jitter));
}

fn add_init_script(tab: &Arc<Tab>, source: &str) -> Result<(), BrowserError> {
    let call: CdpPage::AddScriptToEvaluateOnNewDocument = cdp_params(json!({ "source": source }))?;
    tab.call_method(call)
        .map_err(|e| BrowserError::ConfigurationError(format!("init script: {}", e)))?;
    Ok(())
}

fn restore_storage_state(tab: &Arc<Tab>, state: &StorageState) -> Result<(), BrowserError> {
    let cookies = state
        .cookies
        .iter()
        .filter_map(|c| {
            cdp_params::<Network::CookieParam>(c.to_cdp_param())
                .map_err(|e| log::debug!("skipping stored cookie {}: {}", c.name, e))
                .ok()
        })
        .collect::<Vec<_>>();
    if !cookies.is_empty() {
        tab.set_cookies(cookies)
            .map_err(|e| BrowserError::StorageStateError(format!("set cookies: {}", e)))?;
    }

    for origin in &state.origins {
        if origin.local_storage.is_empty() {
            continue;
        }
        let entries = origin
            .local_storage
            .iter()
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect::<Vec<_>>();
        add_init_script(tab, &local_storage_script(&origin.origin, &entries))?;
    }
    Ok(())
}

/// Debug line for an outgoing request. Document loads are the requests
/// whose id equals their loader id.
fn request_line(method: &str, url: &str, navigation: bool) -> String {
    if navigation {
        format!("--> {} {} nav=true", method, url)
    } else {
        format!("--> {} {}", method, url)
    }
}

fn attach_traffic_log(tab: &Arc<Tab>, body_max_chars: usize) -> Result<(), BrowserError> {
    let requests: Arc<dyn EventListener<Event> + Send + Sync> = Arc::new(|event: &Event| {
        if let Event::NetworkRequestWillBeSent(sent) = event {
            let params = &sent.params;
            log::debug!(
                "{}",
                request_line(
                    &params.request.method,
                    &params.request.url,
                    params.request_id == params.loader_id
                )
            );
        }
    });
    tab.add_event_listener(requests)
        .map_err(|e| BrowserError::ConfigurationError(format!("traffic log: {}", e)))?;

    tab.register_response_handling(
        TRAFFIC_HANDLER,
        Box::new(move |params, fetch_body| {
            let response = &params.response;
            let content_type = response.mime_type.as_str();
            log::debug!("<-- {} {} ct={}", response.status, response.url, content_type);

            let textual = ["text/", "json", "html", "xml"]
                .iter()
                .any(|t| content_type.contains(t));
            if body_max_chars > 0 && response.status >= 400 && textual {
                if let Ok(body) = fetch_body() {
                    let snippet: String = body
                        .body
                        .replace("\r\n", "\n")
                        .chars()
                        .take(body_max_chars)
                        .collect();
                    log::debug!("body[{}] {}\n{}\n---", response.status, response.url, snippet);
                }
            }
        }),
    )
    .map_err(|e| BrowserError::ConfigurationError(format!("traffic log: {}", e)))?;
    Ok(())
}

/// A running Chrome process with one tab
pub struct ChromeSession {
    browser: Option<Browser>,
    tab: Arc<Tab>,
    page: ChromePage,
    /// State restored at open; origins we never visited are carried over
    loaded_state: StorageState,
}

impl Session for ChromeSession {
    fn page(&self) -> &dyn Page {
        &self.page
    }

    fn storage_state(&self) -> Result<StorageState, BrowserError> {
        let mut state = self.loaded_state.clone();

        // Every cookie in the browser, not only those of the current URL
        let live = self
            .tab
            .call_method(Network::GetAllCookies(None))
            .map_err(|e| BrowserError::StorageStateError(format!("get cookies: {}", e)))?;
        state.merge_cookies(
            live.cookies
                .iter()
                .filter_map(|c| serde_json::to_value(c).ok())
                .filter_map(|v| StoredCookie::from_cdp(&v)),
        );

        let local = self.page.evaluate(
            "({ origin: location.origin, entries: Object.entries(window.localStorage || {}) })",
        );
        match local {
            Ok(value) => {
                if let Some(origin) = origin_storage(&value) {
                    state.upsert_origin(origin);
                }
            }
            Err(e) => log::debug!("localStorage not captured: {}", e),
        }
        Ok(state)
    }

    fn close_context(&mut self) -> Result<(), BrowserError> {
        self.tab
            .close(true)
            .map(|_| ())
            .map_err(|e| BrowserError::TabCreationError(format!("close tab: {}", e)))
    }

    fn close_browser(&mut self) -> Result<(), BrowserError> {
        // Dropping the handle kills the process and stops the transport
        match self.browser.take() {
            Some(browser) => {
                drop(browser);
                Ok(())
            }
            None => Err(BrowserError::InitializationError(
                "browser already closed".to_string(),
            )),
        }
    }
}

fn origin_storage(value: &Value) -> Option<OriginStorage> {
    let origin = value.get("origin")?.as_str()?;
    if !origin.starts_with("http") {
        return None;
    }
    let local_storage = value
        .get("entries")?
        .as_array()?
        .iter()
        .filter_map(|pair| {
            let pair = pair.as_array()?;
            Some(StorageEntry {
                name: pair.first()?.as_str()?.to_string(),
                value: pair.get(1)?.as_str()?.to_string(),
            })
        })
        .collect();
    Some(OriginStorage {
        origin: origin.to_string(),
        local_storage,
    })
}

/// Errors that can occur during browser operations
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    #[error("Browser configuration error: {0}")]
    ConfigurationError(String),

    #[error("Tab error: {0}")]
    TabCreationError(String),

    #[error("Navigation error: {0}")]
    NavigationError(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("JavaScript execution error: {0}")]
    JavaScriptError(String),

    #[error("HTML extraction error: {0}")]
    HtmlExtractionError(String),

    #[error("Storage state error: {0}")]
    StorageStateError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_options_build() {
        let settings = LaunchSettings::from_config(&ExtractionConfig::default());
        let options = ChromeLauncher::build_launch_options(&settings);
        assert!(options.is_ok());
    }

    #[test]
    fn test_stealth_flag_in_launch_options() {
        let settings = LaunchSettings::from_config(&ExtractionConfig::default());
        let options = ChromeLauncher::build_launch_options(&settings).unwrap();

        assert!(options
            .args
            .iter()
            .any(|arg| arg.to_string_lossy().contains("AutomationControlled")));
    }

    #[test]
    fn test_origin_storage_from_script_result() {
        let value = json!({"origin": "https://www.tadu.com", "entries": [["a", "1"], ["b", "2"]]});
        let origin = origin_storage(&value).unwrap();
        assert_eq!(origin.local_storage.len(), 2);
        assert_eq!(origin.local_storage[1].name, "b");

        let blank = json!({"origin": "null", "entries": []});
        assert!(origin_storage(&blank).is_none());
    }

    #[test]
    fn test_request_line_marks_navigations() {
        assert_eq!(
            request_line("GET", "https://www.tadu.com/book/1/", true),
            "--> GET https://www.tadu.com/book/1/ nav=true"
        );
        assert_eq!(
            request_line("POST", "https://www.tadu.com/api", false),
            "--> POST https://www.tadu.com/api"
        );
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_humanize_session_opens() {
        let mut config = ExtractionConfig::default();
        config.humanize = true;
        config.locale = Some("xx-NOT-A-LOCALE".to_string());
        config.timezone_id = Some("Not/AZone".to_string());

        let session = ChromeLauncher.open(&config, None).unwrap();
        assert!(session.page().goto("https://example.com", None).is_ok());
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_chrome_session_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("example_storage.json");

        let session = ChromeLauncher.open(&ExtractionConfig::default(), Some(&path)).unwrap();
        session.page().goto("https://example.com", None).unwrap();
        let report = SessionManager::close(session, Some(&path));

        assert!(report.persisted);
        assert!(path.exists());
    }
}
