//! In-memory browser used by the integration tests.
//!
//! `FakeSite` maps URLs to canned HTML (plus scripted evaluate/fetch/capture
//! answers); `FakePage` answers `Page` calls from it with `scraper`, and
//! `FakeLauncher` hands out sessions that record their teardown steps.
#![allow(dead_code)]

use novel_parser::browser::{
    BrowserError, CapturedResponse, FetchRequest, FetchResponse, Page, Session, SessionLauncher,
};
use novel_parser::config::ExtractionConfig;
use novel_parser::storage_state::{StorageState, StoredCookie};
use novel_parser::text::element_text;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct FakeSite {
    pages: HashMap<String, String>,
    /// url -> (pauses needed, html served afterwards)
    clears_after: HashMap<String, (usize, String)>,
    evaluations: HashMap<String, Value>,
    fetches: HashMap<String, FetchResponse>,
    captures: HashMap<String, CapturedResponse>,
    timeouts: HashSet<String>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Serve `html` at `url` once the page has paused `pauses` times
    pub fn clears_after(mut self, url: &str, pauses: usize, html: &str) -> Self {
        self.clears_after
            .insert(url.to_string(), (pauses, html.to_string()));
        self
    }

    pub fn evaluation(mut self, expression: &str, value: Value) -> Self {
        self.evaluations.insert(expression.to_string(), value);
        self
    }

    pub fn fetch(mut self, url: &str, status: u16, body: &str) -> Self {
        self.fetches.insert(
            url.to_string(),
            FetchResponse {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    /// Background response observed while navigating to `page_url`
    pub fn capture(mut self, page_url: &str, response_url: &str, body: Option<&str>) -> Self {
        self.captures.insert(
            page_url.to_string(),
            CapturedResponse {
                url: response_url.to_string(),
                status: 200,
                body: body.map(str::to_string),
            },
        );
        self
    }

    pub fn timeout(mut self, url: &str) -> Self {
        self.timeouts.insert(url.to_string());
        self
    }
}

pub struct FakePage {
    site: FakeSite,
    current: RefCell<String>,
    pauses: Cell<usize>,
    pub navigations: RefCell<Vec<String>>,
    pub fetched: RefCell<Vec<String>>,
}

impl FakePage {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site,
            current: RefCell::new("about:blank".to_string()),
            pauses: Cell::new(0),
            navigations: RefCell::new(Vec::new()),
            fetched: RefCell::new(Vec::new()),
        }
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.borrow().clone()
    }

    fn html(&self) -> String {
        let url = self.current.borrow();
        if let Some((pauses, cleared)) = self.site.clears_after.get(url.as_str()) {
            if self.pauses.get() >= *pauses {
                return cleared.clone();
            }
        }
        self.site.pages.get(url.as_str()).cloned().unwrap_or_default()
    }

    fn selector(css: &str) -> Result<Selector, BrowserError> {
        Selector::parse(css).map_err(|e| BrowserError::JavaScriptError(format!("{:?}", e)))
    }
}

impl Page for FakePage {
    fn goto(&self, url: &str, _referer: Option<&str>) -> Result<(), BrowserError> {
        self.navigations.borrow_mut().push(url.to_string());
        if self.site.timeouts.contains(url) {
            return Err(BrowserError::Timeout(format!("navigation to {}", url)));
        }
        if !self.site.pages.contains_key(url) && !self.site.clears_after.contains_key(url) {
            return Err(BrowserError::NavigationError(format!(
                "net::ERR_NAME_NOT_RESOLVED at {}",
                url
            )));
        }
        *self.current.borrow_mut() = url.to_string();
        self.pauses.set(0);
        Ok(())
    }

    fn goto_capturing(
        &self,
        url: &str,
        _pattern: &Regex,
        _wait: Duration,
    ) -> Result<Option<CapturedResponse>, BrowserError> {
        self.goto(url, None)?;
        Ok(self.site.captures.get(url).cloned())
    }

    fn url(&self) -> Result<String, BrowserError> {
        Ok(self.current.borrow().clone())
    }

    fn title(&self) -> Result<String, BrowserError> {
        let doc = Html::parse_document(&self.html());
        let sel = Self::selector("title")?;
        Ok(doc
            .select(&sel)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default())
    }

    fn content(&self) -> Result<String, BrowserError> {
        Ok(self.html())
    }

    fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        Ok(self
            .site
            .evaluations
            .get(expression)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn count(&self, selector: &str) -> Result<usize, BrowserError> {
        let sel = Self::selector(selector)?;
        Ok(Html::parse_document(&self.html()).select(&sel).count())
    }

    fn contains_text(&self, needle: &str) -> Result<bool, BrowserError> {
        let doc = Html::parse_document(&self.html());
        let body = Self::selector("body")?;
        let text = doc
            .select(&body)
            .next()
            .map(|b| element_text(b, &[]))
            .unwrap_or_default();
        Ok(text.to_lowercase().contains(&needle.to_lowercase()))
    }

    fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
        if self.count(selector)? > 0 {
            Ok(())
        } else {
            Err(BrowserError::Timeout(format!("waiting for selector: {}", selector)))
        }
    }

    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, BrowserError> {
        self.fetched.borrow_mut().push(request.url.clone());
        Ok(self
            .site
            .fetches
            .get(&request.url)
            .cloned()
            .unwrap_or(FetchResponse {
                status: 404,
                body: String::new(),
            }))
    }

    fn pause(&self, _duration: Duration) {
        self.pauses.set(self.pauses.get() + 1);
    }
}

/// Shared record of session lifecycle events
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().map(|e| e.clone()).unwrap_or_default()
}

pub struct FakeSession {
    page: FakePage,
    events: EventLog,
    fail_persist: bool,
}

impl Session for FakeSession {
    fn page(&self) -> &dyn Page {
        &self.page
    }

    fn storage_state(&self) -> Result<StorageState, BrowserError> {
        if self.fail_persist {
            return Err(BrowserError::StorageStateError("cookie export failed".into()));
        }
        Ok(StorageState {
            cookies: vec![StoredCookie {
                name: "cf_clearance".to_string(),
                value: "token".to_string(),
                domain: ".101kks.com".to_string(),
                path: "/".to_string(),
                expires: -1.0,
                http_only: true,
                secure: true,
                same_site: Some("None".to_string()),
            }],
            origins: Vec::new(),
        })
    }

    fn close_context(&mut self) -> Result<(), BrowserError> {
        self.events.lock().unwrap().push("close_context".to_string());
        Ok(())
    }

    fn close_browser(&mut self) -> Result<(), BrowserError> {
        self.events.lock().unwrap().push("close_browser".to_string());
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if let Ok(mut events) = self.events.lock() {
            events.push("dropped".to_string());
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeLauncher {
    pub site: FakeSite,
    pub events: EventLog,
    pub fail_launch: bool,
    pub fail_persist: bool,
    pub opened_with: Arc<Mutex<Vec<Option<PathBuf>>>>,
}

impl FakeLauncher {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site,
            ..Self::default()
        }
    }
}

impl SessionLauncher for FakeLauncher {
    type Session = FakeSession;

    fn open(
        &self,
        _config: &ExtractionConfig,
        storage_state_path: Option<&Path>,
    ) -> Result<FakeSession, BrowserError> {
        if self.fail_launch {
            return Err(BrowserError::InitializationError("chrome not found".into()));
        }
        self.opened_with
            .lock()
            .unwrap()
            .push(storage_state_path.map(Path::to_path_buf));
        self.events.lock().unwrap().push("open".to_string());
        Ok(FakeSession {
            page: FakePage::new(self.site.clone()),
            events: self.events.clone(),
            fail_persist: self.fail_persist,
        })
    }
}
