use super::manager::BrowserError;
use super::page::{CapturedResponse, FetchRequest, FetchResponse, Page};
use headless_chrome::protocol::cdp::Page as CdpPage;
use headless_chrome::Tab;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CAPTURE_HANDLER: &str = "content-capture";
const LOAD_POLL: Duration = Duration::from_millis(100);
/// Set on the outgoing document; a new document starts without it
const MARK_DOCUMENT: &str = "(window.__novelNavMarker = true)";
const DOCUMENT_STATE: &str =
    "({ stale: window.__novelNavMarker === true, ready: document.readyState })";

/// `Page` implementation on top of a headless Chrome tab
pub struct ChromePage {
    tab: Arc<Tab>,
    default_timeout: Duration,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>, default_timeout: Duration) -> Self {
        tab.set_default_timeout(default_timeout);
        Self {
            tab,
            default_timeout,
        }
    }

    /// Wait until the marked document has been replaced and the new one has
    /// parsed. Raw `Page.navigate` calls bypass the tab's own navigation
    /// tracking, so this is polled from the page itself.
    fn wait_for_new_document(&self, url: &str) -> Result<(), BrowserError> {
        let start = Instant::now();
        loop {
            // Evaluation fails while the old context is torn down
            if matches!(self.evaluate(DOCUMENT_STATE), Ok(state) if new_document_ready(&state)) {
                return Ok(());
            }
            if start.elapsed() > self.default_timeout {
                return Err(BrowserError::Timeout(format!("navigation to {}", url)));
            }
            std::thread::sleep(LOAD_POLL);
        }
    }

    fn navigation_error(url: &str, err: impl std::fmt::Display) -> BrowserError {
        let message = err.to_string();
        let lower = message.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") || lower.contains("never came") {
            BrowserError::Timeout(format!("navigation to {}: {}", url, message))
        } else {
            BrowserError::NavigationError(format!("failed to navigate to {}: {}", url, message))
        }
    }
}

/// Build a typed CDP command from its JSON wire form
pub(crate) fn cdp_params<T: DeserializeOwned>(value: Value) -> Result<T, BrowserError> {
    serde_json::from_value(value).map_err(|e| BrowserError::ConfigurationError(e.to_string()))
}

/// Poll result of `DOCUMENT_STATE` for a fresh document past the loading stage
fn new_document_ready(state: &Value) -> bool {
    let stale = state.get("stale").and_then(Value::as_bool).unwrap_or(true);
    let ready = state.get("ready").and_then(Value::as_str).unwrap_or_default();
    !stale && matches!(ready, "interactive" | "complete")
}

/// JSON-encode a string so it can be spliced into a script as a literal
fn js_literal(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

impl Page for ChromePage {
    fn goto(&self, url: &str, referer: Option<&str>) -> Result<(), BrowserError> {
        match referer {
            Some(referer) => {
                if let Err(e) = self.evaluate(MARK_DOCUMENT) {
                    log::debug!("document marker not set: {}", e);
                }
                let navigate: CdpPage::Navigate =
                    cdp_params(json!({ "url": url, "referrer": referer }))?;
                let result = self
                    .tab
                    .call_method(navigate)
                    .map_err(|e| Self::navigation_error(url, e))?;
                if let Some(error_text) = result.error_text {
                    return Err(BrowserError::NavigationError(format!(
                        "failed to navigate to {}: {}",
                        url, error_text
                    )));
                }
                self.wait_for_new_document(url)
            }
            None => {
                self.tab
                    .navigate_to(url)
                    .map_err(|e| Self::navigation_error(url, e))?;
                self.tab
                    .wait_until_navigated()
                    .map_err(|e| Self::navigation_error(url, e))?;
                Ok(())
            }
        }
    }

    fn goto_capturing(
        &self,
        url: &str,
        pattern: &Regex,
        wait: Duration,
    ) -> Result<Option<CapturedResponse>, BrowserError> {
        let (tx, rx) = mpsc::channel::<CapturedResponse>();
        let matcher = pattern.clone();

        self.tab
            .register_response_handling(
                CAPTURE_HANDLER,
                Box::new(move |params, fetch_body| {
                    let response = &params.response;
                    if !matcher.is_match(&response.url) {
                        return;
                    }
                    let body = fetch_body()
                        .ok()
                        .filter(|b| !b.base_64_encoded)
                        .map(|b| b.body);
                    let _ = tx.send(CapturedResponse {
                        url: response.url.clone(),
                        status: response.status as u16,
                        body,
                    });
                }),
            )
            .map_err(|e| BrowserError::JavaScriptError(format!("response listener: {}", e)))?;

        let started = Instant::now();
        let navigated = self.goto(url, None);
        let captured = match navigated {
            Ok(()) => rx.recv_timeout(wait.saturating_sub(started.elapsed())).ok(),
            Err(_) => None,
        };

        if let Err(e) = self.tab.deregister_response_handling(CAPTURE_HANDLER) {
            log::debug!("response listener cleanup failed: {}", e);
        }

        navigated.map(|_| captured)
    }

    fn url(&self) -> Result<String, BrowserError> {
        Ok(self.tab.get_url())
    }

    fn title(&self) -> Result<String, BrowserError> {
        self.tab
            .get_title()
            .map_err(|e| BrowserError::JavaScriptError(format!("title: {}", e)))
    }

    fn content(&self) -> Result<String, BrowserError> {
        self.tab
            .get_content()
            .map_err(|e| BrowserError::HtmlExtractionError(e.to_string()))
    }

    fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let script = format!(
            "(async () => JSON.stringify(await ({})))()",
            expression
        );
        let result = self
            .tab
            .evaluate(&script, true)
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        match result.value {
            Some(Value::String(serialized)) => serde_json::from_str(&serialized)
                .map_err(|e| BrowserError::JavaScriptError(format!("bad script result: {}", e))),
            _ => Ok(Value::Null),
        }
    }

    fn count(&self, selector: &str) -> Result<usize, BrowserError> {
        let expression = format!(
            "document.querySelectorAll({}).length",
            js_literal(selector)
        );
        let value = self.evaluate(&expression)?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| BrowserError::JavaScriptError(format!("count({}) returned {}", selector, value)))
    }

    fn contains_text(&self, needle: &str) -> Result<bool, BrowserError> {
        let expression = format!(
            "((document.body && document.body.innerText) || '').toLowerCase().includes({}.toLowerCase())",
            js_literal(needle)
        );
        Ok(self.evaluate(&expression)?.as_bool().unwrap_or(false))
    }

    fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let start = Instant::now();

        loop {
            if start.elapsed() > timeout {
                return Err(BrowserError::Timeout(format!(
                    "waiting for selector: {}",
                    selector
                )));
            }

            if matches!(self.count(selector), Ok(n) if n > 0) {
                return Ok(());
            }

            std::thread::sleep(Duration::from_millis(100));
        }
    }

    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, BrowserError> {
        let headers: serde_json::Map<String, Value> = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let mut init = json!({
            "method": "GET",
            "credentials": "include",
            "headers": headers,
        });
        if let Some(referer) = &request.referer {
            init["referrer"] = json!(referer);
        }

        let expression = format!(
            "fetch({}, {}).then(async r => ({{ status: r.status, body: await r.text() }}))",
            js_literal(&request.url),
            init
        );
        let value = self.evaluate(&expression)?;
        serde_json::from_value(value)
            .map_err(|e| BrowserError::JavaScriptError(format!("fetch {}: {}", request.url, e)))
    }

    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl std::fmt::Debug for ChromePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromePage")
            .field("url", &self.tab.get_url())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{ChromeLauncher, Session, SessionLauncher};
    use crate::config::ExtractionConfig;

    #[test]
    fn test_js_literal_escapes_quotes() {
        assert_eq!(js_literal("a[href*='/txt/']"), r#""a[href*='/txt/']""#);
        assert_eq!(js_literal("say \"hi\""), r#""say \"hi\"""#);
    }

    #[test]
    fn test_new_document_ready_states() {
        assert!(new_document_ready(&json!({"stale": false, "ready": "interactive"})));
        assert!(new_document_ready(&json!({"stale": false, "ready": "complete"})));
        assert!(!new_document_ready(&json!({"stale": false, "ready": "loading"})));
        assert!(!new_document_ready(&json!({"stale": true, "ready": "complete"})));
        assert!(!new_document_ready(&Value::Null));
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_navigation_with_referer_waits_for_document() {
        let session = ChromeLauncher
            .open(&ExtractionConfig::default(), None)
            .unwrap();
        let page = session.page();

        page.goto("https://example.com", None).unwrap();
        page.goto("https://www.iana.org/help/example-domains", Some("https://example.com/"))
            .unwrap();
        assert!(page.url().unwrap().contains("iana.org"));
        assert!(page.count("h1").unwrap() >= 1);
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_basic_navigation() {
        let session = ChromeLauncher
            .open(&ExtractionConfig::default(), None)
            .unwrap();
        let page = session.page();

        assert!(page.goto("https://example.com", None).is_ok());
        assert!(page.title().unwrap().contains("Example"));
        assert!(page.count("h1").unwrap() >= 1);
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_evaluate_round_trips_objects() {
        let session = ChromeLauncher
            .open(&ExtractionConfig::default(), None)
            .unwrap();
        let page = session.page();

        page.goto("https://example.com", None).unwrap();
        let value = page.evaluate("({ a: 1, b: [1, 2] })").unwrap();
        assert_eq!(value["b"][1], 2);
        assert!(page.contains_text("example domain").unwrap());
    }
}
