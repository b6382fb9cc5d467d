use super::manager::BrowserError;
use regex::Regex;
use scraper::Html;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// A request issued from inside the page so it carries the session cookies
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    pub referer: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// Headers of a jQuery-style XHR call, with the referer set to `referer`
    pub fn xhr(url: impl Into<String>, referer: &str) -> Self {
        Self {
            url: url.into(),
            referer: Some(referer.to_string()),
            headers: vec![
                ("X-Requested-With".to_string(), "XMLHttpRequest".to_string()),
                (
                    "Accept".to_string(),
                    "application/json, text/javascript, */*; q=0.01".to_string(),
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    #[serde(default)]
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A background response observed while a navigation was in flight
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub url: String,
    pub status: u16,
    /// `None` when the body could not be read at capture time
    pub body: Option<String>,
}

/// Page-level browser primitives the site adapters and the challenge
/// detector are written against.
pub trait Page {
    /// Navigate and wait for the document to load
    fn goto(&self, url: &str, referer: Option<&str>) -> Result<(), BrowserError>;

    /// Navigate with a listener armed for the first response whose URL
    /// matches `pattern`. Gives up on the response (not the navigation)
    /// after `wait`, counted from the start of the navigation.
    fn goto_capturing(
        &self,
        url: &str,
        pattern: &Regex,
        wait: Duration,
    ) -> Result<Option<CapturedResponse>, BrowserError>;

    fn url(&self) -> Result<String, BrowserError>;

    fn title(&self) -> Result<String, BrowserError>;

    /// Serialized DOM of the current document
    fn content(&self) -> Result<String, BrowserError>;

    /// Evaluate a JavaScript expression; non-serializable results are Null
    fn evaluate(&self, expression: &str) -> Result<Value, BrowserError>;

    /// Number of elements matching a CSS selector
    fn count(&self, selector: &str) -> Result<usize, BrowserError>;

    /// Case-insensitive search of the rendered body text
    fn contains_text(&self, needle: &str) -> Result<bool, BrowserError>;

    fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, BrowserError>;

    fn pause(&self, duration: Duration);

    /// Parse the current document for DOM extraction
    fn document(&self) -> Result<Html, BrowserError> {
        Ok(Html::parse_document(&self.content()?))
    }
}
