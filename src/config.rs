use crate::models::Site;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIN_NAVIGATION_TIMEOUT_MS: u64 = 5_000;
const MAX_NAVIGATION_TIMEOUT_MS: u64 = 600_000;

/// Process-wide settings read from `config.toml`
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Directory holding `<site>_storage.json` files
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Set to false to force a visible browser for every request
    #[serde(default = "default_true")]
    pub headless: bool,
}

fn default_true() -> bool { true }
fn default_storage_dir() -> PathBuf { PathBuf::from("/data") }
fn default_navigation_timeout() -> u64 { 120_000 }
fn default_viewport_width() -> u32 { 1280 }
fn default_viewport_height() -> u32 { 720 }
fn default_human_delay_min() -> u64 { 150 }
fn default_human_delay_max() -> u64 { 650 }
fn default_body_max_chars() -> usize { 800 }

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            headless: true,
        }
    }
}

impl ServiceConfig {
    pub fn load() -> Self {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<ServiceConfig>(&content) {
                    Ok(cfg) => return cfg,
                    Err(e) => log::warn!("ignoring invalid config file={} err={}", path.display(), e),
                },
                Err(e) => log::warn!("cannot read config file={} err={}", path.display(), e),
            }
        }
        Self::default()
    }
}

/// Per-request browser and extraction settings. Immutable once a request
/// starts.
#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// User-agent override, applied only when non-empty
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Referer sent with the initial book-page navigation
    #[serde(default)]
    pub referer: Option<String>,

    /// Raw `Cookie` header (e.g. `cf_clearance=...`) sent with every request
    #[serde(default)]
    pub cookie_header: Option<String>,

    /// Storage-state file; loaded only if it exists
    #[serde(default)]
    pub storage_state_path: Option<PathBuf>,

    /// Write the storage state back after the request
    #[serde(default = "default_true")]
    pub save_storage_state: bool,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Realistic viewport/locale/timezone, stealth patches and random pauses
    #[serde(default)]
    pub humanize: bool,

    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default)]
    pub timezone_id: Option<String>,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    #[serde(default = "default_human_delay_min")]
    pub human_delay_ms_min: u64,

    #[serde(default = "default_human_delay_max")]
    pub human_delay_ms_max: u64,

    /// Per navigation/interaction timeout, clamped to 5s..=600s
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_ms: u64,

    /// How long to wait for a challenge page to clear on its own; 0 fails fast
    #[serde(default)]
    pub challenge_wait_ms: u64,

    /// Log browser traffic at debug level
    #[serde(default)]
    pub debug_http: bool,

    /// Body snippet size logged for failed textual responses; 0 disables
    #[serde(default = "default_body_max_chars")]
    pub debug_http_body_max_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            referer: None,
            cookie_header: None,
            storage_state_path: None,
            save_storage_state: true,
            headless: true,
            humanize: false,
            locale: None,
            timezone_id: None,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            human_delay_ms_min: default_human_delay_min(),
            human_delay_ms_max: default_human_delay_max(),
            navigation_timeout_ms: default_navigation_timeout(),
            challenge_wait_ms: 0,
            debug_http: false,
            debug_http_body_max_chars: default_body_max_chars(),
        }
    }
}

impl ExtractionConfig {
    /// Navigation timeout as Duration, kept inside the supported bounds
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(
            self.navigation_timeout_ms
                .clamp(MIN_NAVIGATION_TIMEOUT_MS, MAX_NAVIGATION_TIMEOUT_MS),
        )
    }

    /// Non-empty, trimmed user agent override
    pub fn user_agent_override(&self) -> Option<&str> {
        non_empty(self.user_agent.as_deref())
    }

    pub fn cookie_header_value(&self) -> Option<&str> {
        non_empty(self.cookie_header.as_deref())
    }

    /// The subset of settings the site adapters need
    pub fn adapter_options(&self) -> AdapterOptions {
        let min = self.human_delay_ms_min;
        AdapterOptions {
            referer: non_empty(self.referer.as_deref()).map(str::to_string),
            humanize: self.humanize,
            human_delay_ms: (min, self.human_delay_ms_max.max(min)),
            challenge_wait: Duration::from_millis(self.challenge_wait_ms),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Settings passed to every adapter call
#[derive(Debug, Clone, Default)]
pub struct AdapterOptions {
    pub referer: Option<String>,
    pub humanize: bool,
    /// Inclusive (min, max) pause in milliseconds; min <= max
    pub human_delay_ms: (u64, u64),
    pub challenge_wait: Duration,
}

/// One extraction request as handed over by the transport layer
#[derive(Debug, Deserialize, Clone)]
pub struct ParseRequest {
    pub url: String,

    /// Explicit site override; derived from the URL host when absent
    #[serde(default)]
    pub site: Option<Site>,

    /// Keep only the first N catalog entries; 0 keeps all
    #[serde(default)]
    pub chapters_limit: usize,

    #[serde(flatten)]
    pub config: ExtractionConfig,
}

impl ParseRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            site: None,
            chapters_limit: 0,
            config: ExtractionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_extraction_config() {
        let config = ExtractionConfig::default();
        assert!(config.save_storage_state);
        assert!(!config.humanize);
        assert_eq!(config.navigation_timeout(), Duration::from_secs(120));
        assert_eq!(config.challenge_wait_ms, 0);
    }

    #[test]
    fn test_navigation_timeout_is_clamped() {
        let mut config = ExtractionConfig::default();
        config.navigation_timeout_ms = 10;
        assert_eq!(config.navigation_timeout(), Duration::from_secs(5));
        config.navigation_timeout_ms = 10_000_000;
        assert_eq!(config.navigation_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_adapter_options_fix_inverted_delay_range() {
        let mut config = ExtractionConfig::default();
        config.human_delay_ms_min = 900;
        config.human_delay_ms_max = 100;
        config.referer = Some("   ".to_string());
        let opts = config.adapter_options();
        assert_eq!(opts.human_delay_ms, (900, 900));
        assert!(opts.referer.is_none());
    }

    #[test]
    fn test_parse_request_from_json() {
        let req: ParseRequest = serde_json::from_str(
            r#"{"url": "https://www.101kks.com/book/1.html", "site": "101kks",
                "chapters_limit": 3, "humanize": true, "cookie_header": " cf_clearance=abc "}"#,
        )
        .unwrap();
        assert_eq!(req.site, Some(Site::Kks101));
        assert_eq!(req.chapters_limit, 3);
        assert!(req.config.humanize);
        assert!(req.config.save_storage_state);
        assert_eq!(req.config.cookie_header_value(), Some("cf_clearance=abc"));
    }

    #[test]
    fn test_service_config_missing_file_uses_defaults() {
        let cfg = ServiceConfig::load_from(Path::new("/definitely/not/here.toml"));
        assert_eq!(cfg.storage_dir, PathBuf::from("/data"));
        assert!(cfg.headless);
    }
}
