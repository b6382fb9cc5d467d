use crate::config::ExtractionConfig;
use std::time::Duration;

/// Launch-time settings for one browser process, derived from a request's
/// `ExtractionConfig`
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Run browser in headless mode
    pub headless: bool,

    /// Browser window size; `None` keeps Chrome's default
    pub window_size: Option<(u32, u32)>,

    /// Default navigation/interaction timeout
    pub timeout: Duration,

    /// Kill the browser after this long without DevTools traffic
    pub idle_timeout: Duration,

    /// Additional Chrome flags
    pub chrome_flags: Vec<String>,
}

impl LaunchSettings {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        let mut chrome_flags = vec![
            // Hides the most obvious automation flag, nothing more
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
        ];

        let window_size = if config.humanize {
            if let Some(locale) = humanize_value(config.locale.as_deref()) {
                chrome_flags.push(format!("--lang={}", locale));
            }
            Some((config.viewport_width, config.viewport_height))
        } else {
            None
        };

        let timeout = config.navigation_timeout();
        Self {
            headless: config.headless,
            window_size,
            timeout,
            idle_timeout: timeout
                + Duration::from_millis(config.challenge_wait_ms)
                + Duration::from_secs(60),
            chrome_flags,
        }
    }
}

pub(crate) fn humanize_value(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `Accept-Language` header value matching a browser locale such as `ru-RU`
pub fn accept_language(locale: &str) -> String {
    match locale.split_once('-') {
        Some((lang, _)) => format!("{},{};q=0.9", locale, lang),
        None => locale.to_string(),
    }
}

/// Init script that masks the common automation fingerprints. Runs before
/// any page script on every new document.
pub const STEALTH_SCRIPT: &str = r#"
(() => {
  try {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
  } catch (e) {}
  try {
    window.chrome = window.chrome || { runtime: {} };
  } catch (e) {}
  try {
    const langs = navigator.languages;
    Object.defineProperty(navigator, 'languages', {
      get: () => (langs && langs.length ? langs : ['en-US', 'en'])
    });
  } catch (e) {}
  try {
    const plugins = navigator.plugins;
    Object.defineProperty(navigator, 'plugins', {
      get: () => (plugins && plugins.length ? plugins : [1, 2, 3, 4, 5])
    });
  } catch (e) {}
  try {
    const ua = navigator.userAgent;
    if (ua.includes('HeadlessChrome')) {
      Object.defineProperty(navigator, 'userAgent', {
        get: () => ua.replace('HeadlessChrome', 'Chrome')
      });
    }
  } catch (e) {}
})();
"#;

/// Builds the script that seeds one origin's localStorage on page load
pub fn local_storage_script(origin: &str, entries: &[(String, String)]) -> String {
    let entries = serde_json::to_string(entries).unwrap_or_else(|_| "[]".to_string());
    let origin = serde_json::Value::String(origin.to_string());
    format!(
        r#"(() => {{
  try {{
    if (location.origin !== {origin}) return;
    for (const [k, v] of {entries}) {{
      if (localStorage.getItem(k) === null) localStorage.setItem(k, v);
    }}
  }} catch (e) {{}}
}})();"#
    )
}
