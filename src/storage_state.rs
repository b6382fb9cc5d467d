//! Persisted cookie and localStorage snapshot
//!
//! The file layout matches the storage-state JSON written by Playwright, so
//! snapshots captured by earlier tooling (or by hand from a real browser
//! session) can be dropped into the storage directory as-is. One file holds
//! one site's long-lived session. Reads and writes are not locked; two
//! requests against the same site race and the last writer wins.

use crate::browser::BrowserError;
use crate::models::Site;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<OriginStorage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix seconds; -1 for session cookies
    #[serde(default = "default_expires")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OriginStorage {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

fn default_path() -> String { "/".to_string() }
fn default_expires() -> f64 { -1.0 }

impl StoredCookie {
    /// Build from a CDP `Network.Cookie` serialized to JSON
    pub fn from_cdp(cookie: &Value) -> Option<Self> {
        let name = cookie.get("name")?.as_str()?.to_string();
        let value = cookie.get("value")?.as_str()?.to_string();
        let session = cookie.get("session").and_then(Value::as_bool).unwrap_or(false);
        let expires = if session {
            -1.0
        } else {
            cookie.get("expires").and_then(Value::as_f64).unwrap_or(-1.0)
        };
        Some(Self {
            name,
            value,
            domain: str_field(cookie, "domain"),
            path: cookie
                .get("path")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(default_path),
            expires,
            http_only: cookie.get("httpOnly").and_then(Value::as_bool).unwrap_or(false),
            secure: cookie.get("secure").and_then(Value::as_bool).unwrap_or(false),
            same_site: cookie
                .get("sameSite")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    fn same_identity(&self, other: &StoredCookie) -> bool {
        self.name == other.name
            && self.domain.eq_ignore_ascii_case(&other.domain)
            && self.path == other.path
    }

    /// JSON shaped like a CDP `Network.CookieParam`
    pub fn to_cdp_param(&self) -> Value {
        let mut param = json!({
            "name": self.name,
            "value": self.value,
            "domain": self.domain,
            "path": self.path,
            "secure": self.secure,
            "httpOnly": self.http_only,
        });
        if self.expires > 0.0 {
            param["expires"] = json!(self.expires);
        }
        if let Some(same_site) = self.same_site.as_deref().and_then(cdp_same_site) {
            param["sameSite"] = json!(same_site);
        }
        param
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn cdp_same_site(value: &str) -> Option<&'static str> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Some("Strict"),
        "lax" => Some("Lax"),
        "none" => Some("None"),
        _ => None,
    }
}

impl StorageState {
    /// Read the snapshot at `path`; `Ok(None)` when no file exists yet.
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>, BrowserError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|e| {
            BrowserError::StorageStateError(format!("read {}: {}", path.display(), e))
        })?;
        let state = serde_json::from_str(&content).map_err(|e| {
            BrowserError::StorageStateError(format!("parse {}: {}", path.display(), e))
        })?;
        Ok(Some(state))
    }

    pub fn save(&self, path: &Path) -> Result<(), BrowserError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                BrowserError::StorageStateError(format!("create {}: {}", parent.display(), e))
            })?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| BrowserError::StorageStateError(e.to_string()))?;
        fs::write(path, content).map_err(|e| {
            BrowserError::StorageStateError(format!("write {}: {}", path.display(), e))
        })
    }

    /// Fold the browser's live cookies into the snapshot. A live cookie
    /// replaces the stored one with the same (name, domain, path); stored
    /// cookies the browser did not report are kept.
    pub fn merge_cookies(&mut self, live: impl IntoIterator<Item = StoredCookie>) {
        for cookie in live {
            match self.cookies.iter_mut().find(|c| c.same_identity(&cookie)) {
                Some(existing) => *existing = cookie,
                None => self.cookies.push(cookie),
            }
        }
    }

    /// Replace (or add) the localStorage snapshot of one origin
    pub fn upsert_origin(&mut self, origin: OriginStorage) {
        match self.origins.iter_mut().find(|o| o.origin == origin.origin) {
            Some(existing) => *existing = origin,
            None => self.origins.push(origin),
        }
    }
}

/// `<root>/<site>_storage.json`, or `<root>/<hostname>_storage.json` when the
/// site is not one we know. `None` when the URL has no host.
pub fn default_storage_path(root: &Path, site: Site, url: &str) -> Option<PathBuf> {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .filter(|h| !h.is_empty())?;
    let stem = match site {
        Site::Unknown => host,
        known => known.as_str().to_string(),
    };
    Some(root.join(format!("{}_storage.json", stem)))
}
