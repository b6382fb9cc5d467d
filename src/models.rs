use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use url::Url;

/// Supported novel hosts
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Site {
    #[serde(rename = "69shuba")]
    Shuba69,
    #[serde(rename = "101kks")]
    Kks101,
    #[serde(rename = "tadu")]
    Tadu,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Site {
    /// Derive the site from the hostname of a book URL
    pub fn detect(url: &str) -> Site {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_default();

        if host.ends_with("69shuba.com") {
            Site::Shuba69
        } else if host.ends_with("101kks.com") {
            Site::Kks101
        } else if host.ends_with("tadu.com") {
            Site::Tadu
        } else {
            Site::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Site::Shuba69 => "69shuba",
            Site::Kks101 => "101kks",
            Site::Tadu => "tadu",
            Site::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChapterRef {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub number: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Book {
    pub title: String,
    #[serde(default)]
    pub cover_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub catalog_url: String,
    #[serde(default)]
    pub chapters: Vec<ChapterRef>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Chapter {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DebugInfo {
    pub storage_state_path: Option<PathBuf>,
}

/// Full extraction result handed back to the transport layer
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ParseResult {
    pub site: Site,
    pub book: Book,
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub debug: DebugInfo,
}
