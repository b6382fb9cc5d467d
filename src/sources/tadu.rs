//! tadu: chapter text arrives through a background JSON call
//! (`/getPartContentByCodeTable/<book>/<code>`) after the page loads.
//!
//! The chapter body is recovered by a chain of increasingly blunt tiers:
//! the intercepted response, the endpoint embedded in the page markup, a
//! probe over the small code space, and finally the rendered DOM.

use super::recovery::{probe_codes, RecoveryChain};
use super::{absolutize, dedup_refs, document, first_attr, meta_property, navigate, SiteAdapter};
use crate::browser::{CapturedResponse, FetchRequest, Page};
use crate::config::AdapterOptions;
use crate::error::{ExtractError, Phase};
use crate::models::{Book, Chapter, ChapterRef, Site};
use crate::text::{html_to_text, normalize, squash_whitespace, strip_watermarks};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::ops::RangeInclusive;
use std::sync::LazyLock;
use std::time::Duration;

const ORIGIN: &str = "https://www.tadu.com";
const CAPTURE_WAIT: Duration = Duration::from_secs(15);
const PROBE_RANGE: RangeInclusive<u32> = 1..=8;
/// Recovered text must be longer than this (in characters) to count
const MIN_CONTENT_CHARS: usize = 200;
const TITLE_BLOCKLIST: &[&str] = &["投银票", "投推荐票", "投月票", "打赏", "加入书架", "目录"];

static BOOK_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/book/(\d+)").expect("valid regex"));
static CHAPTER_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/book/(\d+)/(\d+)/?$").expect("valid regex"));
static CONTENT_ENDPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/getPartContentByCodeTable/(\d+)/(\d+)").expect("valid regex")
});

static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static CHAPTER_MORE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.chapterMore[href]").expect("valid selector"));
static HEADINGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2").expect("valid selector"));
static DOM_CONTAINERS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["article", ".content", "#content", ".chapter", ".read"]
        .iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
});

#[derive(Debug, Clone, Copy, Default)]
pub struct Tadu;

pub fn book_id(url: &str) -> Option<String> {
    BOOK_ID.captures(url).map(|c| c[1].to_string())
}

pub fn catalog_url_for(book_id: &str) -> String {
    format!("{}/book/catalogue/{}", ORIGIN, book_id)
}

pub fn book_from_document(doc: &Html, url: &str) -> Book {
    let title = meta_property(doc, "og:novel:book_name")
        .or_else(|| meta_property(doc, "og:title"))
        .unwrap_or_default();

    let id = book_id(url).or_else(|| {
        meta_property(doc, "og:novel:read_url")
            .as_deref()
            .and_then(book_id)
    });
    let catalog_url = match id {
        Some(id) => catalog_url_for(&id),
        None => first_attr(doc, &CHAPTER_MORE, "href")
            .and_then(|href| absolutize(url, &href))
            .unwrap_or_default(),
    };

    Book {
        title,
        cover_url: meta_property(doc, "og:image").unwrap_or_default(),
        description: normalize(&meta_property(doc, "og:description").unwrap_or_default()),
        author: meta_property(doc, "og:novel:author").unwrap_or_default(),
        category: meta_property(doc, "og:novel:category").unwrap_or_default(),
        catalog_url,
        ..Book::default()
    }
}

/// Links shaped like `/book/<book>/<chapter>/`, matched on the raw href
pub fn catalog_links(doc: &Html, catalog_url: &str) -> Vec<ChapterRef> {
    let refs = doc
        .select(&LINKS)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if !CHAPTER_HREF.is_match(href) {
                return None;
            }
            Some(ChapterRef {
                url: absolutize(catalog_url, href)?,
                title: super::text_content(a),
                number: None,
            })
        })
        .collect();
    dedup_refs(refs)
}

/// First heading that looks like a chapter title. Action buttons rendered as
/// headings are skipped.
pub fn chapter_title(doc: &Html) -> String {
    doc.select(&HEADINGS)
        .map(|h| squash_whitespace(&h.text().collect::<String>()))
        .filter(|t| !t.is_empty() && !TITLE_BLOCKLIST.contains(&t.as_str()))
        .find(|t| t.starts_with('第') || t.contains('章'))
        .unwrap_or_default()
}

/// `data.content` of an endpoint payload, when present and non-empty
pub fn payload_content(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body.trim()).ok()?;
    payload
        .get("data")?
        .get("content")?
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Content endpoint referenced anywhere in the page markup
pub fn embedded_endpoint(html: &str) -> Option<String> {
    CONTENT_ENDPOINT
        .find(html)
        .map(|m| format!("{}{}", ORIGIN, m.as_str()))
}

/// Text of the first generic content container that holds enough of it
pub fn dom_content(doc: &Html) -> Option<String> {
    DOM_CONTAINERS.iter().find_map(|sel| {
        let text = doc.select(sel).next().map(super::text_content)?;
        (text.chars().count() > MIN_CONTENT_CHARS).then_some(text)
    })
}

/// Call the content endpoint from inside the page, as the site's own XHR does
fn request_content(
    page: &dyn Page,
    endpoint: &str,
    chapter_url: &str,
    require_success: bool,
) -> Option<String> {
    match page.fetch(&FetchRequest::xhr(endpoint, chapter_url)) {
        Ok(response) if require_success && !response.is_success() => {
            log::debug!("site=tadu endpoint={} status={}", endpoint, response.status);
            None
        }
        Ok(response) => payload_content(&response.body),
        Err(e) => {
            log::debug!("site=tadu endpoint={} failed: {}", endpoint, e);
            None
        }
    }
}

fn captured_content(
    page: &dyn Page,
    captured: &CapturedResponse,
    chapter_url: &str,
) -> Option<String> {
    match &captured.body {
        Some(body) => payload_content(body),
        None => request_content(page, &captured.url, chapter_url, false),
    }
}

impl SiteAdapter for Tadu {
    fn site(&self) -> Site {
        Site::Tadu
    }

    fn fetch_book(
        &self,
        page: &dyn Page,
        url: &str,
        opts: &AdapterOptions,
    ) -> Result<Book, ExtractError> {
        log::info!("site=tadu phase=book url={}", url);
        navigate(page, Phase::Book, url, opts.referer.as_deref())?;
        let doc = document(page, Phase::Book, url)?;
        Ok(book_from_document(&doc, url))
    }

    fn fetch_catalog(
        &self,
        page: &dyn Page,
        catalog_url: &str,
        _opts: &AdapterOptions,
    ) -> Result<Vec<ChapterRef>, ExtractError> {
        log::info!("site=tadu phase=catalog url={}", catalog_url);
        navigate(page, Phase::Catalog, catalog_url, None)?;
        let doc = document(page, Phase::Catalog, catalog_url)?;
        let refs = catalog_links(&doc, catalog_url);
        log::info!("site=tadu chapters={} url={}", refs.len(), catalog_url);
        Ok(refs)
    }

    fn fetch_chapter(
        &self,
        page: &dyn Page,
        url: &str,
        _opts: &AdapterOptions,
    ) -> Result<Chapter, ExtractError> {
        let phase = Phase::Chapter(None);

        // The listener is armed before navigation so fast responses are not missed
        let captured = match page.goto_capturing(url, &CONTENT_ENDPOINT, CAPTURE_WAIT) {
            Ok(captured) => captured,
            Err(e) => {
                log::debug!("site=tadu capture navigation failed url={}: {}", url, e);
                let current = page.url().unwrap_or_default();
                if current.is_empty() || current == "about:blank" {
                    navigate(page, phase, url, None)?;
                }
                None
            }
        };

        let doc = document(page, phase, url)?;
        let html = doc.html();
        let title = chapter_title(&doc);

        let recovered = RecoveryChain::new()
            .tier("intercepted", || {
                captured.and_then(|c| captured_content(page, &c, url))
            })
            .tier("embedded-endpoint", || {
                let endpoint = embedded_endpoint(&html)?;
                request_content(page, &endpoint, url, false)
            })
            .tier("code-probe", || {
                let id = book_id(url)?;
                probe_codes(
                    PROBE_RANGE,
                    |code| {
                        let endpoint = format!("{}/getPartContentByCodeTable/{}/{}", ORIGIN, id, code);
                        request_content(page, &endpoint, url, true)
                    },
                    |content| content.chars().count() > MIN_CONTENT_CHARS,
                )
                .map(|(_, content)| content)
            })
            .tier("dom", || dom_content(&doc))
            .run();

        let content = match recovered {
            Some(r) => {
                log::debug!("site=tadu url={} content via {}", url, r.tier);
                strip_watermarks(&html_to_text(&r.value))
            }
            None => {
                log::warn!("site=tadu url={} no chapter content recovered", url);
                String::new()
            }
        };

        Ok(Chapter {
            url: url.to_string(),
            title,
            content,
        })
    }
}
