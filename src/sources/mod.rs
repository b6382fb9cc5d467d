//! Site adapters
//!
//! Each supported host gets one [`SiteAdapter`] that knows where that site
//! keeps its book metadata, its chapter list and its chapter text. Adapters
//! drive a [`Page`] and read the rendered document with `scraper`.

pub mod kks101;
pub mod recovery;
pub mod shuba69;
pub mod tadu;

use crate::browser::Page;
use crate::config::AdapterOptions;
use crate::error::{ExtractError, Phase};
use crate::models::{Book, Chapter, ChapterRef, Site};
use crate::text::squash_whitespace;
use rand::Rng;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

pub use self::kks101::Kks101;
pub use self::shuba69::Shuba69;
pub use self::tadu::Tadu;

static BOOKNAV: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.booknav2").expect("valid selector"));
static PARAGRAPH: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("valid selector"));
static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("valid selector"));

const AUTHOR_LABELS: &[&str] = &["作者：", "作者:"];

const SCROLL_SCRIPT: &str = r#"(() => {
  const h = Math.max(document.body.scrollHeight, document.documentElement.scrollHeight);
  const y = Math.min(h, 600 + Math.floor(Math.random() * 800));
  window.scrollTo(0, y);
  return y;
})()"#;

/// Book, catalog and chapter extraction for one host
pub trait SiteAdapter: Send + Sync {
    fn site(&self) -> Site;

    /// Navigate to a book page and read its metadata. `catalog_url` is left
    /// empty when the page does not expose one.
    fn fetch_book(
        &self,
        page: &dyn Page,
        url: &str,
        opts: &AdapterOptions,
    ) -> Result<Book, ExtractError>;

    /// Chapter references in catalog order, deduplicated by absolute URL
    fn fetch_catalog(
        &self,
        page: &dyn Page,
        catalog_url: &str,
        opts: &AdapterOptions,
    ) -> Result<Vec<ChapterRef>, ExtractError>;

    fn fetch_chapter(
        &self,
        page: &dyn Page,
        url: &str,
        opts: &AdapterOptions,
    ) -> Result<Chapter, ExtractError>;
}

static KKS101: Kks101 = Kks101;
static SHUBA69: Shuba69 = Shuba69;
static TADU: Tadu = Tadu;

/// Adapter registered for `site`; `None` for [`Site::Unknown`]
pub fn adapter_for(site: Site) -> Option<&'static dyn SiteAdapter> {
    match site {
        Site::Kks101 => Some(&KKS101),
        Site::Shuba69 => Some(&SHUBA69),
        Site::Tadu => Some(&TADU),
        Site::Unknown => None,
    }
}

/// Navigate, mapping driver failures to the given phase
pub(crate) fn navigate(
    page: &dyn Page,
    phase: Phase,
    url: &str,
    referer: Option<&str>,
) -> Result<(), ExtractError> {
    log::debug!("navigate phase={} url={}", phase, url);
    page.goto(url, referer)
        .map_err(|e| ExtractError::from_browser(phase, url, e))
}

/// Parse the current document, mapping driver failures to the given phase
pub(crate) fn document(page: &dyn Page, phase: Phase, url: &str) -> Result<Html, ExtractError> {
    page.document()
        .map_err(|e| ExtractError::from_browser(phase, url, e))
}

/// Random pause within the configured range plus a random scroll, when
/// humanization is on. Failures are ignored.
pub(crate) fn humanize(page: &dyn Page, opts: &AdapterOptions) {
    if !opts.humanize {
        return;
    }
    human_pause(page, opts.human_delay_ms);
    human_scroll(page);
}

pub(crate) fn human_pause(page: &dyn Page, (min, max): (u64, u64)) {
    let max = max.max(min);
    let delay = rand::thread_rng().gen_range(min..=max);
    page.pause(Duration::from_millis(delay));
}

pub(crate) fn human_scroll(page: &dyn Page) {
    if let Err(e) = page.evaluate(SCROLL_SCRIPT) {
        log::debug!("scroll failed: {}", e);
    }
}

/// Resolve `href` against `base`
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(String::from)
}

/// Keep the first reference for each URL, preserving order
pub fn dedup_refs(refs: Vec<ChapterRef>) -> Vec<ChapterRef> {
    let mut seen = HashSet::new();
    refs.into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

pub(crate) fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// `content` of `<meta property="...">`, trimmed; `None` when absent or blank
pub fn meta_property(doc: &Html, property: &str) -> Option<String> {
    let sel = selector(&format!(r#"meta[property="{}"]"#, property))?;
    doc.select(&sel)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `textContent` of an element, trimmed
pub(crate) fn text_content(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

pub(crate) fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .map(text_content)
        .filter(|t| !t.is_empty())
}

pub(crate) fn first_attr(doc: &Html, sel: &Selector, attr: &str) -> Option<String> {
    doc.select(sel)
        .next()
        .and_then(|e| e.value().attr(attr))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Scan paragraphs (inside `div.booknav2` when present) for an author label.
/// Link text inside the labelled paragraph wins over the label remainder.
pub fn author_from_labels(doc: &Html) -> Option<String> {
    let root = doc
        .select(&BOOKNAV)
        .next()
        .unwrap_or_else(|| doc.root_element());

    for p in root.select(&PARAGRAPH) {
        let line = squash_whitespace(&p.text().collect::<String>());
        let Some(rest) = AUTHOR_LABELS.iter().find_map(|l| line.strip_prefix(*l)) else {
            continue;
        };
        let author = match p.select(&LINK).next() {
            Some(a) => text_content(a),
            None => rest.trim().to_string(),
        };
        return Some(author).filter(|a| !a.is_empty());
    }
    None
}
