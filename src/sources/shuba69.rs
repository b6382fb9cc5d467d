//! 69shuba: plain server-rendered pages, no challenge layer.

use super::{
    absolutize, author_from_labels, dedup_refs, document, first_attr, first_text, navigate,
    SiteAdapter,
};
use crate::browser::Page;
use crate::config::AdapterOptions;
use crate::error::{ExtractError, Phase};
use crate::models::{Book, Chapter, ChapterRef, Site};
use crate::text::{element_text, normalize};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

const CATALOG_LABEL: &str = "完整目录";

static CATALOG_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/book/\d+/all\.html$").expect("valid regex"));
static AUTHOR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"作者[:：]\s*([^\n\r]+)").expect("valid regex"));

static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid selector"));
static COVERS: LazyLock<[Selector; 2]> = LazyLock::new(|| {
    [
        Selector::parse(".bookimg2 img").expect("valid selector"),
        Selector::parse(".bookimg img").expect("valid selector"),
    ]
});
static SUMMARY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".jianjie").expect("valid selector"));
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").expect("valid selector"));
static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.txtnav h1").expect("valid selector"));
static CONTENT_ROOT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.txtnav").expect("valid selector"));
static CONTENT_NOISE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [".txtinfo", ".txtad", ".txtcenter", ".page1", "#txtright"]
        .iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
});

#[derive(Debug, Clone, Copy, Default)]
pub struct Shuba69;

/// Book metadata from a rendered book page
pub fn book_from_document(doc: &Html, url: &str) -> Book {
    let cover_url = COVERS
        .iter()
        .find_map(|sel| first_attr(doc, sel, "src"))
        .unwrap_or_default();

    let author = author_from_labels(doc)
        .or_else(|| author_from_body_text(doc))
        .unwrap_or_default();

    Book {
        title: first_text(doc, &TITLE).unwrap_or_default(),
        cover_url,
        description: normalize(&first_text(doc, &SUMMARY).unwrap_or_default()),
        author,
        catalog_url: find_catalog_url(doc, url).unwrap_or_default(),
        ..Book::default()
    }
}

fn author_from_body_text(doc: &Html) -> Option<String> {
    let body = doc.select(&BODY).next()?;
    let text = element_text(body, &[]);
    AUTHOR_LINE
        .captures(&text)
        .map(|c| c[1].trim().to_string())
        .filter(|a| !a.is_empty())
}

/// First link labelled as the full catalog, or pointing at `/book/<id>/all.html`
pub fn find_catalog_url(doc: &Html, url: &str) -> Option<String> {
    doc.select(&LINKS).find_map(|a| {
        let absolute = absolutize(url, a.value().attr("href")?)?;
        let label = super::text_content(a);
        (label.contains(CATALOG_LABEL) || CATALOG_HREF.is_match(&absolute)).then_some(absolute)
    })
}

/// Every `/txt/….html` link, with `data-num` as the chapter number when numeric
pub fn catalog_links(doc: &Html, catalog_url: &str) -> Vec<ChapterRef> {
    let refs = doc
        .select(&LINKS)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if !href.contains("/txt/") || !href.ends_with(".html") {
                return None;
            }
            let number = a
                .value()
                .attr("data-num")
                .map(str::trim)
                .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
                .and_then(|n| n.parse().ok());
            Some(ChapterRef {
                url: absolutize(catalog_url, href)?,
                title: super::text_content(a),
                number,
            })
        })
        .collect();
    dedup_refs(refs)
}

pub fn chapter_parts(doc: &Html) -> (String, String) {
    let title = first_text(doc, &HEADING).unwrap_or_default();
    let content = doc
        .select(&CONTENT_ROOT)
        .next()
        .map(|nav| element_text(nav, &CONTENT_NOISE))
        .unwrap_or_default();
    (title, normalize(&content))
}

impl SiteAdapter for Shuba69 {
    fn site(&self) -> Site {
        Site::Shuba69
    }

    fn fetch_book(
        &self,
        page: &dyn Page,
        url: &str,
        opts: &AdapterOptions,
    ) -> Result<Book, ExtractError> {
        log::info!("site=69shuba phase=book url={}", url);
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
        log::info!("site=69shuba phase=catalog url={}", catalog_url);
        navigate(page, Phase::Catalog, catalog_url, None)?;
        let doc = document(page, Phase::Catalog, catalog_url)?;
        let refs = catalog_links(&doc, catalog_url);
        log::info!("site=69shuba chapters={} url={}", refs.len(), catalog_url);
        Ok(refs)
    }

    fn fetch_chapter(
        &self,
        page: &dyn Page,
        url: &str,
        _opts: &AdapterOptions,
    ) -> Result<Chapter, ExtractError> {
        let phase = Phase::Chapter(None);
        navigate(page, phase, url, None)?;
        let doc = document(page, phase, url)?;
        let (title, content) = chapter_parts(&doc);
        Ok(Chapter {
            url: url.to_string(),
            title,
            content,
        })
    }
}
