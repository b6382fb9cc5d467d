//! 101kks: metadata-rich pages behind an anti-bot challenge.
//!
//! Every navigation is followed by a challenge check, because the challenge
//! can come back at any point of a session, including between chapters.

use super::{
    absolutize, author_from_labels, dedup_refs, document, humanize, meta_property, navigate,
    SiteAdapter,
};
use crate::browser::Page;
use crate::challenge::ensure_clear;
use crate::config::AdapterOptions;
use crate::error::{ExtractError, Phase};
use crate::models::{Book, Chapter, ChapterRef, Site};
use crate::text::{dedup_preserving_order, element_text, normalize};
use scraper::{Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;

const CHAPTER_LIST_WAIT: Duration = Duration::from_secs(10);
const CHAPTER_LIST_FALLBACK_DELAY: Duration = Duration::from_secs(2);
const CHAPTER_LIST_READY: &str = "#tab_chapters li a[href*='/txt/']";

pub const TAGS_SCRIPT: &str =
    "(typeof bookinfo !== 'undefined' && bookinfo && bookinfo.tags) ? bookinfo.tags : ''";

static SCOPED_LINKS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"#tab_chapters li a[href*="/txt/"]"#).expect("valid selector")
});
static ALL_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/txt/"]"#).expect("valid selector"));
static SPAN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span").expect("valid selector"));
static HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.txtnav h1").expect("valid selector"));
static CONTENT_ROOT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.txtnav").expect("valid selector"));
static CONTENT_BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#txtcontent").expect("valid selector"));
static CONTENT_NOISE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        ".txtad",
        ".txtcenter",
        ".page1",
        ".tools",
        ".setbox",
        "#pageheadermenu",
        "#pagefootermenu",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("valid selector"))
    .collect()
});

#[derive(Debug, Clone, Copy, Default)]
pub struct Kks101;

impl Kks101 {
    /// Navigate, optionally act human, then make sure no challenge is shown
    fn open(
        &self,
        page: &dyn Page,
        phase: Phase,
        url: &str,
        referer: Option<&str>,
        opts: &AdapterOptions,
    ) -> Result<(), ExtractError> {
        navigate(page, phase, url, referer)?;
        humanize(page, opts);
        ensure_clear(page, phase, url, opts.challenge_wait)
    }

    fn tags(page: &dyn Page) -> Vec<String> {
        let raw = match page.evaluate(TAGS_SCRIPT) {
            Ok(value) => value.as_str().unwrap_or_default().to_string(),
            Err(e) => {
                log::debug!("site=101kks bookinfo.tags unavailable: {}", e);
                return Vec::new();
            }
        };
        dedup_preserving_order(
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        )
    }
}

/// Chapter links from the catalog page. The scoped chapter list is preferred;
/// every `/txt/` link on the page is the fallback.
pub fn catalog_links(doc: &Html, catalog_url: &str) -> Vec<ChapterRef> {
    let mut refs = collect_links(doc, &SCOPED_LINKS, catalog_url, true);
    if refs.is_empty() {
        refs = collect_links(doc, &ALL_LINKS, catalog_url, false);
    }
    dedup_refs(refs)
}

fn collect_links(doc: &Html, sel: &Selector, base: &str, prefer_span: bool) -> Vec<ChapterRef> {
    doc.select(sel)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            if !href.contains("/txt/") || !href.ends_with(".html") {
                return None;
            }
            let title_node = if prefer_span {
                a.select(&SPAN).next().unwrap_or(a)
            } else {
                a
            };
            Some(ChapterRef {
                url: absolutize(base, href)?,
                title: super::text_content(title_node),
                number: None,
            })
        })
        .collect()
}

/// Title and text of a rendered chapter page
pub fn chapter_parts(doc: &Html) -> (String, String) {
    let title = doc
        .select(&HEADING)
        .next()
        .map(super::text_content)
        .unwrap_or_default();

    let content = doc
        .select(&CONTENT_ROOT)
        .next()
        .map(|nav| {
            let body = nav.select(&CONTENT_BODY).next().unwrap_or(nav);
            element_text(body, &CONTENT_NOISE)
        })
        .unwrap_or_default();

    (title, normalize(&content))
}

impl SiteAdapter for Kks101 {
    fn site(&self) -> Site {
        Site::Kks101
    }

    fn fetch_book(
        &self,
        page: &dyn Page,
        url: &str,
        opts: &AdapterOptions,
    ) -> Result<Book, ExtractError> {
        log::info!("site=101kks phase=book url={}", url);
        self.open(page, Phase::Book, url, opts.referer.as_deref(), opts)?;

        let doc = document(page, Phase::Book, url)?;
        let author = meta_property(&doc, "og:novel:author")
            .or_else(|| author_from_labels(&doc))
            .unwrap_or_default();

        Ok(Book {
            title: meta_property(&doc, "og:title").unwrap_or_default(),
            cover_url: meta_property(&doc, "og:image").unwrap_or_default(),
            description: normalize(&meta_property(&doc, "og:description").unwrap_or_default()),
            author,
            category: meta_property(&doc, "og:novel:category").unwrap_or_default(),
            tags: Self::tags(page),
            catalog_url: meta_property(&doc, "og:novel:read_url").unwrap_or_default(),
            chapters: Vec::new(),
        })
    }

    fn fetch_catalog(
        &self,
        page: &dyn Page,
        catalog_url: &str,
        opts: &AdapterOptions,
    ) -> Result<Vec<ChapterRef>, ExtractError> {
        log::info!("site=101kks phase=catalog url={}", catalog_url);
        self.open(page, Phase::Catalog, catalog_url, None, opts)?;

        if let Err(e) = page.wait_for_selector(CHAPTER_LIST_READY, CHAPTER_LIST_WAIT) {
            log::debug!(
                "site=101kks chapter list not ready ({}), waiting {}ms",
                e,
                CHAPTER_LIST_FALLBACK_DELAY.as_millis()
            );
            page.pause(CHAPTER_LIST_FALLBACK_DELAY);
        }

        let doc = document(page, Phase::Catalog, catalog_url)?;
        let refs = catalog_links(&doc, catalog_url);
        if refs.is_empty() {
            log::warn!(
                "site=101kks no chapters found url={} page_url={} title={}",
                catalog_url,
                page.url().unwrap_or_default(),
                page.title().unwrap_or_default()
            );
        } else {
            log::info!("site=101kks chapters={} url={}", refs.len(), catalog_url);
        }
        Ok(refs)
    }

    fn fetch_chapter(
        &self,
        page: &dyn Page,
        url: &str,
        opts: &AdapterOptions,
    ) -> Result<Chapter, ExtractError> {
        let phase = Phase::Chapter(None);
        self.open(page, phase, url, None, opts)?;

        let doc = document(page, phase, url)?;
        let (title, content) = chapter_parts(&doc);
        Ok(Chapter {
            url: url.to_string(),
            title,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"<html><body>
        <div id="tab_chapters"><ul>
          <li><a href="/txt/77/1.html"><span>第一章 开始</span><i>new</i></a></li>
          <li><a href="/txt/77/2.html"><span>第二章 继续</span></a></li>
          <li><a href="/txt/77/1.html"><span>第一章 重复</span></a></li>
          <li><a href="/txt/77/index">目录</a></li>
        </ul></div>
        <a href="/txt/77/9.html">最新章节</a>
    </body></html>"#;

    #[test]
    fn test_catalog_prefers_scoped_list() {
        let doc = Html::parse_document(CATALOG);
        let refs = catalog_links(&doc, "https://www.101kks.com/book/77/index.html");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].url, "https://www.101kks.com/txt/77/1.html");
        assert_eq!(refs[0].title, "第一章 开始");
        assert_eq!(refs[1].title, "第二章 继续");
    }

    #[test]
    fn test_catalog_falls_back_to_all_links() {
        let doc = Html::parse_document(
            r#"<body><p><a href="/txt/5/1.html">第一章</a><a href="/book/5.html">书页</a></p></body>"#,
        );
        let refs = catalog_links(&doc, "https://www.101kks.com/book/5/index.html");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].title, "第一章");
    }

    #[test]
    fn test_chapter_strips_noise() {
        let doc = Html::parse_document(
            r#"<div class="txtnav">
                 <h1>第一章 开始</h1>
                 <div class="txtad">广告</div>
                 <div id="txtcontent">
                   <p>第一段</p>
                   <div class="txtcenter">推荐</div>
                   <p>第二段</p>
                   <script>var x = 1;</script>
                 </div>
                 <div class="page1">上一章 下一章</div>
               </div>"#,
        );
        let (title, content) = chapter_parts(&doc);
        assert_eq!(title, "第一章 开始");
        assert_eq!(content, "第一段\n\n第二段");
    }

    #[test]
    fn test_chapter_without_container() {
        let doc = Html::parse_document("<body><p>nothing</p></body>");
        assert_eq!(chapter_parts(&doc), (String::new(), String::new()));
    }
}
