//! Text canonicalization and HTML-to-text helpers
//!
//! Everything that ends up in a `Book` description or a `Chapter` body goes
//! through [`normalize`] last, so the output of every adapter shares one
//! newline convention and one whitespace policy.

use regex::Regex;
use scraper::{ElementRef, Node, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static BR_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*br\s*/?\s*>").expect("valid regex"));
static P_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</\s*p\s*>").expect("valid regex"));
static P_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*p\b[^>]*>").expect("valid regex"));
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// Space variants that show up in CJK novel pages and get flattened to ' '
const UNICODE_SPACES: &[char] = &[
    '\u{00a0}', '\u{3000}', '\u{2002}', '\u{2003}', '\u{2009}', '\u{202f}',
];

/// Watermark lines carry the brand token plus one of these promotional words
const WATERMARK_BRAND: &str = "塔读";
const WATERMARK_CONTEXT: &[&str] = &["站点", "APP", "下载", "原文", "首发"];

/// Elements that start a new line when rendered like `innerText`
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figure", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "pre",
    "section", "table", "tr", "ul",
];

/// Canonicalize text: one newline style, plain spaces, trimmed lines and at
/// most one blank line between paragraphs. Idempotent.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let spaced: String = unified
        .chars()
        .map(|c| if UNICODE_SPACES.contains(&c) { ' ' } else { c })
        .collect();

    let trimmed_lines = spaced
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");

    BLANK_RUN
        .replace_all(&trimmed_lines, "\n\n")
        .trim()
        .to_string()
}

/// Convert an HTML fragment (as delivered by a JSON content endpoint) into
/// plain text, keeping paragraph and line breaks.
pub fn html_to_text(html: &str) -> String {
    let s = html.replace("\r\n", "\n");
    if !s.contains('<') && !s.contains('>') {
        return normalize(&html_escape::decode_html_entities(&s));
    }

    let s = BR_TAG.replace_all(&s, "\n");
    let s = P_CLOSE.replace_all(&s, "\n");
    let s = P_OPEN.replace_all(&s, "");
    let s = ANY_TAG.replace_all(&s, "");
    normalize(&html_escape::decode_html_entities(&s))
}

/// Render the text of a DOM subtree roughly the way a browser's `innerText`
/// does. Elements matching any `skip` selector are dropped with their
/// descendants, as are `script` and `style`.
pub fn element_text(element: ElementRef<'_>, skip: &[Selector]) -> String {
    let mut out = String::new();
    render_into(element, skip, &mut out);
    out.trim().to_string()
}

fn render_into(element: ElementRef<'_>, skip: &[Selector], out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_collapsed(out, text),
            Node::Element(el) => {
                let Some(child_ref) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = el.name();
                if name == "script" || name == "style" || skip.iter().any(|s| s.matches(&child_ref)) {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }

                let paragraph = name == "p";
                let block = paragraph || BLOCK_TAGS.contains(&name);
                if paragraph {
                    ensure_blank_line(out);
                } else if block {
                    ensure_line_break(out);
                }
                render_into(child_ref, skip, out);
                if paragraph {
                    ensure_blank_line(out);
                } else if block {
                    ensure_line_break(out);
                }
            }
            _ => {}
        }
    }
}

/// Collapse CSS whitespace the way `white-space: normal` does. Non-breaking
/// and ideographic spaces are content, not layout, and survive.
fn push_collapsed(out: &mut String, text: &str) {
    let mut pending_space = false;
    for c in text.chars() {
        if matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0c') {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() && !out.ends_with(['\n', ' ']) {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    if pending_space && !out.is_empty() && !out.ends_with(['\n', ' ']) {
        out.push(' ');
    }
}

fn ensure_line_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn ensure_blank_line(out: &mut String) {
    if out.is_empty() {
        return;
    }
    ensure_line_break(out);
    if !out.ends_with("\n\n") {
        out.push('\n');
    }
}

/// Drop site watermark lines (and blank lines) from chapter text.
pub fn strip_watermarks(text: &str) -> String {
    let kept = text
        .split('\n')
        .filter(|line| {
            let t = line.trim();
            if t.is_empty() {
                return false;
            }
            !(t.contains(WATERMARK_BRAND) && WATERMARK_CONTEXT.iter().any(|w| t.contains(w)))
        })
        .collect::<Vec<_>>()
        .join("\n");
    normalize(&kept)
}

/// Remove duplicates, keeping the first occurrence of each item.
pub fn dedup_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Collapse every whitespace run (including newlines) into one space.
pub fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_normalize_newlines_and_spaces() {
        let raw = "  第一章\r\n\u{3000}\u{3000}正文\rline\u{00a0}two  ";
        assert_eq!(normalize(raw), "第一章\n正文\nline two");
    }

    #[test]
    fn test_normalize_collapses_blank_runs() {
        assert_eq!(normalize("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(normalize("a\n \n\t\n  \nb"), "a\n\nb");
        assert_eq!(normalize("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "",
            "   ",
            "a\r\n\r\n\r\n\r\nb",
            "\u{2003}\u{2003}indent\n\n\n\u{3000}",
            "x\r\ry\n \n \n \nz  ",
            "line one\n\nline two\n",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_html_to_text_preserves_paragraphs() {
        let html = "<p>第一段&amp;更多</p><p class=\"x\">第二段<br/>换行</p>";
        assert_eq!(html_to_text(html), "第一段&更多\n第二段\n换行");
    }

    #[test]
    fn test_html_to_text_plain_input() {
        assert_eq!(html_to_text("  只是&lt;文本&gt;  "), "只是<文本>");
    }

    #[test]
    fn test_strip_watermarks() {
        let text = "正文一\n\n塔读小说APP下载\n塔读是个名字\n本书首发于塔读\n正文二";
        assert_eq!(strip_watermarks(text), "正文一\n塔读是个名字\n正文二");
    }

    #[test]
    fn test_element_text_skips_and_breaks() {
        let doc = Html::parse_fragment(
            r#"<div id="root"><h1>标题</h1><div class="txtad">广告</div>
               <script>var x = 1;</script>
               <p>第一段
                  继续</p><p>第二段</p>行<br>下一行</div>"#,
        );
        let root = doc
            .select(&Selector::parse("#root").unwrap())
            .next()
            .unwrap();
        let skip = [Selector::parse(".txtad").unwrap()];
        let text = normalize(&element_text(root, &skip));
        assert_eq!(text, "标题\n\n第一段 继续\n\n第二段\n\n行\n下一行");
    }

    #[test]
    fn test_dedup_preserving_order() {
        let tags = vec!["玄幻", "热血", "玄幻", "爽文", "热血"]
            .into_iter()
            .map(String::from);
        assert_eq!(dedup_preserving_order(tags), vec!["玄幻", "热血", "爽文"]);
    }
}
