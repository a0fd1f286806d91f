//! Page content extraction for crawled HTML and plain-text responses.
//!
//! HTML is parsed with `scraper`. The readable text comes from the first of
//! `<main>`, `<article>` or `<body>` that exists; boilerplate and non-content
//! elements are skipped, whitespace is collapsed, and block-level elements are
//! separated by blank lines. Links are collected from the whole document so
//! navigation menus still feed the crawl frontier.

use std::sync::OnceLock;

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::urlnorm;

/// Result of extracting one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub title: Option<String>,
    pub text: String,
    /// Absolute http(s) links in document order, deduplicated.
    pub links: Vec<Url>,
}

const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "footer", "header", "svg", "iframe",
    "form", "button", "select",
];

const BLOCKS: &[&str] = &[
    "p", "div", "section", "article", "main", "aside", "h1", "h2", "h3", "h4", "h5", "h6", "ul",
    "ol", "li", "dl", "dt", "dd", "table", "thead", "tbody", "tr", "td", "th", "pre", "blockquote",
    "figure", "figcaption", "br", "hr", "address", "details", "summary",
];

struct Selectors {
    title: Selector,
    base: Selector,
    anchors: Selector,
    main: Selector,
    article: Selector,
    body: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        title: Selector::parse("title").expect("title selector"),
        base: Selector::parse("base[href]").expect("base selector"),
        anchors: Selector::parse("a[href]").expect("anchor selector"),
        main: Selector::parse("main").expect("main selector"),
        article: Selector::parse("article").expect("article selector"),
        body: Selector::parse("body").expect("body selector"),
    })
}

/// Extract title, readable text and outgoing links from an HTML document
/// fetched from `page_url`.
pub fn extract_page(page_url: &Url, html: &str) -> Extracted {
    let document = Html::parse_document(html);
    let sel = selectors();

    let title = document
        .select(&sel.title)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let base = document
        .select(&sel.base)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| urlnorm::resolve(page_url, href))
        .unwrap_or_else(|| page_url.clone());

    let mut links: Vec<Url> = Vec::new();
    for anchor in document.select(&sel.anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if let Some(mut link) = urlnorm::resolve(&base, href) {
            link.set_fragment(None);
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }

    let root = document
        .select(&sel.main)
        .next()
        .or_else(|| document.select(&sel.article).next())
        .or_else(|| document.select(&sel.body).next())
        .unwrap_or_else(|| document.root_element());

    let mut collector = TextCollector::default();
    collector.walk(root);

    Extracted {
        title,
        text: collector.finish(),
        links,
    }
}

/// Wrap a `text/plain` response: trimmed text, no title, no links.
pub fn extract_plain(text: &str) -> Extracted {
    Extracted {
        title: None,
        text: text.trim().to_string(),
        links: Vec::new(),
    }
}

#[derive(Default)]
struct TextCollector {
    inline: String,
    blocks: Vec<String>,
}

impl TextCollector {
    fn walk(&mut self, element: ElementRef<'_>) {
        let name = element.value().name();
        if SKIPPED.contains(&name) {
            return;
        }
        let is_block = BLOCKS.contains(&name);
        if is_block {
            self.flush();
        }
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.inline.push_str(&**text),
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        self.walk(el);
                    }
                }
                _ => {}
            }
        }
        if is_block {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let block = collapse_whitespace(&self.inline);
        self.inline.clear();
        if !block.is_empty() {
            self.blocks.push(block);
        }
    }

    fn finish(mut self) -> String {
        self.flush();
        self.blocks.join("\n\n")
    }
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
