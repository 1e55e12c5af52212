//! HTML to clean article text.
//!
//! Extraction walks the parsed document and skips non-content elements
//! (scripts, styles, navigation, headers, footers, iframes). When the page has
//! a semantic content container (`<article>`, `role="main"`, common
//! main-content classes) only those containers are read, otherwise the whole
//! `<body>`. Block elements become line breaks so [`clean_text`] can judge
//! the text line by line.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

/// Elements whose text never belongs to an article.
const STRIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "iframe", "noscript",
];

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "section",
    "article", "main", "blockquote", "pre", "table", "tr", "figcaption", "aside",
];

/// Lower-case phrases that mark a line as site chrome rather than content.
const BOILERPLATE_PHRASES: &[&str] = &[
    "accept cookies",
    "cookie policy",
    "privacy policy",
    "terms of service",
    "terms and conditions",
    "all rights reserved",
    "subscribe to our newsletter",
    "sign up for our newsletter",
    "share this article",
    "follow us on",
    "advertisement",
    "sponsored content",
];

/// Breadcrumb separators; short lines containing one are navigation.
const NAV_MARKERS: &[char] = &['›', '»'];

/// Lines with this many words or fewer are candidates for navigation fragments.
const NAV_MAX_WORDS: usize = 3;

static CONTENT_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "article, [role='main'], .main-content, #main-content, .post-content, .article-content, .entry-content",
    )
    .expect("content selector is valid")
});
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("title selector is valid"));
static BODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("body").expect("body selector is valid"));

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("url regex is valid"));
static REPEATED_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([.!?])(?:\s*[.!?])+").expect("punctuation regex is valid"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Title and cleaned body text of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub title: String,
    pub text: String,
}

/// Parse `html` and return its title and cleaned article text.
///
/// The text may be empty; length validation is the caller's job.
pub fn extract_article(html: &str, min_line_chars: usize) -> Extracted {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .unwrap_or_default();

    let containers: Vec<ElementRef<'_>> = document
        .select(&CONTENT_SELECTOR)
        .filter(|el| is_outermost_content(el))
        .collect();

    let mut raw = String::new();
    if containers.is_empty() {
        let root = document
            .select(&BODY_SELECTOR)
            .next()
            .unwrap_or_else(|| document.root_element());
        collect_text(root, &mut raw);
    } else {
        for container in containers {
            collect_text(container, &mut raw);
            raw.push('\n');
        }
    }

    Extracted {
        title,
        text: clean_text(&raw, min_line_chars),
    }
}

/// A container nested in another container (or in stripped chrome) is
/// skipped so its text is not read twice.
fn is_outermost_content(el: &ElementRef<'_>) -> bool {
    !el.ancestors().filter_map(ElementRef::wrap).any(|ancestor| {
        CONTENT_SELECTOR.matches(&ancestor) || STRIPPED_ELEMENTS.contains(&ancestor.value().name())
    })
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if STRIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    let block = BLOCK_ELEMENTS.contains(&name);
                    if block {
                        out.push('\n');
                    }
                    collect_text(child_el, out);
                    if block {
                        out.push('\n');
                    }
                }
            }
            _ => {}
        }
    }
}

/// Remove boilerplate lines and normalize the remaining text.
///
/// Lines shorter than `min_line_chars`, lines containing a boilerplate phrase
/// (case-insensitive) and short breadcrumb fragments are dropped. The kept
/// lines are joined with single spaces, embedded URLs are removed and runs of
/// sentence punctuation collapse to their first mark.
pub fn clean_text(text: &str, min_line_chars: usize) -> String {
    let kept: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| keep_line(line, min_line_chars))
        .collect();

    let joined = kept.join(" ");
    let without_urls = URL_RE.replace_all(&joined, "");
    let punctuated = REPEATED_PUNCT_RE.replace_all(&without_urls, "$1");
    collapse_whitespace(&punctuated)
}

fn keep_line(line: &str, min_line_chars: usize) -> bool {
    if line.chars().count() < min_line_chars {
        return false;
    }
    let lower = line.to_lowercase();
    if BOILERPLATE_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return false;
    }
    if line.split_whitespace().count() <= NAV_MAX_WORDS && line.contains(NAV_MARKERS) {
        return false;
    }
    true
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RE.replace_all(s, " ").trim().to_string()
}
