//! Text extraction from DOM elements.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};

/// Elements that end a paragraph in the formatted-text walk.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
];

/// Elements whose text is never part of a message.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

static EXCESS_BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

static INLINE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Trim every line, compress 3+ line breaks to one blank line, trim the result.
pub fn normalize(text: &str) -> String {
    let trimmed_lines = text.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    EXCESS_BREAKS
        .replace_all(&trimmed_lines, "\n\n")
        .trim()
        .to_string()
}

/// Collapse every whitespace run (including newlines) to one space.
pub fn collapse_whitespace(text: &str) -> String {
    INLINE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Raw concatenated text of the element, normalized.
pub fn raw_text(element: ElementRef<'_>) -> String {
    normalize(&element.text().collect::<String>())
}

/// Depth-first walk over descendant text nodes, inserting a paragraph break
/// after block-level elements and `<br>`.
pub fn formatted_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    walk(element, &mut out);
    normalize(&out)
}

fn walk(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }

    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let collapsed = INLINE_WHITESPACE.replace_all(text, " ");
            // Drop whitespace-only runs at the start of a paragraph.
            if out.is_empty() || out.ends_with('\n') {
                out.push_str(collapsed.trim_start());
            } else {
                out.push_str(&collapsed);
            }
        } else if let Some(child_element) = ElementRef::wrap(child) {
            walk(child_element, out);
        }
    }

    if name == "br" || BLOCK_ELEMENTS.contains(&name) {
        out.push_str("\n\n");
    }
}

/// Ordered text extraction: content selectors, then the formatted walk, then raw text.
#[derive(Debug, Clone)]
pub struct TextExtractor {
    content_selectors: Vec<Selector>,
}

impl TextExtractor {
    pub fn new(content_selectors: Vec<Selector>) -> Self {
        Self { content_selectors }
    }

    /// Extractor that reads the whole element with the formatted walk.
    pub fn formatted() -> Self {
        Self::new(Vec::new())
    }

    /// Returns `None` when the element normalizes to empty content.
    pub fn extract(&self, element: ElementRef<'_>) -> Option<String> {
        for selector in &self.content_selectors {
            if let Some(content) = element.select(selector).next() {
                let text = formatted_text(content);
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }

        let text = formatted_text(element);
        if !text.is_empty() {
            return Some(text);
        }

        let text = raw_text(element);
        (!text.is_empty()).then_some(text)
    }
}
