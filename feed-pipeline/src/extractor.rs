//! Boilerplate-aware text extraction from fetched article markup.
//!
//! The primary path walks the parsed document depth-first and drops whole
//! subtrees rooted at boilerplate elements. The fallback is a plain tag
//! stripper that never fails.

use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{Html, Node};

/// Hard cap on extracted text, in characters.
pub const MAX_EXTRACTED_CHARS: usize = 4000;

const BOILERPLATE_TAGS: [&str; 6] = ["script", "style", "nav", "header", "footer", "aside"];

fn is_boilerplate(tag: &str) -> bool {
    BOILERPLATE_TAGS.iter().any(|b| b.eq_ignore_ascii_case(tag))
}

/// Extracts readable prose, skipping boilerplate subtrees.
///
/// Returns `None` when nothing but whitespace survives.
pub fn extract_readable_text(markup: &str) -> Option<String> {
    let document = Html::parse_document(markup);

    let mut out = String::new();
    // Explicit stack keeps deeply nested input off the call stack.
    let mut stack = vec![(document.tree.root(), false)];

    while let Some((node, suppressed)) = stack.pop() {
        let suppressed = match node.value() {
            Node::Text(text) => {
                if !suppressed {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        out.push_str(trimmed);
                        out.push(' ');
                    }
                }
                continue;
            }
            Node::Element(element) => suppressed || is_boilerplate(element.name()),
            _ => suppressed,
        };

        for child in node.children().rev() {
            stack.push((child, suppressed));
        }
    }

    let text = out.trim();
    if text.is_empty() {
        return None;
    }
    Some(truncate_chars(text, MAX_EXTRACTED_CHARS).to_string())
}

/// Removes anything that looks like a tag and collapses whitespace.
pub fn strip_to_plain_text(markup: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"<[^>]+>").unwrap());

    let replaced = re_tags.replace_all(markup, " ");
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Primary extraction with the tag stripper as fallback.
pub fn extract_or_strip(markup: &[u8]) -> String {
    let markup = String::from_utf8_lossy(markup);
    match extract_readable_text(&markup) {
        Some(text) => text,
        None => strip_to_plain_text(&markup),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
