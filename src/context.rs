//! Left/right context windows around a mention.
//!
//! Two policies are available: a fixed character clip, and a token budget
//! split evenly between both sides with the unused share of a short side
//! handed to the other side.

use clap::ValueEnum;
use lazy_static::lazy_static;
use regex::Regex;

/// Characters kept on each side by the character policy
pub const CHAR_SIDE: usize = 256;
/// Total tokens kept by the token policy
pub const TOKEN_TOTAL: usize = 256;
/// Default tokens per side for the token policy
pub const TOKEN_SIDE: usize = TOKEN_TOTAL / 2;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref INNERMOST_TEMPLATE: Regex = Regex::new(r"\{\{[^{}]*\}\}").unwrap();
    static ref WIKILINK: Regex = Regex::new(r"\[\[(?:[^\[\]|]*\|)?([^\[\]|]*)\]\]").unwrap();
    static ref PIPE_LINE: Regex = Regex::new(r"(?m)^[^\n]*\|[ \t\r]*$").unwrap();
    static ref TABLE_ROW: Regex = Regex::new(r"(?m)^[ \t]*(?:\{\||\|\}|\||!)[^\n]*$").unwrap();
    static ref EMPHASIS_OR_HEADING: Regex = Regex::new(r"'{2,}|={2,}").unwrap();
    static ref WORD_TOKEN: Regex = Regex::new(r"\w+(?:['’-]\w+)*|[^\w\s]").unwrap();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum WindowPolicy {
    /// Up to 256 characters on each side once the article is long enough
    #[default]
    Character,
    /// 256 word tokens split 128/128, rebalanced when one side is short
    Token,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextWindow {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextWindower {
    policy: WindowPolicy,
}

impl ContextWindower {
    pub fn new(policy: WindowPolicy) -> Self {
        ContextWindower { policy }
    }

    /// Context around the byte span `start..end` of `text`.
    ///
    /// Offsets outside the text or off a char boundary are clamped rather
    /// than rejected.
    pub fn window(&self, text: &str, start: usize, end: usize) -> ContextWindow {
        let start = floor_char_boundary(text, start.min(text.len()));
        let end = floor_char_boundary(text, end.clamp(start, text.len()));
        let (left, right) = (&text[..start], &text[end..]);

        match self.policy {
            WindowPolicy::Character => {
                let text_chars = text.chars().count();
                let link_chars = link_content(&text[start..end]).chars().count();
                character_window(left, right, text_chars - link_chars > 2 * CHAR_SIDE)
            }
            WindowPolicy::Token => token_window(left, right),
        }
    }
}

/// Inner text of a `[[...]]` span, trimmed; other spans are returned as is.
fn link_content(span: &str) -> &str {
    span.strip_prefix("[[")
        .and_then(|inner| inner.strip_suffix("]]"))
        .map(str::trim)
        .unwrap_or(span)
}

fn character_window(left: &str, right: &str, clip: bool) -> ContextWindow {
    if !clip {
        return ContextWindow {
            left: left.to_string(),
            right: right.to_string(),
        };
    }
    ContextWindow {
        left: last_chars(left, CHAR_SIDE).to_string(),
        right: first_chars(right, CHAR_SIDE).to_string(),
    }
}

fn token_window(left: &str, right: &str) -> ContextWindow {
    let (left_clean, right_clean) = (clean_markup(left), clean_markup(right));
    let left_tokens = tokenize(&left_clean);
    let right_tokens = tokenize(&right_clean);
    let (take_left, take_right) = token_budget(left_tokens.len(), right_tokens.len());

    ContextWindow {
        left: left_tokens[left_tokens.len() - take_left..].join(" "),
        right: right_tokens[..take_right].join(" "),
    }
}

/// How many tokens to keep from the end of the left side and the start of
/// the right side.
pub fn token_budget(left_count: usize, right_count: usize) -> (usize, usize) {
    match (left_count >= TOKEN_SIDE, right_count >= TOKEN_SIDE) {
        (true, true) => (TOKEN_SIDE, TOKEN_SIDE),
        (false, true) => (left_count, (TOKEN_TOTAL - left_count).min(right_count)),
        (true, false) => ((TOKEN_TOTAL - right_count).min(left_count), right_count),
        (false, false) => (left_count, right_count),
    }
}

/// Strip tags, templates, table rows and link brackets, keeping link display text.
///
/// A template cut in half by the mention (an unclosed `{{` or an unopened
/// `}}`) is dropped up to the cut.
pub fn clean_markup(text: &str) -> String {
    let mut cleaned = TAG.replace_all(text, " ").into_owned();
    // Innermost first so nested templates unwind completely
    while INNERMOST_TEMPLATE.is_match(&cleaned) {
        cleaned = INNERMOST_TEMPLATE.replace_all(&cleaned, " ").into_owned();
    }
    let cleaned = drop_partial_templates(&cleaned);
    let cleaned = TABLE_ROW.replace_all(cleaned, "");
    let cleaned = PIPE_LINE.replace_all(&cleaned, "");
    let cleaned = WIKILINK.replace_all(&cleaned, "$1");
    EMPHASIS_OR_HEADING.replace_all(&cleaned, " ").into_owned()
}

/// Once matched pairs are gone, every leftover `}}` closes a template opened
/// before `text` and every leftover `{{` opens one closed after it.
fn drop_partial_templates(text: &str) -> &str {
    let text = match text.rfind("}}") {
        Some(idx) => &text[idx + 2..],
        None => text,
    };
    match text.find("{{") {
        Some(idx) => &text[..idx],
        None => text,
    }
}

pub fn tokenize(text: &str) -> Vec<&str> {
    WORD_TOKEN.find_iter(text).map(|m| m.as_str()).collect()
}

fn last_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((idx, _)) if n > 0 => &s[idx..],
        _ if n == 0 => "",
        _ => s,
    }
}

fn first_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
