//! Regex-based scanning of raw wikitext: redirect directives, in-text links,
//! and removal of the infobox / external-links noise that should not produce
//! mentions.

use crate::error::ConfigError;
use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;
use std::ops::Range;

lazy_static! {
    // Colons are excluded so Category:, File:, Template: and interwiki links never match.
    // Bracket characters are excluded so nested links resolve to the innermost span.
    static ref ANCHOR_PATTERN: Regex = Regex::new(r"\[\[([^\]\[:]*)\]\]").unwrap();
    static ref INFOBOX_OPEN: Regex = Regex::new(r"(?i)\{\{\s*Infobox").unwrap();
    static ref EXTERNAL_LINKS_HEADING: Regex = Regex::new(r"(?i)==+\s*External\s+links\s*==+").unwrap();
}

/// One `[[target|anchor]]` occurrence with its byte span in the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorMatch {
    pub anchor: String,
    pub target: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct MarkupScanner {
    redirect_pattern: Regex,
}

impl MarkupScanner {
    /// Build a scanner recognising any of `keywords` as a redirect directive.
    ///
    /// Fails when no keyword is left after trimming blanks.
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self, ConfigError> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one redirect keyword is required".to_string(),
            ));
        }
        let pattern = format!(r"(?i)(?:{})\s*\[\[([^\]\[]*)\]\]", alternatives.join("|"));
        Ok(MarkupScanner {
            redirect_pattern: Regex::new(&pattern)?,
        })
    }

    /// All redirect targets in document order.
    pub fn find_redirects(&self, text: &str) -> Vec<String> {
        self.redirect_pattern
            .captures_iter(text)
            .filter_map(|cap| {
                let captured = cap.get(1)?.as_str().trim();
                let target = match captured.split_once('|') {
                    Some((link, _)) => strip_section(link),
                    None => captured,
                };
                let target = target.trim();
                if target.is_empty() {
                    None
                } else {
                    Some(target.to_string())
                }
            })
            .collect()
    }

    /// All in-text links in document order.
    ///
    /// The bracketed target of a redirect directive is not an in-text link
    /// and is skipped.
    pub fn find_anchors(&self, text: &str) -> Vec<AnchorMatch> {
        let redirect_spans = self.redirect_link_spans(text);

        ANCHOR_PATTERN
            .captures_iter(text)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                if redirect_spans.iter().any(|span| span.start == whole.start()) {
                    return None;
                }
                let (anchor, target) = split_link(cap.get(1)?.as_str())?;
                Some(AnchorMatch {
                    anchor: anchor.to_string(),
                    target: target.to_string(),
                    start: whole.start(),
                    end: whole.end(),
                })
            })
            .collect()
    }

    /// Remove the first infobox block and everything from the
    /// "External links" heading onward.
    pub fn strip_noise(&self, text: &str) -> String {
        let without_infobox = remove_infobox(text);
        truncate_external_links(&without_infobox).to_string()
    }

    fn redirect_link_spans(&self, text: &str) -> Vec<Range<usize>> {
        self.redirect_pattern
            .captures_iter(text)
            .filter_map(|cap| {
                let inner = cap.get(1)?;
                Some(inner.start() - 2..inner.end() + 2)
            })
            .collect()
    }
}

/// Articles outside the main namespace ("Category:Foo", "Template:Bar").
pub fn is_namespaced(article_name: &str) -> bool {
    article_name.contains(':')
}

/// Split link content into `(anchor, target)`; `None` when either side is empty.
fn split_link(inner: &str) -> Option<(&str, &str)> {
    let inner = inner.trim();
    let (anchor, target) = match inner.rsplit_once('|') {
        Some((link, anchor)) => (anchor.trim(), strip_section(link.trim()).trim()),
        None => (inner, inner),
    };
    if anchor.is_empty() || target.is_empty() {
        None
    } else {
        Some((anchor, target))
    }
}

fn strip_section(link: &str) -> &str {
    match link.find('#') {
        Some(idx) => &link[..idx],
        None => link,
    }
}

fn remove_infobox(text: &str) -> Cow<'_, str> {
    let Some(open) = INFOBOX_OPEN.find(text) else {
        return Cow::Borrowed(text);
    };
    match balanced_brace_end(text, open.start()) {
        Some(end) => {
            let mut out = String::with_capacity(text.len() - (end - open.start()));
            out.push_str(&text[..open.start()]);
            out.push_str(&text[end..]);
            Cow::Owned(out)
        }
        // Unbalanced block: leave the text alone
        None => Cow::Borrowed(text),
    }
}

/// Byte offset just past the brace that closes the `{` at `start`.
fn balanced_brace_end(text: &str, start: usize) -> Option<usize> {
    let mut depth: usize = 0;
    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_external_links(text: &str) -> &str {
    match EXTERNAL_LINKS_HEADING.find(text) {
        Some(heading) => &text[..heading.start()],
        None => text,
    }
}
