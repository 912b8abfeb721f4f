//! Per-article extraction: redirects, anchor pairs and resolved mentions.

use crate::context::ContextWindower;
use crate::markup::{is_namespaced, MarkupScanner};
use crate::resolver::EntityResolver;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub name: String,
    pub raw_text: String,
}

impl Article {
    pub fn new(name: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Article {
            name: name.into(),
            raw_text: raw_text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectLink {
    pub target_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorLink {
    pub anchor_text: String,
    pub target_title: String,
}

/// One resolved link occurrence, serialized with the dataset's field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    #[serde(rename = "article_id")]
    pub article_qid: String,
    #[serde(rename = "mention")]
    pub mention_text: String,
    pub left_context: String,
    pub right_context: String,
    pub wikipedia_title: String,
    pub wikipedia_id: String,
    pub wikipedia_url: String,
    pub entity_desc: String,
}

/// Everything one article contributes to the outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleResult {
    pub article_name: String,
    pub anchors: Vec<AnchorLink>,
    pub redirects: Vec<RedirectLink>,
    /// `("{article}_{n}", mention)` with `n` counting from 1
    pub mentions: Vec<(String, Mention)>,
    /// The job panicked and the fields above are empty
    pub failed: bool,
}

impl ArticleResult {
    pub fn empty(article_name: impl Into<String>) -> Self {
        ArticleResult {
            article_name: article_name.into(),
            ..Default::default()
        }
    }

    pub fn failed(article_name: impl Into<String>) -> Self {
        ArticleResult {
            failed: true,
            ..Self::empty(article_name)
        }
    }
}

/// Shared, read-only pieces every job needs. Safe to run from many threads.
pub struct ArticleJob<'a> {
    pub scanner: &'a MarkupScanner,
    pub windower: ContextWindower,
    pub resolver: &'a EntityResolver,
    /// Scan mentions over infobox-free, external-links-free text
    pub strip_noise: bool,
}

impl<'a> ArticleJob<'a> {
    pub fn run(&self, article: &Article) -> ArticleResult {
        let redirects = self
            .scanner
            .find_redirects(&article.raw_text)
            .into_iter()
            .map(|target_title| RedirectLink { target_title })
            .collect();

        let anchors = self
            .scanner
            .find_anchors(&article.raw_text)
            .into_iter()
            .map(|m| AnchorLink {
                anchor_text: m.anchor,
                target_title: m.target,
            })
            .collect();

        // Namespaced articles never reach the mentions output
        let mentions = if is_namespaced(&article.name) {
            Vec::new()
        } else {
            self.build_mentions(article)
        };

        ArticleResult {
            article_name: article.name.clone(),
            anchors,
            redirects,
            mentions,
            failed: false,
        }
    }

    fn build_mentions(&self, article: &Article) -> Vec<(String, Mention)> {
        let article_qid = self
            .resolver
            .resolve(&article.name)
            .map(|entity| entity.qid)
            .unwrap_or_default();

        let surface: Cow<'_, str> = if self.strip_noise {
            Cow::Owned(self.scanner.strip_noise(&article.raw_text))
        } else {
            Cow::Borrowed(article.raw_text.as_str())
        };

        let mut mentions = Vec::new();
        for candidate in self.scanner.find_anchors(&surface) {
            let Some(entity) = self.resolver.resolve(&candidate.target) else {
                continue;
            };
            let window = self.windower.window(&surface, candidate.start, candidate.end);

            let key = format!("{}_{}", article.name, mentions.len() + 1);
            mentions.push((
                key,
                Mention {
                    article_qid: article_qid.clone(),
                    mention_text: candidate.anchor,
                    left_context: window.left,
                    right_context: window.right,
                    wikipedia_title: candidate.target,
                    wikipedia_id: entity.qid,
                    wikipedia_url: entity.url,
                    entity_desc: entity.short_description,
                },
            ));
        }
        mentions
    }
}
