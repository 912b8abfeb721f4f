//! Title → entity resolution with a run-wide memo.
//!
//! The lookup itself sits behind [`EntityLookup`]; [`WikipediaLookup`] talks to
//! the MediaWiki action API. Only complete resolutions are cached: a title
//! that fails to resolve is looked up again the next time it appears.

use crate::config::ExtractConfig;
use crate::error::LookupError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

/// Raw page properties returned by a lookup. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageProps {
    pub page_id: Option<String>,
    pub wikibase_item: Option<String>,
    pub short_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub qid: String,
    pub wikipedia_page_id: String,
    pub short_description: String,
    pub url: String,
}

/// Blocking metadata lookup keyed by normalized title.
///
/// `Ok(None)` means the page does not exist.
pub trait EntityLookup: Send + Sync {
    fn lookup(&self, normalized_title: &str) -> Result<Option<PageProps>, LookupError>;
}

pub struct EntityResolver {
    lookup: Box<dyn EntityLookup>,
    url_base: String,
    cache: RwLock<HashMap<String, ResolvedEntity>>,
}

impl EntityResolver {
    pub fn new(lookup: Box<dyn EntityLookup>, url_base: impl Into<String>) -> Self {
        EntityResolver {
            lookup,
            url_base: url_base.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `title`; `None` covers unknown titles, incomplete page
    /// properties and lookup errors alike.
    pub fn resolve(&self, title: &str) -> Option<ResolvedEntity> {
        let key = normalize_title(title);
        if key.is_empty() {
            return None;
        }

        if let Some(hit) = self.read_cache().get(&key) {
            return Some(hit.clone());
        }

        let props = match self.lookup.lookup(&key) {
            Ok(Some(props)) => props,
            Ok(None) => {
                debug!(title = %key, "page not found");
                return None;
            }
            Err(err) => {
                warn!(title = %key, error = %err, "entity lookup failed");
                return None;
            }
        };

        let (Some(qid), Some(page_id), Some(desc)) =
            (props.wikibase_item, props.page_id, props.short_description)
        else {
            debug!(title = %key, "page properties incomplete");
            return None;
        };

        let entity = ResolvedEntity {
            qid,
            wikipedia_page_id: page_id,
            short_description: desc,
            url: format!("{}{}", self.url_base, key),
        };

        let mut cache = self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(cache.entry(key).or_insert(entity).clone())
    }

    pub fn cached_len(&self) -> usize {
        self.read_cache().len()
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ResolvedEntity>> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// NFC-normalize and join whitespace-separated pieces with underscores.
pub fn normalize_title(title: &str) -> String {
    let normalized: String = title.nfc().collect();
    normalized.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Lookup against the MediaWiki action API (`prop=pageprops`).
pub struct WikipediaLookup {
    agent: ureq::Agent,
    api_url: String,
}

impl WikipediaLookup {
    pub fn new(config: &ExtractConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(config.connect_timeout_secs))
            .timeout_read(Duration::from_secs(config.read_timeout_secs))
            .user_agent(&config.user_agent)
            .build();
        WikipediaLookup {
            agent,
            api_url: config.api_url.clone(),
        }
    }
}

impl EntityLookup for WikipediaLookup {
    fn lookup(&self, normalized_title: &str) -> Result<Option<PageProps>, LookupError> {
        let response = self
            .agent
            .get(&self.api_url)
            .query("action", "query")
            .query("prop", "pageprops")
            .query("titles", normalized_title)
            .query("format", "json")
            .call()
            .map_err(|e| LookupError::Http(e.to_string()))?;

        let body: Value = response
            .into_json()
            .map_err(|e| LookupError::Malformed(e.to_string()))?;
        parse_pageprops(&body)
    }
}

/// Pull the first page out of a `query.pages` response.
pub fn parse_pageprops(body: &Value) -> Result<Option<PageProps>, LookupError> {
    let pages = body["query"]["pages"]
        .as_object()
        .ok_or_else(|| LookupError::Malformed("response has no query.pages".to_string()))?;

    let Some((page_key, page)) = pages.iter().next() else {
        return Ok(None);
    };
    if page_key.starts_with('-') || page.get("missing").is_some() || page.get("invalid").is_some() {
        return Ok(None);
    }

    let field = |name: &str| {
        page["pageprops"][name]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(Some(PageProps {
        page_id: Some(page_key.clone()),
        wikibase_item: field("wikibase_item"),
        short_description: field("wikibase-shortdesc"),
    }))
}
