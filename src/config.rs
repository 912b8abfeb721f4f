//! Run configuration loaded from an optional YAML file.
//!
//! Every key is optional; anything left out falls back to the English
//! Wikipedia defaults below.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const DEFAULT_REDIRECT_KEYWORDS: [&str; 4] =
    ["#REDIRECT", "#weiterleitung", "#REDIRECCIÓN", "REDIRECIONAMENTO"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Keyword spellings that open a redirect directive (matched case-insensitively)
    pub redirect_keywords: Vec<String>,
    /// MediaWiki action API endpoint used for pageprops lookups
    pub api_url: String,
    /// Prefix joined with the normalized title to build `wikipedia_url`
    pub wiki_url_base: String,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            redirect_keywords: DEFAULT_REDIRECT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            api_url: "https://en.wikipedia.org/w/api.php".to_string(),
            wiki_url_base: "en.wikipedia.org/wiki/".to_string(),
            user_agent: concat!("wiki-mention-extractor/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: 5,
            read_timeout_secs: 10,
        }
    }
}

impl ExtractConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut file = File::open(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config: ExtractConfig =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redirect_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "redirect_keywords must contain at least one keyword".to_string(),
            ));
        }
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api_url must not be empty".to_string()));
        }
        Ok(())
    }
}
