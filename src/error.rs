//! Error types for the extraction pipeline.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Which of the three output files a write failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Redirects,
    Anchors,
    Mentions,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkKind::Redirects => "redirects",
            SinkKind::Anchors => "anchors",
            SinkKind::Mentions => "mentions",
        };
        f.write_str(name)
    }
}

/// Failure of a single metadata lookup. Never fatal to a run.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("lookup request failed: {0}")]
    Http(String),

    #[error("malformed lookup response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid redirect keyword pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Fatal errors surfaced to the caller of a run.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to read dump {path:?}: {source}")]
    Dump {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed reading articles: {0}")]
    DumpRead(#[source] io::Error),

    #[error("failed to create {sink} output {path:?}: {source}")]
    SinkOpen {
        sink: SinkKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed writing {sink} output while flushing batch {batch}: {source}")]
    Sink {
        sink: SinkKind,
        batch: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize mentions: {0}")]
    MentionsJson(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
