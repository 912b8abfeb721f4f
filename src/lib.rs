//! Extraction of redirects, anchor pairs and context-windowed entity mentions
//! from wiki-markup articles, for building entity-linking datasets.

pub mod config;
pub mod context;
pub mod dump;
pub mod error;
pub mod job;
pub mod markup;
pub mod parallel;
pub mod resolver;

pub use config::ExtractConfig;
pub use context::{ContextWindow, ContextWindower, WindowPolicy};
pub use error::{ConfigError, ExtractError, LookupError, SinkKind};
pub use job::{AnchorLink, Article, ArticleJob, ArticleResult, Mention, RedirectLink};
pub use markup::{AnchorMatch, MarkupScanner};
pub use parallel::{BatchRunner, OutputSinks, ParallelConfig, Stats};
pub use resolver::{EntityLookup, EntityResolver, PageProps, ResolvedEntity, WikipediaLookup};
