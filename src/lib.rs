//! Redirect Engine - regex redirect rules kept in sync with a remote authority
//!
//! This library provides:
//! - A rule index bucketed by path length and first segment, plus domain rules
//! - `$1`, `$2`, ... substitution of captured groups into targets
//! - A TTL + LRU result cache with negative caching
//! - Periodic reconciliation against a remote source, persisted to a durable store
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use redirect_engine_r::{EngineConfig, MemoryStore, Redirect, RedirectEngine, StaticSource};
//!
//! let source = StaticSource::new(vec![
//!     Redirect::new("1", "/dedicated/host", "/host", Utc::now()),
//!     Redirect::new("2", "/blog/(.*)", "https://blog.example.com/$1", Utc::now()),
//!     Redirect::new("3", "", "https://new-domain.com/", Utc::now()).with_domain("old-domain\\.com$"),
//! ]);
//!
//! let engine = RedirectEngine::new(
//!     EngineConfig::new(),
//!     Arc::new(source),
//!     Arc::new(MemoryStore::new()),
//! )
//! .unwrap();
//! engine.sync_now().unwrap();
//!
//! assert_eq!(
//!     engine.resolve("https://example.com/dedicated/host").as_deref(),
//!     Some("https://example.com/host")
//! );
//! assert_eq!(
//!     engine.resolve("https://example.com/blog/hello").as_deref(),
//!     Some("https://blog.example.com/hello")
//! );
//! assert_eq!(
//!     engine.resolve("https://old-domain.com").as_deref(),
//!     Some("https://new-domain.com/")
//! );
//! assert_eq!(engine.resolve("https://example.com/none"), None);
//! ```
//!
//! # Rule Syntax
//!
//! | Field | Example | Matched against |
//! |-------|---------|-----------------|
//! | `fromURL` | `/home/company/careers/(.*)` | Request path |
//! | `fromDomain` | `example\.com/(.*)` | `scheme://host/path` |
//! | `toURL` | `/careers/$1` | Target template |
//!
//! Relative targets are resolved against the request's scheme and host.
//! Placeholders that refer to a group the pattern does not have stay literal.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod matcher;
pub mod source;
pub mod store;
pub mod sync;
#[cfg(feature = "async")]
pub mod task;
pub mod types;

// Re-export commonly used items
pub use cache::{CacheOptions, CacheStats, CachedOutcome, ResultCache, NO_MATCH_SENTINEL};
pub use config::EngineConfig;
pub use engine::RedirectEngine;
pub use error::{FetchErrorKind, RedirectError, Result, StoreErrorKind};
pub use index::{expand_target, IndexStats, RedirectIndex, Rule, RuleIndex};
pub use matcher::{RequestMatcher, RequestUrl};
pub use types::{MatchKind, PageInfo, Redirect, RedirectConnection, RedirectEdge, RedirectPage};

// Re-export sync types
pub use sync::{FetchedBatch, SyncCoordinator, SyncOptions, SyncPlan, SyncReport, SyncState};

// Re-export source and store types
pub use source::{GraphQlSource, RemoteSource, StaticSource, TokenProvider};
pub use store::{JsonFileStore, MemoryStore, RedirectStore};

#[cfg(feature = "async")]
pub use task::TaskHandle;
