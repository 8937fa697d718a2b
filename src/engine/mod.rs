//! Redirect engine.
//!
//! Wires the rule index, the result cache, the request matcher and the sync
//! coordinator together from one [`EngineConfig`].

use std::sync::Arc;

#[cfg(feature = "async")]
use parking_lot::Mutex;

use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::error::{RedirectError, Result};
use crate::index::RuleIndex;
use crate::matcher::{RequestMatcher, RequestUrl};
use crate::source::{GraphQlSource, RemoteSource};
use crate::store::{JsonFileStore, RedirectStore};
use crate::sync::{SyncCoordinator, SyncReport};

#[cfg(feature = "async")]
use crate::task::TaskHandle;

/// Redirect rule engine
pub struct RedirectEngine {
    config: EngineConfig,
    index: Arc<RuleIndex>,
    cache: Option<Arc<ResultCache>>,
    matcher: RequestMatcher,
    coordinator: Arc<SyncCoordinator>,
    #[cfg(feature = "async")]
    tasks: Mutex<Vec<TaskHandle>>,
}

impl RedirectEngine {
    /// Build an engine over `source` and `store`.
    ///
    /// The store is loaded right away so matching works before the first
    /// remote fetch. A store that cannot be read is logged and left empty.
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn RemoteSource>,
        store: Arc<dyn RedirectStore>,
    ) -> Result<Self> {
        config.validate()?;

        let index = Arc::new(RuleIndex::new());
        let cache = config
            .cache_enabled()
            .then(|| Arc::new(ResultCache::new(config.cache_options())));

        let mut matcher = RequestMatcher::new(index.clone());
        let mut coordinator = SyncCoordinator::new(index.clone(), source, store)
            .with_options(config.sync_options());
        if let Some(cache) = &cache {
            matcher = matcher.with_cache(cache.clone());
            coordinator = coordinator.with_result_cache(cache.clone());
        }

        if let Err(e) = coordinator.hydrate() {
            tracing::warn!(error = %e, "cannot hydrate redirects from store");
        }

        Ok(Self {
            config,
            index,
            cache,
            matcher,
            coordinator: Arc::new(coordinator),
            #[cfg(feature = "async")]
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Build an engine talking GraphQL to `server_url` and persisting to `store_path`
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        if config.server_url.is_empty() {
            return Err(RedirectError::Config("serverUrl is required".into()));
        }

        let source = GraphQlSource::new(&config.server_url, config.host_id.clone())
            .with_page_size(config.page_size)
            .with_timeout(config.sync_options().fetch_timeout);
        let store = JsonFileStore::open(&config.store_path)?;

        Self::new(config, Arc::new(source), Arc::new(store))
    }

    /// Resolve a request URL to its redirect target
    pub fn resolve(&self, raw: &str) -> Option<String> {
        self.matcher.resolve(raw)
    }

    /// Resolve a request known only by TLS state, Host header and path
    pub fn resolve_parts(&self, tls: bool, host: &str, path: &str) -> Option<String> {
        self.matcher
            .resolve_request(&RequestUrl::from_parts(tls, host, path))
    }

    /// Like [`resolve`](Self::resolve), answering the no-match sentinel instead of `None`
    pub fn resolve_or_sentinel(&self, raw: &str) -> String {
        self.matcher.resolve_or_sentinel(raw)
    }

    /// Run one sync cycle on the calling thread
    pub fn sync_now(&self) -> Result<SyncReport> {
        self.coordinator.run_cycle()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<RuleIndex> {
        &self.index
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Start the sync loop and the cache sweeper on the current tokio runtime.
    /// Calling it again while running does nothing.
    #[cfg(feature = "async")]
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        tasks.push(self.coordinator.spawn());
        if let Some(cache) = &self.cache {
            tasks.push(cache.spawn_sweeper());
        }
        tracing::info!(
            interval_secs = self.config.sync_interval_secs,
            cache = self.cache.is_some(),
            "redirect engine started"
        );
    }

    /// True between [`start`](Self::start) and [`shutdown`](Self::shutdown)
    #[cfg(feature = "async")]
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Stop background tasks and wait for them to exit
    #[cfg(feature = "async")]
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RedirectIndex;
    use crate::source::StaticSource;
    use crate::store::MemoryStore;
    use crate::types::Redirect;
    use chrono::Utc;

    fn engine(stored: Vec<Redirect>, remote: Vec<Redirect>, config: EngineConfig) -> RedirectEngine {
        RedirectEngine::new(
            config.with_page_delay(std::time::Duration::ZERO),
            Arc::new(StaticSource::new(remote)),
            Arc::new(MemoryStore::with_records(stored)),
        )
        .unwrap()
    }

    #[test]
    fn test_serves_hydrated_rules_before_sync() {
        let engine = engine(
            vec![Redirect::new("1", "/dedicated/host", "/host", Utc::now())],
            vec![],
            EngineConfig::new(),
        );
        assert_eq!(
            engine.resolve("https://example.com/dedicated/host").as_deref(),
            Some("https://example.com/host")
        );
        assert_eq!(engine.resolve_or_sentinel("https://example.com/none"), "@empty");
    }

    #[test]
    fn test_sync_now_invalidates_cache() {
        let engine = engine(
            vec![],
            vec![Redirect::new("1", "/a", "/b", Utc::now())],
            EngineConfig::new(),
        );
        assert_eq!(engine.resolve("https://example.com/a"), None);

        let report = engine.sync_now().unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(
            engine.resolve("https://example.com/a").as_deref(),
            Some("https://example.com/b")
        );
    }

    #[test]
    fn test_cache_disabled() {
        let engine = engine(
            vec![Redirect::new("1", "/a", "/b", Utc::now())],
            vec![],
            EngineConfig::new().with_cache_capacity(0),
        );
        assert!(engine.cache().is_none());
        assert_eq!(engine.resolve("/a").as_deref(), Some("/b"));
        assert_eq!(engine.index().len(), 1);
    }

    #[test]
    fn test_resolve_parts() {
        let engine = engine(
            vec![Redirect::new("1", "/a", "/b", Utc::now())],
            vec![],
            EngineConfig::new(),
        );
        assert_eq!(
            engine.resolve_parts(false, "Example.com", "/a").as_deref(),
            Some("http://example.com/b")
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = RedirectEngine::new(
            EngineConfig::new().with_sync_interval(std::time::Duration::ZERO),
            Arc::new(StaticSource::default()),
            Arc::new(MemoryStore::new()),
        );
        assert!(matches!(result, Err(RedirectError::Config(_))));
        assert!(matches!(
            RedirectEngine::from_config(EngineConfig::new()),
            Err(RedirectError::Config(_))
        ));
    }
}
