//! Request matcher.
//!
//! Composition root of the serving path: normalizes a request, consults the
//! result cache, then the rule index. It never waits on synchronization.

mod request;

pub use request::RequestUrl;

use std::sync::Arc;

use crate::cache::{CachedOutcome, ResultCache, NO_MATCH_SENTINEL};
use crate::index::RedirectIndex;

/// Resolves request URLs to redirect targets
pub struct RequestMatcher {
    index: Arc<dyn RedirectIndex>,
    cache: Option<Arc<ResultCache>>,
}

impl RequestMatcher {
    /// Create a matcher without caching
    pub fn new(index: Arc<dyn RedirectIndex>) -> Self {
        Self { index, cache: None }
    }

    /// Put a result cache in front of the index
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// Resolve a raw request URL. `None` means no redirect applies.
    pub fn resolve(&self, raw: &str) -> Option<String> {
        self.resolve_request(&RequestUrl::parse(raw))
    }

    /// Like [`resolve`](Self::resolve) but answers [`NO_MATCH_SENTINEL`] for no match
    pub fn resolve_or_sentinel(&self, raw: &str) -> String {
        self.resolve(raw)
            .unwrap_or_else(|| NO_MATCH_SENTINEL.to_string())
    }

    /// Resolve an already normalized request.
    ///
    /// Lookup order: cache(absolute), cache(path), index(absolute), index(path).
    /// Answers computed across a cache clear are returned but not cached.
    pub fn resolve_request(&self, request: &RequestUrl) -> Option<String> {
        let absolute = request.absolute();
        let path = request.path();
        let generation = self.cache.as_ref().map_or(0, |cache| cache.generation());

        if let Some(abs) = absolute {
            if let Some(hit) = self.cache_get(abs) {
                return hit.into_target();
            }
        }

        match self.cache_get(path) {
            Some(CachedOutcome::Redirect(target)) => {
                let resolved = request.resolve_target(&target);
                if let Some(abs) = absolute {
                    self.cache_set(abs, CachedOutcome::Redirect(resolved.clone()), generation);
                }
                return Some(resolved);
            }
            // A path-level negative says nothing about domain rules for this host
            Some(CachedOutcome::NoMatch) if absolute.is_none() => return None,
            _ => {}
        }

        if let Some(abs) = absolute {
            if let Some(target) = self.index.match_url(abs) {
                let resolved = request.resolve_target(&target);
                self.cache_set(abs, CachedOutcome::Redirect(resolved.clone()), generation);
                return Some(resolved);
            }
        }

        if let Some(target) = self.index.match_url(path) {
            let resolved = request.resolve_target(&target);
            self.cache_set(path, CachedOutcome::Redirect(target), generation);
            if let Some(abs) = absolute {
                self.cache_set(abs, CachedOutcome::Redirect(resolved.clone()), generation);
            }
            return Some(resolved);
        }

        tracing::trace!(path, "no redirect rule matched");
        self.cache_set(absolute.unwrap_or(path), CachedOutcome::NoMatch, generation);
        None
    }

    fn cache_get(&self, key: &str) -> Option<CachedOutcome> {
        self.cache.as_ref()?.get(key)
    }

    fn cache_set(&self, key: &str, value: CachedOutcome, generation: u64) {
        if let Some(cache) = &self.cache {
            cache.set_if_unchanged(key, value, generation);
        }
    }
}
