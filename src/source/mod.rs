//! Remote rule sources.
//!
//! The remote authority publishes the complete redirect set, optionally split
//! into cursor-paginated pages.

mod graphql;

pub use graphql::{GraphQlSource, TokenProvider};

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{FetchErrorKind, RedirectError, Result};
use crate::types::{Redirect, RedirectPage};

/// Source of the authoritative redirect set.
pub trait RemoteSource: Send + Sync {
    /// Fetch the page following cursor `after` (`None` for the first page).
    ///
    /// Unpaginated sources return everything in one page with
    /// `has_next_page == false`.
    fn fetch_page(&self, after: Option<&str>) -> Result<RedirectPage>;
}

/// In-memory source with optional pagination and failure injection
#[derive(Default)]
pub struct StaticSource {
    redirects: RwLock<Vec<Redirect>>,
    page_size: Option<usize>,
    fail_with: Mutex<Option<FetchErrorKind>>,
    requests: AtomicUsize,
}

impl StaticSource {
    /// Create a source serving `redirects` in a single page
    pub fn new(redirects: Vec<Redirect>) -> Self {
        Self {
            redirects: RwLock::new(redirects),
            ..Self::default()
        }
    }

    /// Serve pages of at most `size` redirects
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    /// Replace the published set
    pub fn set_redirects(&self, redirects: Vec<Redirect>) {
        *self.redirects.write() = redirects;
    }

    /// Make the next page request fail with `kind`
    pub fn fail_next(&self, kind: FetchErrorKind) {
        *self.fail_with.lock() = Some(kind);
    }

    /// Number of page requests served so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

impl RemoteSource for StaticSource {
    fn fetch_page(&self, after: Option<&str>) -> Result<RedirectPage> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if let Some(kind) = self.fail_with.lock().take() {
            return Err(RedirectError::fetch(kind, "injected failure"));
        }

        let redirects = self.redirects.read();
        let Some(size) = self.page_size else {
            return Ok(RedirectPage::complete(redirects.clone()));
        };

        let start = match after {
            Some(cursor) => cursor.parse::<usize>().map_err(|_| {
                RedirectError::fetch(
                    FetchErrorKind::Pagination,
                    format!("unknown cursor: {}", cursor),
                )
            })?,
            None => 0,
        };
        let start = start.min(redirects.len());
        let end = (start + size).min(redirects.len());

        Ok(RedirectPage {
            redirects: redirects[start..end].to_vec(),
            has_next_page: end < redirects.len(),
            end_cursor: Some(end.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(n: usize) -> Vec<Redirect> {
        (0..n)
            .map(|i| Redirect::new(i.to_string(), format!("/p{}", i), "/t", Utc::now()))
            .collect()
    }

    #[test]
    fn test_single_page() {
        let source = StaticSource::new(sample(3));
        let page = source.fetch_page(None).unwrap();
        assert_eq!(page.redirects.len(), 3);
        assert!(!page.has_next_page);
    }

    #[test]
    fn test_paginated() {
        let source = StaticSource::new(sample(5)).with_page_size(2);

        let first = source.fetch_page(None).unwrap();
        assert_eq!(first.redirects.len(), 2);
        assert!(first.has_next_page);

        let second = source.fetch_page(first.end_cursor.as_deref()).unwrap();
        let third = source.fetch_page(second.end_cursor.as_deref()).unwrap();
        assert_eq!(third.redirects.len(), 1);
        assert!(!third.has_next_page);
        assert_eq!(source.requests(), 3);
    }

    #[test]
    fn test_bad_cursor() {
        let source = StaticSource::new(sample(1)).with_page_size(1);
        let err = source.fetch_page(Some("nope")).unwrap_err();
        assert!(matches!(
            err,
            RedirectError::Fetch {
                kind: FetchErrorKind::Pagination,
                ..
            }
        ));
    }

    #[test]
    fn test_fail_next_once() {
        let source = StaticSource::new(sample(1));
        source.fail_next(FetchErrorKind::Unreachable);
        assert!(source.fetch_page(None).unwrap_err().is_fetch_error());
        assert!(source.fetch_page(None).is_ok());
    }
}
