//! Sync coordinator.
//!
//! Pulls the authoritative redirect set from a [`RemoteSource`], diffs it
//! against an in-memory snapshot and applies the delta to the rule index and
//! the durable store. The snapshot and the index are mutated together under
//! the snapshot lock, so replaying the snapshot always reproduces the index.
//!
//! A cycle runs `Idle -> Fetching -> Diffing -> Applying -> Idle`. Any error
//! before the apply step leaves snapshot, index and store untouched.

#[cfg(feature = "async")]
mod task;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::cache::ResultCache;
use crate::error::{FetchErrorKind, RedirectError, Result};
use crate::index::RedirectIndex;
use crate::source::RemoteSource;
use crate::store::RedirectStore;
use crate::types::{MatchKind, Redirect};

/// Default interval between sync cycles (10 hours)
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(36_000);

/// Default bound on the total fetch time of one cycle
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between two page requests
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(100);

/// Default upper bound on pages fetched in one cycle
pub const DEFAULT_MAX_PAGES: usize = 10_000;

/// Sync coordinator options
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub page_delay: Duration,
    /// Run the first cycle immediately instead of after one interval
    pub sync_on_start: bool,
    /// Accept an empty fetched set even when the snapshot holds redirects
    pub allow_empty_sync: bool,
    pub max_pages: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            page_delay: DEFAULT_PAGE_DELAY,
            sync_on_start: true,
            allow_empty_sync: false,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_sync_on_start(mut self, enabled: bool) -> Self {
        self.sync_on_start = enabled;
        self
    }

    pub fn with_allow_empty_sync(mut self, allowed: bool) -> Self {
        self.allow_empty_sync = allowed;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }
}

/// Phase of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Fetching,
    Diffing,
    Applying,
}

/// Complete redirect set returned by one fetch
#[derive(Debug, Clone)]
pub struct FetchedBatch {
    pub redirects: Vec<Redirect>,
    /// Time captured before the first page was requested
    pub watermark: DateTime<Utc>,
}

/// Delta between the snapshot and a fetched batch
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Snapshot entries absent from the fetched set
    pub deletions: Vec<Redirect>,
    /// Fetched redirects unknown to the snapshot
    pub additions: Vec<Redirect>,
    /// Known redirects updated after the checkpoint
    pub updates: Vec<Redirect>,
    pub watermark: Option<DateTime<Utc>>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.additions.is_empty() && self.updates.is_empty()
    }
}

/// Outcome of an applied plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Redirects whose pattern failed to compile
    pub skipped: usize,
    /// Store writes that failed; memory stays authoritative
    pub store_failures: usize,
    /// Earlier failed store writes that succeeded on retry
    pub store_repaired: usize,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.deleted > 0
    }
}

type PatternKey = (MatchKind, String);

fn pattern_key(redirect: &Redirect) -> PatternKey {
    (redirect.match_kind(), redirect.pattern().to_string())
}

#[derive(Debug, Default)]
struct Snapshot {
    redirects: HashMap<String, Redirect>,
    /// Ids sharing each index pattern, ordered by id
    by_pattern: HashMap<PatternKey, BTreeSet<String>>,
    checkpoint: Option<DateTime<Utc>>,
    /// Ids whose last store write failed, retried on the next apply
    unsynced: BTreeSet<String>,
}

impl Snapshot {
    fn insert(&mut self, redirect: Redirect) {
        self.remove(&redirect.id);
        self.by_pattern
            .entry(pattern_key(&redirect))
            .or_default()
            .insert(redirect.id.clone());
        self.redirects.insert(redirect.id.clone(), redirect);
    }

    fn remove(&mut self, id: &str) -> Option<Redirect> {
        let redirect = self.redirects.remove(id)?;
        let key = pattern_key(&redirect);
        if let Some(ids) = self.by_pattern.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_pattern.remove(&key);
            }
        }
        Some(redirect)
    }

    /// Number of redirects sharing `sample`'s index pattern
    fn sharing(&self, sample: &Redirect) -> usize {
        self.by_pattern
            .get(&pattern_key(sample))
            .map_or(0, BTreeSet::len)
    }

    /// Lowest-id redirect holding `sample`'s index pattern
    fn primary(&self, sample: &Redirect) -> Option<&Redirect> {
        let id = self.by_pattern.get(&pattern_key(sample))?.iter().next()?;
        self.redirects.get(id)
    }

    fn advance(&mut self, watermark: DateTime<Utc>) {
        if self.checkpoint.map_or(true, |c| watermark > c) {
            self.checkpoint = Some(watermark);
        }
    }

    fn is_newer(&self, redirect: &Redirect) -> bool {
        self.checkpoint.map_or(true, |c| redirect.updated_at > c)
    }
}

/// Resets the phase to idle when a cycle step ends, even on error
struct PhaseGuard<'a>(&'a Mutex<SyncState>);

impl<'a> PhaseGuard<'a> {
    fn enter(state: &'a Mutex<SyncState>, phase: SyncState) -> Self {
        *state.lock() = phase;
        Self(state)
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = SyncState::Idle;
    }
}

/// Keeps the rule index and the store in step with the remote authority
pub struct SyncCoordinator {
    index: Arc<dyn RedirectIndex>,
    source: Arc<dyn RemoteSource>,
    store: Arc<dyn RedirectStore>,
    cache: Option<Arc<ResultCache>>,
    options: SyncOptions,
    snapshot: Mutex<Snapshot>,
    state: Mutex<SyncState>,
}

impl SyncCoordinator {
    pub fn new(
        index: Arc<dyn RedirectIndex>,
        source: Arc<dyn RemoteSource>,
        store: Arc<dyn RedirectStore>,
    ) -> Self {
        Self {
            index,
            source,
            store,
            cache: None,
            options: SyncOptions::default(),
            snapshot: Mutex::new(Snapshot::default()),
            state: Mutex::new(SyncState::Idle),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Clear `cache` after every cycle that changed the rule set. The clear
    /// follows the index mutation, so a lookup that read the old rules cannot
    /// cache its answer past it (see [`ResultCache::set_if_unchanged`]).
    pub fn with_result_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Number of redirects in the snapshot
    pub fn snapshot_len(&self) -> usize {
        self.snapshot.lock().redirects.len()
    }

    /// Snapshot entry for `id`
    pub fn redirect(&self, id: &str) -> Option<Redirect> {
        self.snapshot.lock().redirects.get(id).cloned()
    }

    /// Threshold a fetched redirect's `updated_at` must pass to count as updated
    pub fn checkpoint(&self) -> Option<DateTime<Utc>> {
        self.snapshot.lock().checkpoint
    }

    /// Load the durable store into the snapshot and the index.
    ///
    /// Records whose pattern does not compile are skipped. The checkpoint is
    /// left unset, so the first cycle compares every record by content and
    /// repairs whatever the store missed. Returns the number of redirects loaded.
    pub fn hydrate(&self) -> Result<usize> {
        let records = self.store.list_all()?;
        let mut snapshot = self.snapshot.lock();
        let mut loaded = 0;

        for redirect in records {
            if snapshot.redirects.contains_key(&redirect.id) {
                continue;
            }
            if let Err(e) = self.index_redirect(&redirect) {
                tracing::warn!(id = %redirect.id, error = %e, "skipping stored redirect");
                continue;
            }
            snapshot.insert(redirect);
            loaded += 1;
        }

        let shared: Vec<Redirect> = snapshot
            .by_pattern
            .values()
            .filter(|ids| ids.len() > 1)
            .filter_map(|ids| ids.iter().next())
            .filter_map(|id| snapshot.redirects.get(id).cloned())
            .collect();
        for redirect in &shared {
            self.settle_pattern(&snapshot, redirect);
        }

        tracing::info!(loaded, "hydrated redirects from store");
        Ok(loaded)
    }

    /// Fetch the complete redirect set, following pagination.
    pub fn fetch(&self) -> Result<FetchedBatch> {
        let _phase = PhaseGuard::enter(&self.state, SyncState::Fetching);
        let watermark = Utc::now();
        let started = Instant::now();
        let deadline = started + self.options.fetch_timeout;

        let mut redirects = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if Instant::now() >= deadline {
                return Err(RedirectError::fetch(
                    FetchErrorKind::Timeout,
                    format!(
                        "fetch exceeded {:?} after {} pages",
                        self.options.fetch_timeout, pages
                    ),
                ));
            }

            let page = self.source.fetch_page(cursor.as_deref())?;
            pages += 1;
            redirects.extend(page.redirects);

            if !page.has_next_page {
                break;
            }
            match page.end_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                Some(next) => {
                    return Err(RedirectError::fetch(
                        FetchErrorKind::Pagination,
                        format!("cursor '{}' did not advance", next),
                    ))
                }
                None => {
                    return Err(RedirectError::fetch(
                        FetchErrorKind::Pagination,
                        "next page announced without an end cursor",
                    ))
                }
            }
            if pages >= self.options.max_pages {
                return Err(RedirectError::fetch(
                    FetchErrorKind::Pagination,
                    format!("more than {} pages", self.options.max_pages),
                ));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(self.options.page_delay.min(remaining));
        }

        tracing::debug!(
            pages,
            redirects = redirects.len(),
            elapsed = ?started.elapsed(),
            "fetched redirects"
        );
        Ok(FetchedBatch {
            redirects,
            watermark,
        })
    }

    /// Diff `batch` against the snapshot without mutating anything.
    pub fn plan(&self, batch: &FetchedBatch) -> Result<SyncPlan> {
        let _phase = PhaseGuard::enter(&self.state, SyncState::Diffing);

        let mut seen = HashSet::with_capacity(batch.redirects.len());
        for redirect in &batch.redirects {
            if redirect.id.is_empty() {
                return Err(RedirectError::Reconcile(format!(
                    "redirect without id (from '{}')",
                    redirect.from_url
                )));
            }
            if !seen.insert(redirect.id.as_str()) {
                return Err(RedirectError::Reconcile(format!(
                    "duplicate redirect id '{}'",
                    redirect.id
                )));
            }
        }

        let snapshot = self.snapshot.lock();
        if batch.redirects.is_empty()
            && !snapshot.redirects.is_empty()
            && !self.options.allow_empty_sync
        {
            return Err(RedirectError::Reconcile(format!(
                "refusing to delete all {} redirects on an empty fetch",
                snapshot.redirects.len()
            )));
        }

        let mut plan = SyncPlan {
            watermark: Some(batch.watermark),
            ..SyncPlan::default()
        };
        for redirect in &batch.redirects {
            match snapshot.redirects.get(&redirect.id) {
                None => plan.additions.push(redirect.clone()),
                Some(known) if snapshot.is_newer(redirect) && known != redirect => {
                    plan.updates.push(redirect.clone())
                }
                Some(_) => {}
            }
        }
        plan.deletions = snapshot
            .redirects
            .values()
            .filter(|r| !seen.contains(r.id.as_str()))
            .cloned()
            .collect();
        plan.deletions.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(plan)
    }

    /// Apply `plan` to the snapshot, the index and the store.
    ///
    /// Store writes that failed on an earlier apply are retried first.
    /// Compile failures skip the offending redirect; store failures are
    /// counted, logged and remembered for the next apply.
    pub fn apply(&self, plan: SyncPlan) -> SyncReport {
        let _phase = PhaseGuard::enter(&self.state, SyncState::Applying);
        let mut report = SyncReport::default();
        let mut snapshot = self.snapshot.lock();

        for id in std::mem::take(&mut snapshot.unsynced) {
            let written = match snapshot.redirects.get(&id) {
                Some(redirect) => self.store.upsert(redirect),
                None => self.store.delete(&id),
            };
            match written {
                Ok(()) => report.store_repaired += 1,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "store retry failed");
                    report.store_failures += 1;
                    snapshot.unsynced.insert(id);
                }
            }
        }

        for redirect in plan.deletions {
            let Some(known) = snapshot.remove(&redirect.id) else {
                continue;
            };
            self.index.delete(&known.from_url, &known.from_domain);
            self.settle_pattern(&snapshot, &known);
            report.deleted += 1;
            let written = self.store.delete(&known.id);
            self.record_write(&mut snapshot, &known.id, written, &mut report);
        }

        for redirect in plan.additions.into_iter().chain(plan.updates) {
            let previous = snapshot.redirects.get(&redirect.id).cloned();
            let indexed = match &previous {
                Some(known) if known.same_pattern(&redirect) => {
                    self.index
                        .update(&known.from_url, &known.from_domain, &redirect.to_url);
                    Ok(())
                }
                Some(known) => self.index_redirect(&redirect).map(|_| {
                    self.index.delete(&known.from_url, &known.from_domain);
                }),
                None => self.index_redirect(&redirect),
            };

            if let Err(e) = indexed {
                tracing::warn!(id = %redirect.id, error = %e, "skipping redirect");
                report.skipped += 1;
                continue;
            }

            if previous.is_some() {
                report.updated += 1;
            } else {
                report.added += 1;
            }
            let written = self.store.upsert(&redirect);
            self.record_write(&mut snapshot, &redirect.id, written, &mut report);

            snapshot.insert(redirect.clone());
            if let Some(known) = previous.filter(|known| !known.same_pattern(&redirect)) {
                self.settle_pattern(&snapshot, &known);
            }
            if snapshot.sharing(&redirect) > 1 {
                self.settle_pattern(&snapshot, &redirect);
            }
        }

        if let Some(watermark) = plan.watermark {
            snapshot.advance(watermark);
        }
        drop(snapshot);

        if report.changed() {
            if let Some(cache) = &self.cache {
                cache.clear();
            }
        }
        report
    }

    /// Diff and apply an already fetched batch
    pub fn reconcile(&self, batch: FetchedBatch) -> Result<SyncReport> {
        let plan = self.plan(&batch)?;
        let report = self.apply(plan);
        if report.changed()
            || report.skipped > 0
            || report.store_failures > 0
            || report.store_repaired > 0
        {
            tracing::info!(
                added = report.added,
                updated = report.updated,
                deleted = report.deleted,
                skipped = report.skipped,
                store_failures = report.store_failures,
                store_repaired = report.store_repaired,
                "redirects synchronized"
            );
        } else {
            tracing::debug!("redirects already up to date");
        }
        Ok(report)
    }

    /// Run one full cycle: fetch, diff, apply
    pub fn run_cycle(&self) -> Result<SyncReport> {
        let batch = self.fetch()?;
        self.reconcile(batch)
    }

    /// Number of ids whose store write is still outstanding
    pub fn unsynced_len(&self) -> usize {
        self.snapshot.lock().unsynced.len()
    }

    /// Point the index's answer for `sample`'s pattern at the lowest-id
    /// redirect still holding it. Rules with equal patterns are
    /// indistinguishable to the index, so deleting one by pattern may remove
    /// a survivor's rule instead.
    fn settle_pattern(&self, snapshot: &Snapshot, sample: &Redirect) {
        if let Some(primary) = snapshot.primary(sample) {
            self.index
                .update(&primary.from_url, &primary.from_domain, &primary.to_url);
        }
    }

    fn record_write(
        &self,
        snapshot: &mut Snapshot,
        id: &str,
        written: Result<()>,
        report: &mut SyncReport,
    ) {
        match written {
            Ok(()) => {
                snapshot.unsynced.remove(id);
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "store write failed");
                report.store_failures += 1;
                snapshot.unsynced.insert(id.to_string());
            }
        }
    }

    fn index_redirect(&self, redirect: &Redirect) -> Result<()> {
        self.index
            .index_rule(&redirect.from_url, &redirect.from_domain, &redirect.to_url)
    }
}
