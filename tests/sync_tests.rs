//! Integration tests for reconciliation against a paginated source and a file store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use redirect_engine_r::{
    FetchErrorKind, JsonFileStore, MemoryStore, Redirect, RedirectError, RedirectIndex,
    RedirectStore, RuleIndex, StaticSource, SyncCoordinator, SyncOptions, SyncState,
};

fn remote_set(count: usize) -> Vec<Redirect> {
    let updated = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            Redirect::new(
                format!("id-{}", i),
                format!("/legacy/page-{}", i),
                format!("/pages/{}", i),
                updated,
            )
        })
        .collect()
}

fn options() -> SyncOptions {
    SyncOptions::new().with_page_delay(Duration::ZERO)
}

#[test]
fn test_paginated_sync_into_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("redirects.json");

    let source = Arc::new(StaticSource::new(remote_set(25)).with_page_size(10));
    let index = Arc::new(RuleIndex::new());
    let store = Arc::new(JsonFileStore::open(&path).unwrap());
    let coordinator = SyncCoordinator::new(index.clone(), source.clone(), store)
        .with_options(options());

    let report = coordinator.run_cycle().unwrap();
    assert_eq!(report.added, 25);
    assert_eq!(source.requests(), 3);
    assert_eq!(coordinator.state(), SyncState::Idle);
    assert_eq!(
        index.match_url("/legacy/page-7").as_deref(),
        Some("/pages/7")
    );

    // A fresh process hydrates from the file without reaching the source
    let offline = Arc::new(StaticSource::new(vec![]));
    offline.fail_next(FetchErrorKind::Unreachable);
    let restarted_index = Arc::new(RuleIndex::new());
    let restarted = SyncCoordinator::new(
        restarted_index.clone(),
        offline.clone(),
        Arc::new(JsonFileStore::open(&path).unwrap()),
    )
    .with_options(options());

    assert_eq!(restarted.hydrate().unwrap(), 25);
    assert_eq!(
        restarted_index.match_url("/legacy/page-24").as_deref(),
        Some("/pages/24")
    );
    assert!(restarted.run_cycle().unwrap_err().is_fetch_error());
    assert_eq!(restarted_index.len(), 25);
}

#[test]
fn test_domain_rules_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("redirects.json");
    let updated = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    let source = Arc::new(StaticSource::new(vec![Redirect::new(
        "domain-1",
        "",
        "https://new-domain.com/",
        updated,
    )
    .with_domain("old-domain\\.com$")]));
    let coordinator = SyncCoordinator::new(
        Arc::new(RuleIndex::new()),
        source,
        Arc::new(JsonFileStore::open(&path).unwrap()),
    )
    .with_options(options());
    coordinator.run_cycle().unwrap();

    let stored = JsonFileStore::open(&path).unwrap().list_all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].from_domain, "old-domain\\.com$");
}

#[test]
fn test_plan_then_apply() {
    let index = Arc::new(RuleIndex::new());
    let store = Arc::new(MemoryStore::with_records(remote_set(3)));
    let source = Arc::new(StaticSource::new(remote_set(2)));
    let coordinator = SyncCoordinator::new(index.clone(), source, store.clone())
        .with_options(options());
    coordinator.hydrate().unwrap();

    let batch = coordinator.fetch().unwrap();
    let plan = coordinator.plan(&batch).unwrap();
    assert_eq!(plan.deletions.len(), 1);
    assert_eq!(plan.deletions[0].id, "id-2");
    assert!(plan.additions.is_empty());
    assert!(plan.updates.is_empty());

    // Planning alone changes nothing
    assert_eq!(index.len(), 3);
    assert_eq!(store.len(), 3);

    let report = coordinator.apply(plan);
    assert_eq!(report.deleted, 1);
    assert_eq!(index.len(), 2);
    assert_eq!(store.len(), 2);
    assert_eq!(coordinator.checkpoint(), Some(batch.watermark));
}

#[test]
fn test_stuck_cursor_aborts_cycle() {
    struct StuckSource;

    impl redirect_engine_r::RemoteSource for StuckSource {
        fn fetch_page(&self, _after: Option<&str>) -> redirect_engine_r::Result<redirect_engine_r::RedirectPage> {
            Ok(redirect_engine_r::RedirectPage {
                redirects: remote_set(1),
                has_next_page: true,
                end_cursor: Some("same".into()),
            })
        }
    }

    let index = Arc::new(RuleIndex::new());
    let coordinator = SyncCoordinator::new(
        index.clone(),
        Arc::new(StuckSource),
        Arc::new(MemoryStore::new()),
    )
    .with_options(options());

    match coordinator.run_cycle() {
        Err(RedirectError::Fetch { kind, .. }) => assert_eq!(kind, FetchErrorKind::Pagination),
        other => panic!("expected pagination error, got {:?}", other),
    }
    assert!(index.is_empty());
}
