//! End-to-end behaviour of the root cache, view snapshots, liveness and sweeper
//! over the in-memory store.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tidecache::application::table::TableQuery;
use tidecache::cache::{BackingStore, RecomputeOutcome};
use tidecache::domain::keys::{CacheKey, RootKey, ViewKey};
use tidecache::domain::uploads::TempArtifact;
use tokio::time::Instant;

use support::{CountingResolver, session, stack, version_of};

#[tokio::test(start_paused = true)]
async fn concurrent_recomputes_never_overlap() {
    let resolver = Arc::new(CountingResolver::with_delay(Duration::from_millis(120)));
    let stack = stack(resolver.clone(), None);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let roots = stack.roots.clone();
        tasks.push(tokio::spawn(async move {
            roots.recompute(RootKey::ProcessedFiles).await
        }));
    }
    for task in tasks {
        let outcome = task.await.expect("join").expect("recompute");
        assert!(matches!(outcome, RecomputeOutcome::Committed(_)));
    }

    assert_eq!(resolver.calls(), 8);
    assert_eq!(resolver.max_in_flight(), 1);
    assert!(stack.roots.is_ready(RootKey::ProcessedFiles).await.expect("ready"));
}

#[tokio::test(start_paused = true)]
async fn ignore_when_locked_skips_busy_keys() {
    let resolver = Arc::new(CountingResolver::default());
    let stack = stack(resolver.clone(), None);

    let guard = stack
        .locks
        .acquire(&CacheKey::Root(RootKey::DeletedFiles))
        .await
        .expect("hold lock");
    let outcome = stack
        .roots
        .recompute_if_unlocked(RootKey::DeletedFiles)
        .await
        .expect("recompute");
    assert_eq!(outcome, RecomputeOutcome::Skipped);
    assert_eq!(resolver.calls(), 0);
    guard.release().await.expect("release");
}

#[tokio::test(start_paused = true)]
async fn crashed_lock_holder_recovers_after_ttl() {
    let resolver = Arc::new(CountingResolver::default());
    let stack = stack(resolver.clone(), None);

    // A holder that never releases: write the marker the way a crashed process
    // would leave it.
    let key = CacheKey::Root(RootKey::PendingFiles);
    let ttl = stack.locks.policy(&key).ttl;
    assert!(
        stack
            .store
            .set_if_absent(&key.lock_key(), bytes::Bytes::from_static(b"crashed"), Some(ttl))
            .await
            .expect("plant marker")
    );

    let started = Instant::now();
    let outcome = stack
        .roots
        .recompute(RootKey::PendingFiles)
        .await
        .expect("recompute");
    let waited = started.elapsed();

    assert!(matches!(outcome, RecomputeOutcome::Committed(_)));
    assert!(waited >= ttl, "waited {waited:?}");
    assert!(waited < ttl + Duration::from_secs(1), "waited {waited:?}");
    assert!(!stack.locks.is_locked(&key).await.expect("lock state"));
}

#[tokio::test]
async fn views_are_stable_until_refreshed() {
    let resolver = Arc::new(CountingResolver::default());
    let stack = stack(resolver.clone(), None);
    let (a, b) = (session("alpha"), session("bravo"));
    let key = RootKey::ProcessedFiles;

    let first = stack.service.get_view(&a, key).await.expect("seed a");
    assert_eq!(version_of(key, &first), "v0");

    stack.roots.recompute(key).await.expect("recompute");
    let again = stack.service.get_view(&a, key).await.expect("read a");
    assert_eq!(version_of(key, &again), "v0");

    // A brand-new session copies the current root instead of recomputing.
    let other = stack.service.get_view(&b, key).await.expect("seed b");
    assert_eq!(version_of(key, &other), "v1");
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test]
async fn refresh_recomputes_root_then_propagates_to_one_view() {
    let resolver = Arc::new(CountingResolver::default());
    let stack = stack(resolver.clone(), None);
    let (a, b) = (session("alpha"), session("bravo"));
    let key = RootKey::DiscoveredFiles;

    stack.service.get_view(&a, key).await.expect("seed a");
    stack.service.get_view(&b, key).await.expect("seed b");

    let handle = stack.service.refresh_view(&a, key).await.expect("submit");
    assert!(!handle.id().is_empty());
    handle.wait().await.expect("chain completes");

    assert!(stack.service.is_view_ready(&a, key).await.expect("ready"));
    let root = stack.roots.get(key).await.expect("root");
    let refreshed = stack.service.get_view(&a, key).await.expect("read a");
    assert_eq!(refreshed, root);
    assert_eq!(version_of(key, &refreshed), "v1");

    let untouched = stack.service.get_view(&b, key).await.expect("read b");
    assert_eq!(version_of(key, &untouched), "v0");
}

#[tokio::test(start_paused = true)]
async fn views_stay_byte_identical_while_roots_recompute() {
    let resolver = Arc::new(CountingResolver::with_delay(Duration::from_millis(40)));
    let stack = stack(resolver.clone(), None);
    let key = RootKey::ProcessedFiles;
    let sessions = vec![session("alpha"), session("bravo"), session("charlie")];

    let mut seeded = Vec::new();
    for s in &sessions {
        seeded.push(stack.service.get_view(s, key).await.expect("seed"));
    }

    let mut recomputes = Vec::new();
    for _ in 0..5 {
        let roots = stack.roots.clone();
        recomputes.push(tokio::spawn(async move { roots.recompute(key).await }));
    }

    let mut readers = Vec::new();
    for (s, expected) in sessions.into_iter().zip(seeded) {
        let views = stack.views.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..20 {
                let value = views.get_view(&s, key).await.expect("read");
                assert_eq!(value, expected, "snapshot of {s} changed");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }));
    }

    for reader in readers {
        reader.await.expect("reader");
    }
    for task in recomputes {
        task.await.expect("join").expect("recompute");
    }
    assert_eq!(resolver.calls(), 6);
    assert_eq!(
        version_of(key, &stack.roots.get(key).await.expect("root")),
        "v5"
    );
}

#[tokio::test(start_paused = true)]
async fn refresh_commits_the_value_its_own_recompute_produced() {
    let resolver = Arc::new(CountingResolver::with_delay(Duration::from_millis(40)));
    let stack = stack(resolver.clone(), None);
    let a = session("alpha");
    let key = RootKey::DiscoveredFiles;
    stack.service.get_view(&a, key).await.expect("seed");

    // Holding the view lock parks the propagation stage until a later recompute
    // has replaced the root.
    let view_lock = stack
        .locks
        .acquire(&CacheKey::from(ViewKey::new(a.clone(), key)))
        .await
        .expect("hold view lock");
    let handle = stack.service.refresh_view(&a, key).await.expect("submit");
    tokio::time::sleep(Duration::from_millis(10)).await;

    let roots = stack.roots.clone();
    let later = tokio::spawn(async move { roots.recompute(key).await })
        .await
        .expect("join")
        .expect("later recompute");
    assert_eq!(
        version_of(key, later.committed_value().expect("committed")),
        "v2"
    );
    assert!(!stack.service.is_view_ready(&a, key).await.expect("ready"));

    view_lock.release().await.expect("release view lock");
    handle.wait().await.expect("chain completes");

    let view = stack.service.get_view(&a, key).await.expect("read");
    assert_eq!(version_of(key, &view), "v1");
    assert_eq!(
        version_of(key, &stack.roots.get(key).await.expect("root")),
        "v2"
    );
    assert!(stack.service.is_view_ready(&a, key).await.expect("ready"));
}

#[tokio::test(start_paused = true)]
async fn cancelled_first_view_read_clears_root_working_flag() {
    let resolver = Arc::new(CountingResolver::with_delay(Duration::from_secs(5)));
    let stack = stack(resolver.clone(), None);
    let key = RootKey::PendingFiles;

    let views = stack.views.clone();
    let reader = tokio::spawn(async move { views.get_view(&session("alpha"), key).await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(resolver.calls(), 1);
    assert!(!stack.roots.is_ready(key).await.expect("ready while resolving"));

    reader.abort();
    assert!(reader.await.expect_err("aborted").is_cancelled());
    // Let the cleanup spawned by the dropped recompute run.
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(stack.roots.is_ready(key).await.expect("ready after cancel"));
    assert!(
        !stack
            .locks
            .is_locked(&CacheKey::Root(key))
            .await
            .expect("lock state")
    );
    assert!(stack.roots.peek(key).await.expect("peek").is_none());
}

#[tokio::test]
async fn failed_refresh_clears_flag_and_keeps_last_good_value() {
    let resolver = Arc::new(CountingResolver::default());
    let stack = stack(resolver.clone(), None);
    let a = session("alpha");
    let key = RootKey::ProcessedFiles;

    stack.service.get_view(&a, key).await.expect("seed");
    resolver.fail_from_now();

    let handle = stack.service.refresh_view(&a, key).await.expect("submit");
    handle.wait().await.expect_err("stage one fails");

    assert!(stack.service.is_view_ready(&a, key).await.expect("ready"));
    assert!(stack.service.is_root_ready(key).await.expect("root ready"));
    let value = stack.service.get_view(&a, key).await.expect("read");
    assert_eq!(version_of(key, &value), "v0");
    assert_eq!(
        version_of(key, &stack.roots.get(key).await.expect("root")),
        "v0"
    );
}

#[tokio::test]
async fn unset_keys_read_as_defaults_without_writing() {
    let resolver = Arc::new(CountingResolver::default());
    let stack = stack(resolver.clone(), None);

    for key in RootKey::ALL {
        let first = stack.roots.get(key).await.expect("get");
        let second = stack.roots.get(key).await.expect("get again");
        assert_eq!(first.as_ref(), key.default_value().as_slice());
        assert_eq!(first, second);
    }
    assert!(stack.store.is_empty());
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn registry_key_is_never_recomputed() {
    let resolver = Arc::new(CountingResolver::default());
    let stack = stack(resolver.clone(), None);

    let outcome = stack
        .roots
        .recompute(RootKey::Checkins)
        .await
        .expect("recompute");
    assert_eq!(outcome, RecomputeOutcome::NotDefined);
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn table_queries_page_over_the_snapshot() {
    let resolver = Arc::new(CountingResolver::default());
    let stack = stack(resolver, None);
    let a = session("alpha");

    let page = stack
        .service
        .view_table(
            &a,
            RootKey::ProcessedFiles,
            &TableQuery {
                draw: 9,
                search: Some("FILE-0".into()),
                ..TableQuery::default()
            },
        )
        .await
        .expect("table page");
    assert_eq!(page.draw, 9);
    assert_eq!(page.records_total, 1);
    assert_eq!(page.records_filtered, 1);

    let err = stack
        .service
        .view_table(&a, RootKey::Checkins, &TableQuery::default())
        .await
        .expect_err("registry is not a table");
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn concurrent_checkins_are_all_recorded() {
    let stack = stack(Arc::new(CountingResolver::default()), None);
    let now = 1_000;

    let mut tasks = Vec::new();
    for n in 0..50 {
        let liveness = stack.liveness.clone();
        tasks.push(tokio::spawn(async move {
            liveness
                .checkin(&session(&format!("s{n}")), now)
                .await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("checkin");
    }

    let valid = stack.liveness.valid_sessions(now).await.expect("valid");
    assert_eq!(valid.len(), 50);
}

#[tokio::test]
async fn sweep_reclaims_only_stale_sessions() {
    let pending = tempfile::TempDir::new().expect("tempdir");
    let stack = stack(
        Arc::new(CountingResolver::default()),
        Some(pending.path().to_path_buf()),
    );
    let (a, b) = (session("alpha"), session("bravo"));

    stack.liveness.checkin(&a, 0).await.expect("a at 0");
    stack.liveness.checkin(&b, 0).await.expect("b at 0");
    stack.liveness.checkin(&a, 100).await.expect("a at 100");

    for s in [&a, &b] {
        stack
            .views
            .get_view(s, RootKey::PendingFiles)
            .await
            .expect("seed view");
    }
    stack
        .views
        .begin_refresh(&ViewKey::new(b.clone(), RootKey::PendingFiles))
        .await
        .expect("b refreshing");

    let a_artifact = TempArtifact::new(a.clone(), "cast.csv").file_name();
    let b_artifact = TempArtifact::new(b.clone(), "cast.csv").file_name();
    for name in [a_artifact.as_str(), b_artifact.as_str(), "completed.csv"] {
        std::fs::write(pending.path().join(name), b"data").expect("write artifact");
    }

    let report = stack.sweeper.sweep(101).await.expect("sweep");
    assert_eq!(report.valid_sessions, 1);
    assert_eq!(report.views_removed, 1);
    assert_eq!(report.artifacts_removed, 1);

    let a_view = CacheKey::view(a.clone(), RootKey::PendingFiles);
    let b_view = CacheKey::view(b.clone(), RootKey::PendingFiles);
    assert!(stack.store.exists(&a_view.to_string()).await.expect("a view"));
    assert!(!stack.store.exists(&b_view.to_string()).await.expect("b view"));
    assert!(!stack.store.exists(&b_view.working_key()).await.expect("b flag"));
    assert!(pending.path().join(&a_artifact).exists());
    assert!(!pending.path().join(&b_artifact).exists());
    assert!(pending.path().join("completed.csv").exists());

    // A second pass finds nothing left to do.
    let again = stack.sweeper.sweep(101).await.expect("sweep again");
    assert_eq!(again.views_removed, 0);
    assert_eq!(again.artifacts_removed, 0);
}
