// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sp_adapters::FakeOrchestrator;
use sp_core::{FakeClock, SandboxBuilder, SandboxPhase};

struct Harness {
    orchestrator: Arc<FakeOrchestrator>,
    cache: Arc<ObjectCache<FakeOrchestrator, FakeClock>>,
    expectations: Arc<ExpectationTracker<FakeClock>>,
    events: mpsc::UnboundedReceiver<CacheEvent>,
    cancel: CancellationToken,
}

impl Harness {
    async fn new() -> Self {
        let orchestrator = Arc::new(FakeOrchestrator::new());
        let expectations = Arc::new(ExpectationTracker::new(FakeClock::new()));
        let cache = Arc::new(ObjectCache::new(Arc::clone(&orchestrator), Arc::clone(&expectations)));
        let events = cache.subscribe();
        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&cache).run(cancel.clone()));
        Self { orchestrator, cache, expectations, events, cancel }
    }

    /// Wait until the cache has applied and forwarded one more event.
    async fn next_event(&mut self) -> CacheEvent {
        tokio::time::timeout(Duration::from_secs(1), self.events.recv())
            .await
            .expect("no cache event within 1s")
            .expect("cache event stream closed")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tokio::test]
async fn pool_listing_returns_available_and_creating_only() {
    let mut h = Harness::new().await;

    h.orchestrator.put_sandbox(SandboxBuilder::available("default", "avail", "small", "10.0.0.1"));
    h.orchestrator.put_sandbox(
        SandboxBuilder::new("default", "creating").template("small").phase(SandboxPhase::Pending).build(),
    );
    h.orchestrator.put_sandbox(
        SandboxBuilder::new("default", "claimed")
            .template("small")
            .phase(SandboxPhase::Running)
            .address("10.0.0.2")
            .ready()
            .claimed("bob")
            .build(),
    );
    for _ in 0..3 {
        h.next_event().await;
    }

    let pool = h.cache.list_by_pool("default", "small");
    let mut names: Vec<_> = pool.iter().map(|s| s.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["avail", "creating"]);
}

#[tokio::test]
async fn user_listing_follows_owner_annotation() {
    let mut h = Harness::new().await;
    h.orchestrator.put_sandbox(
        SandboxBuilder::new("default", "mine")
            .template("small")
            .phase(SandboxPhase::Running)
            .address("10.0.0.1")
            .ready()
            .claimed("alice")
            .build(),
    );
    h.next_event().await;

    assert_eq!(h.cache.list_by_user("alice").len(), 1);
    assert!(h.cache.list_by_user("bob").is_empty());
}

#[tokio::test]
async fn stale_get_falls_back_to_authoritative_read() {
    let mut h = Harness::new().await;
    let stored =
        h.orchestrator.put_sandbox(SandboxBuilder::available("default", "sbx", "small", "10.0.0.1"));
    h.next_event().await;
    let id = stored.id();

    // A writer recorded a version the cache has not seen yet.
    let mut future = stored.clone();
    future.resource_version = "999999".to_string();
    h.expectations.expect(&future);

    let cached = h.cache.get_cached(&id).unwrap();
    assert_eq!(cached.resource_version, stored.resource_version);

    // The fallback read goes to the store, not the stale snapshot.
    let fresh = h.cache.get(&id).await.unwrap();
    assert_eq!(fresh.resource_version, h.orchestrator.sandbox(&id).unwrap().resource_version);
}

#[tokio::test]
async fn wait_until_resolves_on_matching_update() {
    let mut h = Harness::new().await;
    let stored = h.orchestrator.put_sandbox(
        SandboxBuilder::new("default", "sbx").template("small").phase(SandboxPhase::Pending).build(),
    );
    h.next_event().await;
    let id = stored.id();

    let cache = Arc::clone(&h.cache);
    let wait_id = id.clone();
    let wait = tokio::spawn(async move {
        let predicate: WaitPredicate =
            Arc::new(|s: &Sandbox| Ok(s.status.phase == SandboxPhase::Running));
        cache.wait_until(&wait_id, WaitAction::Ready, predicate, Duration::from_secs(2)).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.orchestrator.set_sandbox(&id, |s| {
        s.status.phase = SandboxPhase::Running;
        s.status.observed_generation = s.generation;
    });

    let resolved = wait.await.unwrap().unwrap();
    assert_eq!(resolved.status.phase, SandboxPhase::Running);
}

#[tokio::test]
async fn second_waiter_conflicts() {
    let mut h = Harness::new().await;
    let stored = h.orchestrator.put_sandbox(
        SandboxBuilder::new("default", "sbx").template("small").phase(SandboxPhase::Pending).build(),
    );
    h.next_event().await;
    let id = stored.id();

    let cache = Arc::clone(&h.cache);
    let first_id = id.clone();
    let _first = tokio::spawn(async move {
        let predicate: WaitPredicate = Arc::new(|_| Ok(false));
        cache.wait_until(&first_id, WaitAction::Ready, predicate, Duration::from_secs(5)).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let predicate: WaitPredicate = Arc::new(|_| Ok(false));
    let err = h
        .cache
        .wait_until(&id, WaitAction::Gone, predicate, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, WaitError::Conflict { existing: WaitAction::Ready, .. }));
}

#[tokio::test]
async fn predicate_error_fails_the_wait() {
    let mut h = Harness::new().await;
    let stored = h.orchestrator.put_sandbox(
        SandboxBuilder::new("default", "sbx").template("small").phase(SandboxPhase::Pending).build(),
    );
    h.next_event().await;
    let id = stored.id();

    let cache = Arc::clone(&h.cache);
    let wait_id = id.clone();
    let wait = tokio::spawn(async move {
        let predicate: WaitPredicate = Arc::new(|s: &Sandbox| {
            if s.status.phase == SandboxPhase::Failed {
                Err("workload start failed".to_string())
            } else {
                Ok(false)
            }
        });
        cache.wait_until(&wait_id, WaitAction::Ready, predicate, Duration::from_secs(2)).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.orchestrator.set_sandbox(&id, |s| s.status.phase = SandboxPhase::Failed);

    let err = wait.await.unwrap().unwrap_err();
    assert!(matches!(err, WaitError::Predicate(ref m) if m.contains("start failed")));
}

#[tokio::test]
async fn deletion_fails_a_ready_waiter() {
    let mut h = Harness::new().await;
    let mut seed = SandboxBuilder::new("default", "sbx").template("small").build();
    seed.finalizers.clear();
    let stored = h.orchestrator.put_sandbox(seed);
    h.next_event().await;
    let id = stored.id();

    let cache = Arc::clone(&h.cache);
    let wait_id = id.clone();
    let wait = tokio::spawn(async move {
        let predicate: WaitPredicate = Arc::new(|_| Ok(false));
        cache.wait_until(&wait_id, WaitAction::Ready, predicate, Duration::from_secs(2)).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.orchestrator.delete_sandbox(&id).await.unwrap();

    let err = wait.await.unwrap().unwrap_err();
    assert!(matches!(err, WaitError::Deleted(_)));
}

#[tokio::test]
async fn wait_times_out_without_matching_update() {
    let mut h = Harness::new().await;
    let stored = h.orchestrator.put_sandbox(
        SandboxBuilder::new("default", "sbx").template("small").phase(SandboxPhase::Pending).build(),
    );
    h.next_event().await;

    let predicate: WaitPredicate = Arc::new(|_| Ok(false));
    let err = h
        .cache
        .wait_until(&stored.id(), WaitAction::Ready, predicate, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, WaitError::Timeout(_)));
}

#[tokio::test]
async fn already_satisfied_wait_returns_without_an_event() {
    let mut h = Harness::new().await;
    let stored =
        h.orchestrator.put_sandbox(SandboxBuilder::available("default", "sbx", "small", "10.0.0.1"));
    h.next_event().await;

    let predicate: WaitPredicate =
        Arc::new(|s: &Sandbox| Ok(s.status.phase == SandboxPhase::Running));
    let resolved = h
        .cache
        .wait_until(&stored.id(), WaitAction::Ready, predicate, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(resolved.name, "sbx");
}
