// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sp_adapters::FakeOrchestrator;
use sp_core::{ConditionStatus, FakeClock, SandboxBuilder, SandboxPhase};
use std::collections::BTreeMap;

/// Epoch the fake orchestrator stamps as creation time, in millis.
const CREATION_EPOCH_MS: u64 = 1_700_000_000_000;

struct Harness {
    orchestrator: Arc<FakeOrchestrator>,
    engine: Arc<ClaimEngine<FakeOrchestrator, FakeClock>>,
    clock: FakeClock,
    cancel: CancellationToken,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(ClaimConfig::default()).await
    }

    async fn with_config(config: ClaimConfig) -> Self {
        let orchestrator = Arc::new(FakeOrchestrator::new());
        let clock = FakeClock::new();
        clock.set_wall_ms(CREATION_EPOCH_MS + 100_000);
        let expectations = Arc::new(ExpectationTracker::new(clock.clone()));
        let cache =
            Arc::new(ObjectCache::new(Arc::clone(&orchestrator), Arc::clone(&expectations)));
        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&cache).run(cancel.clone()));
        let engine = Arc::new(ClaimEngine::new(
            ClaimDeps {
                orchestrator: Arc::clone(&orchestrator),
                cache,
                expectations,
                picks: Arc::new(PickRegistry::new()),
                bus: EventBus::new(),
                runtime: RuntimeClient::new().unwrap(),
                clock: clock.clone(),
            },
            config,
        ));
        Self { orchestrator, engine, clock, cancel }
    }

    fn seed_available(&self, name: &str) -> Sandbox {
        self.orchestrator
            .put_sandbox(SandboxBuilder::available("default", name, "small", "10.0.0.1"))
    }

    /// Wait until the cache has indexed the pool.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    /// Drive a locked sandbox to Ready the way the lifecycle controller
    /// would, as soon as the claim's lock write lands.
    fn make_ready_once_locked(&self, name: &str) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let id = SandboxId::from_parts("default", name);
        tokio::spawn(async move {
            for _ in 0..100 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let locked = orchestrator.sandbox(&id).map(|s| !s.lock().is_empty()).unwrap_or(false);
                if locked {
                    orchestrator.set_sandbox(&id, |s| {
                        s.status.phase = SandboxPhase::Running;
                        s.status.observed_generation = s.generation;
                        s.status.conditions = vec![sp_core::Condition::new(
                            ConditionType::Ready,
                            ConditionStatus::True,
                        )];
                        let info =
                            s.status.pod_info.get_or_insert_with(sp_core::PodInfo::default);
                        if info.address.is_empty() {
                            info.address = "10.0.0.9".to_string();
                        }
                        if info.uid.is_empty() {
                            info.uid = "pod-uid-9".to_string();
                        }
                    });
                    return;
                }
            }
        });
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn quick(options: ClaimOptions) -> ClaimOptions {
    ClaimOptions { claim_timeout: Duration::ZERO, ..options }
}

#[tokio::test]
async fn happy_path_claims_available_sandbox() {
    let h = Harness::new().await;
    h.seed_available("sbx-1");
    h.settle().await;

    let (result, metrics) =
        h.engine.claim(ClaimOptions::new("alice", "small"), CancellationToken::new()).await;

    let claimed = result.unwrap();
    assert_eq!(claimed.owner(), "alice");
    assert!(claimed.is_claimed());
    assert!(!claimed.lock().is_empty());
    assert!(claimed.owner_references.is_empty());
    assert_eq!(metrics.lock_type, Some(LockType::Update));
    assert_eq!(metrics.retries, 0);

    // The store agrees with the returned handle.
    let stored = h.orchestrator.sandbox(&claimed.id()).unwrap();
    assert_eq!(stored.owner(), "alice");
    assert_eq!(stored.lock(), claimed.lock());
}

#[tokio::test]
async fn explicit_lock_token_is_honored() {
    let h = Harness::new().await;
    h.seed_available("sbx-1");
    h.settle().await;

    let options = ClaimOptions {
        lock_token: Some("my-opaque-token".to_string()),
        ..ClaimOptions::new("alice", "small")
    };
    let (result, _) = h.engine.claim(options, CancellationToken::new()).await;
    assert_eq!(result.unwrap().lock(), "my-opaque-token");
}

#[tokio::test]
async fn empty_pool_yields_no_available() {
    let h = Harness::new().await;

    let (result, metrics) =
        h.engine.claim(quick(ClaimOptions::new("alice", "small")), CancellationToken::new()).await;

    assert!(matches!(result.unwrap_err(), ClaimError::NoAvailable(_)));
    assert!(metrics.last_error.contains("small"));
    assert_eq!(metrics.retries, 0);
}

#[tokio::test]
async fn locked_candidates_are_skipped() {
    let h = Harness::new().await;
    h.orchestrator.put_sandbox(
        SandboxBuilder::new("default", "sbx-1")
            .pool_owned("small")
            .phase(SandboxPhase::Running)
            .address("10.0.0.1")
            .ready()
            .annotation(annotations::LOCK, "held-elsewhere")
            .build(),
    );
    h.settle().await;

    let (result, _) =
        h.engine.claim(quick(ClaimOptions::new("alice", "small")), CancellationToken::new()).await;
    assert!(matches!(result.unwrap_err(), ClaimError::NoAvailable(_)));
}

#[tokio::test]
async fn concurrent_claims_admit_exactly_one_winner() {
    let h = Harness::new().await;
    h.seed_available("sbx-1");
    h.settle().await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = Arc::clone(&h.engine);
        handles.push(tokio::spawn(async move {
            engine
                .claim(quick(ClaimOptions::new(format!("user-{i}"), "small")), CancellationToken::new())
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        let (result, _) = handle.await.unwrap();
        match result {
            Ok(_) => winners += 1,
            Err(e) => assert!(e.is_retriable(), "unexpected terminal error: {e}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn conflicts_are_retried_until_success() {
    let h = Harness::new().await;
    h.seed_available("sbx-1");
    h.settle().await;
    h.orchestrator.inject_update_conflicts(2);

    let options =
        ClaimOptions { claim_timeout: Duration::from_secs(10), ..ClaimOptions::new("alice", "small") };
    let (result, metrics) = h.engine.claim(options, CancellationToken::new()).await;

    assert!(result.is_ok());
    assert_eq!(metrics.retries, 2);
}

#[tokio::test]
async fn create_on_no_stock_synthesizes_from_template() {
    let h = Harness::new().await;
    h.orchestrator.put_template(sp_core::PoolTemplate {
        namespace: "default".to_string(),
        name: "small".to_string(),
        image: "sandbox:v1".to_string(),
        labels: BTreeMap::from([("pool".to_string(), "small".to_string())]),
        ..sp_core::PoolTemplate::default()
    });

    // Make whatever gets created Ready once the engine locks it.
    let orchestrator = Arc::clone(&h.orchestrator);
    tokio::spawn(async move {
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let created: Vec<_> = orchestrator.list_sandboxes("default").await.unwrap();
            if let Some(s) = created.first() {
                let id = s.id();
                orchestrator.set_sandbox(&id, |s| {
                    s.status.phase = SandboxPhase::Running;
                    s.status.observed_generation = s.generation;
                    s.status.conditions = vec![sp_core::Condition::new(
                        ConditionType::Ready,
                        ConditionStatus::True,
                    )];
                    s.status.pod_info = Some(sp_core::PodInfo {
                        address: "10.0.0.5".to_string(),
                        uid: "pod-uid-5".to_string(),
                        annotations: BTreeMap::new(),
                    });
                });
                return;
            }
        }
    });

    let options = ClaimOptions {
        create_on_no_stock: true,
        claim_timeout: Duration::from_secs(5),
        wait_ready_timeout: Duration::from_secs(5),
        ..ClaimOptions::new("alice", "small")
    };
    let (result, metrics) = h.engine.claim(options, CancellationToken::new()).await;

    let claimed = result.unwrap();
    assert_eq!(metrics.lock_type, Some(LockType::Create));
    assert!(claimed.name.starts_with("small-"));
    assert_eq!(claimed.spec.image, "sandbox:v1");
    assert_eq!(claimed.labels.get("pool").map(String::as_str), Some("small"));
    assert_eq!(claimed.owner(), "alice");
}

#[tokio::test]
async fn create_on_no_stock_respects_the_rate_limiter() {
    let config = ClaimConfig { create_burst: 0.0, ..ClaimConfig::default() };
    let h = Harness::with_config(config).await;
    h.orchestrator.put_template(sp_core::PoolTemplate {
        namespace: "default".to_string(),
        name: "small".to_string(),
        ..sp_core::PoolTemplate::default()
    });

    let options = quick(ClaimOptions {
        create_on_no_stock: true,
        ..ClaimOptions::new("alice", "small")
    });
    let (result, _) = h.engine.claim(options, CancellationToken::new()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, ClaimError::Retriable(_)));
    assert!(err.to_string().contains("rate limited"));
    assert_eq!(h.orchestrator.sandbox_count(), 0);
}

#[tokio::test]
async fn old_creating_sandboxes_are_claimed_speculatively() {
    let h = Harness::new().await;
    h.orchestrator.put_sandbox(
        SandboxBuilder::new("default", "warming")
            .pool_owned("small")
            .phase(SandboxPhase::Pending)
            .build(),
    );
    h.settle().await;
    h.make_ready_once_locked("warming");

    // Creation was 100s ago on the fake clock; 60s qualifies.
    let options = ClaimOptions {
        speculate_creating_duration: Some(Duration::from_secs(60)),
        claim_timeout: Duration::from_secs(5),
        wait_ready_timeout: Duration::from_secs(5),
        ..ClaimOptions::new("alice", "small")
    };
    let (result, metrics) = h.engine.claim(options, CancellationToken::new()).await;

    assert!(result.is_ok());
    assert_eq!(metrics.lock_type, Some(LockType::Speculate));
}

#[tokio::test]
async fn young_creating_sandboxes_are_not_speculated() {
    let h = Harness::new().await;
    h.clock.set_wall_ms(CREATION_EPOCH_MS + 10_000);
    h.orchestrator.put_sandbox(
        SandboxBuilder::new("default", "warming")
            .pool_owned("small")
            .phase(SandboxPhase::Pending)
            .build(),
    );
    h.settle().await;

    let options = quick(ClaimOptions {
        speculate_creating_duration: Some(Duration::from_secs(60)),
        ..ClaimOptions::new("alice", "small")
    });
    let (result, _) = h.engine.claim(options, CancellationToken::new()).await;
    assert!(matches!(result.unwrap_err(), ClaimError::NoAvailable(_)));
}

#[tokio::test]
async fn inplace_update_failure_deletes_the_locked_sandbox() {
    let h = Harness::new().await;
    let seeded = h.seed_available("sbx-2");
    let id = seeded.id();
    h.settle().await;

    // Simulate the workload failing to start on the new image.
    let orchestrator = Arc::clone(&h.orchestrator);
    let fail_id = id.clone();
    tokio::spawn(async move {
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let locked =
                orchestrator.sandbox(&fail_id).map(|s| !s.lock().is_empty()).unwrap_or(false);
            if locked {
                orchestrator.set_sandbox(&fail_id, |s| {
                    s.status.conditions = vec![sp_core::Condition::new(
                        ConditionType::Ready,
                        ConditionStatus::False,
                    )
                    .with_reason(reasons::START_CONTAINER_FAILED)
                    .with_message("image pull back-off")];
                });
                return;
            }
        }
    });

    let options = ClaimOptions {
        inplace_update: Some(InplaceUpdate { image: "sandbox:v2".to_string() }),
        claim_timeout: Duration::from_secs(5),
        wait_ready_timeout: Duration::from_secs(5),
        ..ClaimOptions::new("alice", "small")
    };
    let (result, metrics) = h.engine.claim(options, CancellationToken::new()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, ClaimError::Unrecoverable(_)));
    assert!(err.to_string().contains("sandbox inplace update failed"));
    assert_eq!(metrics.lock_type, Some(LockType::Update));

    // Cleanup deletes the locked sandbox in the background.
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if h.orchestrator.sandbox(&id).map(|s| s.is_deleting()).unwrap_or(true) {
            return;
        }
    }
    panic!("failed sandbox was never deleted");
}

#[tokio::test]
async fn reserve_failed_sandbox_keeps_the_lock_held() {
    let h = Harness::new().await;
    let seeded = h.seed_available("sbx-2");
    let id = seeded.id();
    h.settle().await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let fail_id = id.clone();
    tokio::spawn(async move {
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let locked =
                orchestrator.sandbox(&fail_id).map(|s| !s.lock().is_empty()).unwrap_or(false);
            if locked {
                orchestrator.set_sandbox(&fail_id, |s| {
                    s.status.conditions = vec![sp_core::Condition::new(
                        ConditionType::Ready,
                        ConditionStatus::False,
                    )
                    .with_reason(reasons::START_CONTAINER_FAILED)];
                });
                return;
            }
        }
    });

    let options = ClaimOptions {
        inplace_update: Some(InplaceUpdate { image: "sandbox:v2".to_string() }),
        reserve_failed_sandbox: true,
        claim_timeout: Duration::from_secs(5),
        wait_ready_timeout: Duration::from_secs(5),
        ..ClaimOptions::new("alice", "small")
    };
    let (result, _) = h.engine.claim(options, CancellationToken::new()).await;
    assert!(result.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let reserved = h.orchestrator.sandbox(&id).unwrap();
    assert!(!reserved.is_deleting());
    assert!(!reserved.lock().is_empty());
}

#[tokio::test]
async fn invalid_options_fail_fast() {
    let h = Harness::new().await;
    let cases = vec![
        ClaimOptions::new("", "small"),
        ClaimOptions::new("alice", ""),
        ClaimOptions { candidate_count: 0, ..ClaimOptions::new("alice", "small") },
        ClaimOptions {
            csi_mount: Some(CsiMount { driver: "disk".to_string(), request: "{}".to_string() }),
            ..ClaimOptions::new("alice", "small")
        },
    ];
    for options in cases {
        let (result, metrics) = h.engine.claim(options, CancellationToken::new()).await;
        assert!(matches!(result.unwrap_err(), ClaimError::InvalidOptions(_)));
        assert!(!metrics.last_error.is_empty());
    }
}

#[tokio::test]
async fn modifier_runs_before_the_lock_write() {
    let h = Harness::new().await;
    h.seed_available("sbx-1");
    h.settle().await;

    let options = ClaimOptions {
        modifier: Some(Arc::new(|s: &mut Sandbox| {
            s.labels.insert("customized".to_string(), "yes".to_string());
            Ok(())
        })),
        ..ClaimOptions::new("alice", "small")
    };
    let (result, _) = h.engine.claim(options, CancellationToken::new()).await;
    assert_eq!(result.unwrap().labels.get("customized").map(String::as_str), Some("yes"));
}

#[tokio::test]
async fn metrics_total_covers_stage_sum() {
    let h = Harness::new().await;
    h.seed_available("sbx-1");
    h.settle().await;

    let (result, metrics) =
        h.engine.claim(ClaimOptions::new("alice", "small"), CancellationToken::new()).await;
    assert!(result.is_ok());
    let staged = metrics.wait
        + metrics.pick_and_lock
        + metrics.wait_ready
        + metrics.init_runtime
        + metrics.csi_mount;
    assert!(metrics.total >= staged);
}
