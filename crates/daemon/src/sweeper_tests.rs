// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::{TimeZone, Utc};
use sp_adapters::FakeOrchestrator;
use sp_core::{FakeClock, SandboxBuilder, SandboxEvent, SandboxPhase};
use sp_engine::ExpectationTracker;

const NOW_SECS: i64 = 1_700_000_100;

struct Harness {
    orchestrator: Arc<FakeOrchestrator>,
    sweeper: Arc<Sweeper<FakeOrchestrator, FakeClock>>,
    bus_rx: tokio::sync::mpsc::UnboundedReceiver<SandboxEvent>,
    cancel: CancellationToken,
}

impl Harness {
    async fn new() -> Self {
        let orchestrator = Arc::new(FakeOrchestrator::new());
        let clock = FakeClock::new();
        clock.set_wall_ms(NOW_SECS as u64 * 1000);
        let expectations = Arc::new(ExpectationTracker::new(clock.clone()));
        let cache =
            Arc::new(ObjectCache::new(Arc::clone(&orchestrator), Arc::clone(&expectations)));
        let bus = EventBus::new();
        let bus_rx = bus.subscribe();
        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&cache).run(cancel.clone()));
        let sweeper = Arc::new(Sweeper::new(
            Arc::clone(&orchestrator),
            cache,
            bus,
            clock,
            Duration::from_millis(100),
        ));
        Self { orchestrator, sweeper, bus_rx, cancel }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tokio::test]
async fn elapsed_shutdown_time_deletes_the_sandbox() {
    let mut h = Harness::new().await;
    let mut sandbox =
        SandboxBuilder::new("default", "sbx-1").template("small").phase(SandboxPhase::Running).build();
    sandbox.spec.shutdown_time = Utc.timestamp_opt(NOW_SECS - 10, 0).single();
    let id = h.orchestrator.put_sandbox(sandbox).id();
    tokio::time::sleep(Duration::from_millis(30)).await;

    h.sweeper.sweep().await;

    assert!(h.orchestrator.sandbox(&id).unwrap().is_deleting());
    let event = h.bus_rx.try_recv().unwrap();
    assert!(matches!(event, SandboxEvent::Kill { .. }));
}

#[tokio::test]
async fn future_shutdown_time_is_left_alone() {
    let h = Harness::new().await;
    let mut sandbox =
        SandboxBuilder::new("default", "sbx-1").template("small").phase(SandboxPhase::Running).build();
    sandbox.spec.shutdown_time = Utc.timestamp_opt(NOW_SECS + 3600, 0).single();
    let id = h.orchestrator.put_sandbox(sandbox).id();
    tokio::time::sleep(Duration::from_millis(30)).await;

    h.sweeper.sweep().await;

    assert!(!h.orchestrator.sandbox(&id).unwrap().is_deleting());
}

#[tokio::test]
async fn elapsed_pause_time_sets_the_paused_bit() {
    let h = Harness::new().await;
    let mut sandbox =
        SandboxBuilder::new("default", "sbx-1").template("small").phase(SandboxPhase::Running).build();
    sandbox.spec.pause_time = Utc.timestamp_opt(NOW_SECS - 10, 0).single();
    let id = h.orchestrator.put_sandbox(sandbox).id();
    tokio::time::sleep(Duration::from_millis(30)).await;

    h.sweeper.sweep().await;

    let swept = h.orchestrator.sandbox(&id).unwrap();
    assert!(swept.spec.paused);
    assert!(swept.spec.pause_time.is_none());
    assert!(!swept.is_deleting());
}
