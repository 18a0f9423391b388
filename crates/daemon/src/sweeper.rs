// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timeout sweeper: the consumer of `spec.shutdownTime` and
//! `spec.pauseTime`.
//!
//! Scans the cache on an interval; an elapsed shutdown instant turns
//! into a delete, an elapsed pause instant into `spec.paused = true`.
//! The lifecycle controller does the rest.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sp_adapters::Orchestrator;
use sp_core::{Clock, EventSource, Sandbox, SandboxEvent};
use sp_engine::{EventBus, ObjectCache};

pub struct Sweeper<O, C: Clock> {
    orchestrator: Arc<O>,
    cache: Arc<ObjectCache<O, C>>,
    bus: EventBus,
    clock: C,
    interval: Duration,
}

impl<O: Orchestrator, C: Clock> Sweeper<O, C> {
    pub fn new(
        orchestrator: Arc<O>,
        cache: Arc<ObjectCache<O, C>>,
        bus: EventBus,
        clock: C,
        interval: Duration,
    ) -> Self {
        Self { orchestrator, cache, bus, clock, interval }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => self.sweep().await,
            }
        }
    }

    pub async fn sweep(&self) {
        let now = self.clock.now_utc();
        for sandbox in self.cache.list_all() {
            if sandbox.status.phase.is_terminal() || sandbox.is_deleting() {
                continue;
            }
            if sandbox.spec.shutdown_time.map(|t| now >= t).unwrap_or(false) {
                self.shutdown(&sandbox).await;
            } else if !sandbox.spec.paused
                && sandbox.spec.pause_time.map(|t| now >= t).unwrap_or(false)
            {
                self.pause(&sandbox).await;
            }
        }
    }

    async fn shutdown(&self, sandbox: &Sandbox) {
        let id = sandbox.id();
        info!(sandbox = %id, owner = %sandbox.owner(), "shutdown time elapsed, deleting sandbox");
        match self.orchestrator.delete_sandbox(&id).await {
            Ok(()) => {
                self.bus.publish(SandboxEvent::Kill {
                    id,
                    source: EventSource::Sweeper,
                    message: "shutdown time elapsed".to_string(),
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(sandbox = %id, error = %e, "shutdown delete failed"),
        }
    }

    async fn pause(&self, sandbox: &Sandbox) {
        let id = sandbox.id();
        info!(sandbox = %id, owner = %sandbox.owner(), "pause time elapsed, pausing sandbox");
        // Read-modify-commit; a conflict just waits for the next sweep.
        let fresh = match self.orchestrator.get_sandbox(&id).await {
            Ok(fresh) => fresh,
            Err(_) => return,
        };
        if fresh.spec.paused {
            return;
        }
        let mut updated = fresh;
        updated.spec.paused = true;
        updated.spec.pause_time = None;
        if let Err(e) = self.orchestrator.update_sandbox(&updated).await {
            if !e.is_conflict() {
                warn!(sandbox = %id, error = %e, "pause update failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
