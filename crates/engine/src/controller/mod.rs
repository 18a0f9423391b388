// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-sandbox reconcile loop.
//!
//! Driven by the same cache the claim engine reads. Each sandbox id has
//! at most one worker task in flight; events for the same id are
//! processed in arrival order, and there is no ordering across ids.
//! Status commits go through a read-modify-commit loop on the store's
//! CAS; any non-conflict error is logged and the object re-queued.

mod reconcile;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use sp_adapters::{Orchestrator, OrchestratorError};
use sp_core::{annotations, Clock, Sandbox, SandboxId, Workload};

use crate::bus::EventBus;
use crate::cache::{CacheEvent, ObjectCache};

/// Oracle deciding whether a workload is routable without a Ready
/// report. A function of the workload object only.
pub type BypassFn = Arc<dyn Fn(&Workload) -> bool + Send + Sync>;

/// Default oracle: an explicit bypass annotation on the workload.
pub fn default_bypass() -> BypassFn {
    Arc::new(|workload: &Workload| {
        workload.annotation(annotations::BYPASS) == Some(annotations::TRUE)
    })
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("status commit on {0} still conflicting after {1} attempts")]
    CommitConflict(SandboxId, u32),
}

#[derive(Clone)]
pub struct ControllerConfig {
    /// Grace period for workload deletion during pause/terminate.
    pub pod_deletion_grace: Duration,
    /// Delay before re-queueing a failed reconcile.
    pub requeue_delay: Duration,
    /// Attempts for conflict-retry commit loops.
    pub commit_attempts: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            pod_deletion_grace: Duration::from_secs(30),
            requeue_delay: Duration::from_millis(500),
            commit_attempts: 5,
        }
    }
}

pub struct Controller<O, C: Clock> {
    orchestrator: Arc<O>,
    cache: Arc<ObjectCache<O, C>>,
    bus: EventBus,
    clock: C,
    bypass: BypassFn,
    config: ControllerConfig,
    workers: Mutex<HashMap<SandboxId, mpsc::UnboundedSender<()>>>,
}

impl<O: Orchestrator, C: Clock> Controller<O, C> {
    pub fn new(
        orchestrator: Arc<O>,
        cache: Arc<ObjectCache<O, C>>,
        bus: EventBus,
        clock: C,
        bypass: BypassFn,
        config: ControllerConfig,
    ) -> Self {
        Self {
            orchestrator,
            cache,
            bus,
            clock,
            bypass,
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Consume cache events until cancelled, fanning each out to its
    /// sandbox's worker. Subscribe before the cache task starts so no
    /// replayed event is missed.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<CacheEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => {
                    let Some(event) = event else { return };
                    let id = match &event {
                        CacheEvent::Sandbox(ev) => ev.object().id(),
                        CacheEvent::Workload(id, _) => id.clone(),
                    };
                    Self::nudge(&self, id, &cancel);
                }
            }
        }
    }

    /// Hand the id to its serialized worker, creating one if needed.
    fn nudge(this: &Arc<Self>, id: SandboxId, cancel: &CancellationToken) {
        let mut workers = this.workers.lock();
        if let Some(tx) = workers.get(&id) {
            if tx.send(()).is_ok() {
                return;
            }
            workers.remove(&id);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(());
        workers.insert(id.clone(), tx);
        let controller = Arc::clone(this);
        let cancel = cancel.clone();
        tokio::spawn(async move { controller.worker_loop(id, rx, cancel).await });
    }

    async fn worker_loop(
        self: Arc<Self>,
        id: SandboxId,
        mut rx: mpsc::UnboundedReceiver<()>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                nudge = rx.recv() => {
                    if nudge.is_none() {
                        break;
                    }
                    if let Err(e) = self.reconcile(&id).await {
                        warn!(sandbox = %id, error = %e, "reconcile failed, requeueing");
                        let controller = Arc::clone(&self);
                        let requeue = id.clone();
                        let delay = self.config.requeue_delay;
                        let requeue_cancel = cancel.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            if !requeue_cancel.is_cancelled() {
                                Self::nudge(&controller, requeue, &requeue_cancel);
                            }
                        });
                    }
                    if self.cache.get_cached(&id).is_none() {
                        break;
                    }
                }
            }
        }
        drop(rx);
        let mut workers = self.workers.lock();
        if workers.get(&id).map(|tx| tx.is_closed()).unwrap_or(false) {
            workers.remove(&id);
        }
    }

    /// Read-modify-commit against the spec/metadata endpoint. `mutate`
    /// returns false when no write is needed.
    pub(crate) async fn update_sandbox_with(
        &self,
        id: &SandboxId,
        mutate: impl Fn(&mut Sandbox) -> bool + Send,
    ) -> Result<(), ControllerError> {
        for _ in 0..self.config.commit_attempts {
            let current = match self.orchestrator.get_sandbox(id).await {
                Ok(current) => current,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            let mut updated = current;
            if !mutate(&mut updated) {
                return Ok(());
            }
            match self.orchestrator.update_sandbox(&updated).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() => continue,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ControllerError::CommitConflict(id.clone(), self.config.commit_attempts))
    }

    /// Commit a new status, re-reading on conflict. No write is issued
    /// when the desired status already matches the observed one.
    pub(crate) async fn commit_status(
        &self,
        observed: &Sandbox,
        mut desired: Sandbox,
    ) -> Result<(), ControllerError> {
        desired.status.observed_generation = desired.generation;
        if desired.status == observed.status {
            return Ok(());
        }
        let mut attempt = desired;
        for _ in 0..self.config.commit_attempts {
            match self.orchestrator.update_sandbox_status(&attempt).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() => {
                    match self.orchestrator.get_sandbox(&attempt.id()).await {
                        Ok(fresh) => {
                            let status = attempt.status.clone();
                            attempt = fresh;
                            attempt.status = status;
                            attempt.status.observed_generation = attempt.generation;
                        }
                        Err(e) if e.is_not_found() => return Ok(()),
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ControllerError::CommitConflict(attempt.id(), self.config.commit_attempts))
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
