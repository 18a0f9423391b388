// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-driven snapshot of sandboxes and their workloads.
//!
//! Fed by the orchestrator's watch streams; indexed by id, pool and
//! owner. Reads are expectation-aware: a cached object known to be
//! stale falls back to an authoritative read. Waiters register per
//! `(id, action)` and resolve on the first matching cache update;
//! dispatch runs on a dedicated task per notified id so event handling
//! never blocks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sp_adapters::{Orchestrator, OrchestratorError, WatchEvent};
use sp_core::{effective_state, Clock, EffectiveState, Sandbox, SandboxId, Workload};

use crate::expectation::ExpectationTracker;

/// What a registered waiter is waiting for. One waiter per `(id,
/// action)`; a second waiter for the same id with a different action
/// fails immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitAction {
    Ready,
    Gone,
}

/// Predicate evaluated against each fresh object; an error terminates
/// the wait (fail-fast for unrecoverable conditions).
pub type WaitPredicate = Arc<dyn Fn(&Sandbox) -> Result<bool, String> + Send + Sync>;

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("wait timed out after {0:?}")]
    Timeout(Duration),

    #[error("waiter conflict on {id}: a {existing:?} waiter is already registered")]
    Conflict { id: SandboxId, existing: WaitAction },

    #[error("{0}")]
    Predicate(String),

    #[error("sandbox {0} was deleted while waiting")]
    Deleted(SandboxId),

    #[error("cache closed")]
    Closed,
}

/// Change notifications forwarded to subscribers (lifecycle controller,
/// router) after the snapshot is updated.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Sandbox(WatchEvent<Sandbox>),
    Workload(SandboxId, WatchEvent<Workload>),
}

type WaiterSlot = Arc<Mutex<Option<oneshot::Sender<Result<Sandbox, WaitError>>>>>;
type WaiterMap = Arc<Mutex<HashMap<SandboxId, Waiter>>>;

struct Waiter {
    action: WaitAction,
    predicate: WaitPredicate,
    tx: WaiterSlot,
}

/// Remove the waiter entry, but only if it is still the given one — a
/// later waiter may have re-registered under the same id.
fn remove_waiter(waiters: &WaiterMap, id: &SandboxId, slot: &WaiterSlot) {
    let mut waiters = waiters.lock();
    if waiters.get(id).map(|w| Arc::ptr_eq(&w.tx, slot)).unwrap_or(false) {
        waiters.remove(id);
    }
}

#[derive(Default)]
struct CacheInner {
    sandboxes: HashMap<SandboxId, Sandbox>,
    workloads: HashMap<SandboxId, Workload>,
    by_pool: HashMap<(String, String), HashSet<SandboxId>>,
    by_user: HashMap<String, HashSet<SandboxId>>,
}

impl CacheInner {
    fn unindex(&mut self, id: &SandboxId) {
        if let Some(old) = self.sandboxes.get(id) {
            let pool_key = (old.namespace.clone(), old.spec.template.clone());
            if let Some(set) = self.by_pool.get_mut(&pool_key) {
                set.remove(id);
            }
            let owner = old.owner().to_string();
            if !owner.is_empty() {
                if let Some(set) = self.by_user.get_mut(&owner) {
                    set.remove(id);
                }
            }
        }
    }

    fn index(&mut self, sandbox: Sandbox) {
        let id = sandbox.id();
        self.unindex(&id);
        if !sandbox.spec.template.is_empty() {
            self.by_pool
                .entry((sandbox.namespace.clone(), sandbox.spec.template.clone()))
                .or_default()
                .insert(id.clone());
        }
        let owner = sandbox.owner().to_string();
        if !owner.is_empty() {
            self.by_user.entry(owner).or_default().insert(id.clone());
        }
        self.sandboxes.insert(id, sandbox);
    }

    fn remove(&mut self, id: &SandboxId) {
        self.unindex(id);
        self.sandboxes.remove(id);
        self.workloads.remove(id);
    }
}

pub struct ObjectCache<O, C: Clock> {
    orchestrator: Arc<O>,
    expectations: Arc<ExpectationTracker<C>>,
    inner: RwLock<CacheInner>,
    waiters: WaiterMap,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<CacheEvent>>>,
}

impl<O: Orchestrator, C: Clock> ObjectCache<O, C> {
    pub fn new(orchestrator: Arc<O>, expectations: Arc<ExpectationTracker<C>>) -> Self {
        Self {
            orchestrator,
            expectations,
            inner: RwLock::new(CacheInner::default()),
            waiters: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Consume the orchestrator's watch streams until cancelled. Run as
    /// a dedicated task; everything else reads the snapshot it keeps.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut sandboxes = self.orchestrator.watch_sandboxes().await;
        let mut workloads = self.orchestrator.watch_workloads().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = sandboxes.recv() => match event {
                    Some(event) => self.apply_sandbox_event(event),
                    None => { warn!("sandbox watch stream closed"); return }
                },
                event = workloads.recv() => match event {
                    Some(event) => self.apply_workload_event(event),
                    None => { warn!("workload watch stream closed"); return }
                },
            }
        }
    }

    /// Register an interest in cache changes. Events arrive after the
    /// snapshot already reflects them.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CacheEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, event: CacheEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn apply_sandbox_event(&self, event: WatchEvent<Sandbox>) {
        match &event {
            WatchEvent::Added(sandbox) | WatchEvent::Modified(sandbox) => {
                self.expectations.observe(sandbox);
                self.inner.write().index(sandbox.clone());
                self.dispatch_waiter(sandbox.clone(), false);
            }
            WatchEvent::Deleted(sandbox) => {
                let id = sandbox.id();
                self.expectations.remove(&id);
                self.inner.write().remove(&id);
                self.dispatch_waiter(sandbox.clone(), true);
            }
        }
        self.publish(CacheEvent::Sandbox(event));
    }

    fn apply_workload_event(&self, event: WatchEvent<(SandboxId, Workload)>) {
        let forwarded = match event {
            WatchEvent::Added((id, workload)) => {
                self.inner.write().workloads.insert(id.clone(), workload.clone());
                CacheEvent::Workload(id, WatchEvent::Added(workload))
            }
            WatchEvent::Modified((id, workload)) => {
                self.inner.write().workloads.insert(id.clone(), workload.clone());
                CacheEvent::Workload(id, WatchEvent::Modified(workload))
            }
            WatchEvent::Deleted((id, workload)) => {
                self.inner.write().workloads.remove(&id);
                CacheEvent::Workload(id, WatchEvent::Deleted(workload))
            }
        };
        self.publish(forwarded);
    }

    /// Expectation-aware read: a cached object known to be stale falls
    /// back to a direct authoritative read.
    pub async fn get(&self, id: &SandboxId) -> Result<Sandbox, OrchestratorError> {
        if let Some(cached) = self.get_cached(id) {
            if self.expectations.satisfied(&cached) {
                return Ok(cached);
            }
            debug!(sandbox = %id, "cache stale for expectation, reading authoritative");
        }
        self.orchestrator.get_sandbox(id).await
    }

    /// Snapshot read without the staleness fallback.
    pub fn get_cached(&self, id: &SandboxId) -> Option<Sandbox> {
        self.inner.read().sandboxes.get(id).cloned()
    }

    /// Workload mirror for a sandbox.
    pub fn workload(&self, id: &SandboxId) -> Option<Workload> {
        self.inner.read().workloads.get(id).cloned()
    }

    /// Claim candidates: sandboxes of the pool in Available or Creating
    /// effective state.
    pub fn list_by_pool(&self, namespace: &str, template: &str) -> Vec<Sandbox> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_pool.get(&(namespace.to_string(), template.to_string())) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.sandboxes.get(id))
            .filter(|s| {
                matches!(
                    effective_state(s),
                    EffectiveState::Available | EffectiveState::Creating
                )
            })
            .cloned()
            .collect()
    }

    pub fn list_by_user(&self, owner: &str) -> Vec<Sandbox> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_user.get(owner) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| inner.sandboxes.get(id)).cloned().collect()
    }

    /// All cached sandboxes; used by the timeout sweeper.
    pub fn list_all(&self) -> Vec<Sandbox> {
        self.inner.read().sandboxes.values().cloned().collect()
    }

    /// Wait for the first cache update satisfying `predicate`.
    ///
    /// Single-flight per `(id, action)`: a second waiter with the same
    /// action conflicts, and so does one with a different action. The
    /// predicate also runs against the current snapshot immediately so
    /// an already-satisfied wait returns without an event.
    pub async fn wait_until(
        &self,
        id: &SandboxId,
        action: WaitAction,
        predicate: WaitPredicate,
        timeout: Duration,
    ) -> Result<Sandbox, WaitError> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        {
            let mut waiters = self.waiters.lock();
            if let Some(existing) = waiters.get(id) {
                return Err(WaitError::Conflict { id: id.clone(), existing: existing.action });
            }
            waiters.insert(
                id.clone(),
                Waiter { action, predicate: predicate.clone(), tx: Arc::clone(&slot) },
            );
        }

        if let Some(current) = self.get_cached(id) {
            match predicate(&current) {
                Ok(true) => {
                    remove_waiter(&self.waiters, id, &slot);
                    return Ok(current);
                }
                Err(message) => {
                    remove_waiter(&self.waiters, id, &slot);
                    return Err(WaitError::Predicate(message));
                }
                Ok(false) => {}
            }
        }

        let result = tokio::time::timeout(timeout, rx).await;
        remove_waiter(&self.waiters, id, &slot);
        match result {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => Err(WaitError::Closed),
            Err(_) => Err(WaitError::Timeout(timeout)),
        }
    }

    /// Evaluate a notified id's waiter on a dedicated task.
    fn dispatch_waiter(&self, sandbox: Sandbox, deleted: bool) {
        let id = sandbox.id();
        let waiter = {
            let waiters = self.waiters.lock();
            waiters.get(&id).map(|w| (w.action, w.predicate.clone(), Arc::clone(&w.tx)))
        };
        let Some((action, predicate, slot)) = waiter else {
            return;
        };
        let waiters = Arc::clone(&self.waiters);
        tokio::spawn(async move {
            let resolution = if deleted {
                match action {
                    WaitAction::Gone => Some(Ok(sandbox)),
                    WaitAction::Ready => Some(Err(WaitError::Deleted(id.clone()))),
                }
            } else {
                match predicate(&sandbox) {
                    Ok(true) => Some(Ok(sandbox)),
                    Ok(false) => None,
                    Err(message) => Some(Err(WaitError::Predicate(message))),
                }
            };
            if let Some(resolution) = resolution {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(resolution);
                }
                remove_waiter(&waiters, &id, &slot);
            }
        });
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
