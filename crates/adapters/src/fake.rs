// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory orchestrator with real CAS semantics, for tests.
//!
//! Mirrors the store's behaviour closely enough to exercise the claim
//! and lifecycle paths: resource versions are a monotonic counter,
//! updates lose on version mismatch, deletion respects finalizers, and
//! watch streams replay existing objects before live events.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use sp_core::{PoolTemplate, Sandbox, SandboxId, Workload};

use crate::error::OrchestratorError;
use crate::orchestrator::{Orchestrator, WatchEvent};

/// Fixed creation instant stamped on objects that arrive without one,
/// so fake-clock tests stay deterministic.
const CREATION_EPOCH_SECS: i64 = 1_700_000_000;

#[derive(Default)]
struct Inner {
    sandboxes: HashMap<SandboxId, Sandbox>,
    workloads: HashMap<SandboxId, Workload>,
    templates: HashMap<(String, String), PoolTemplate>,
    next_version: u64,
    forced_update_conflicts: u32,
    sandbox_watchers: Vec<mpsc::UnboundedSender<WatchEvent<Sandbox>>>,
    workload_watchers: Vec<mpsc::UnboundedSender<WatchEvent<(SandboxId, Workload)>>>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn notify_sandbox(&mut self, event: WatchEvent<Sandbox>) {
        self.sandbox_watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn notify_workload(&mut self, event: WatchEvent<(SandboxId, Workload)>) {
        self.workload_watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Reclaim a deleting object once its last finalizer is gone.
    fn gc_sandbox(&mut self, id: &SandboxId) {
        let reclaim = self
            .sandboxes
            .get(id)
            .map(|s| s.is_deleting() && s.finalizers.is_empty())
            .unwrap_or(false);
        if reclaim {
            if let Some(gone) = self.sandboxes.remove(id) {
                self.notify_sandbox(WatchEvent::Deleted(gone));
            }
        }
    }
}

/// Test double for the cluster substrate.
pub struct FakeOrchestrator {
    inner: Mutex<Inner>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { next_version: 100, ..Inner::default() }) }
    }

    /// Insert a sandbox directly, bypassing CAS. Emits `Added`.
    pub fn put_sandbox(&self, mut sandbox: Sandbox) -> Sandbox {
        let mut inner = self.inner.lock();
        sandbox.resource_version = inner.next_version();
        if sandbox.creation_timestamp.is_none() {
            sandbox.creation_timestamp = Utc.timestamp_opt(CREATION_EPOCH_SECS, 0).single();
        }
        inner.sandboxes.insert(sandbox.id(), sandbox.clone());
        inner.notify_sandbox(WatchEvent::Added(sandbox.clone()));
        sandbox
    }

    /// Mutate a sandbox in place as an external writer would (new
    /// resource version, `Modified` event). Returns the stored object.
    pub fn set_sandbox(
        &self,
        id: &SandboxId,
        mutate: impl FnOnce(&mut Sandbox),
    ) -> Option<Sandbox> {
        let mut inner = self.inner.lock();
        let mut sandbox = inner.sandboxes.get(id)?.clone();
        mutate(&mut sandbox);
        sandbox.resource_version = inner.next_version();
        inner.sandboxes.insert(id.clone(), sandbox.clone());
        inner.notify_sandbox(WatchEvent::Modified(sandbox.clone()));
        inner.gc_sandbox(id);
        Some(sandbox)
    }

    pub fn put_template(&self, template: PoolTemplate) {
        let key = (template.namespace.clone(), template.name.clone());
        self.inner.lock().templates.insert(key, template);
    }

    /// Insert a workload directly. Emits `Added`.
    pub fn put_workload(&self, id: &SandboxId, workload: Workload) {
        let mut inner = self.inner.lock();
        inner.workloads.insert(id.clone(), workload.clone());
        inner.notify_workload(WatchEvent::Added((id.clone(), workload)));
    }

    /// Mutate a workload as the substrate would (phase/condition
    /// reports). Emits `Modified`. Returns false when absent.
    pub fn set_workload(&self, id: &SandboxId, mutate: impl FnOnce(&mut Workload)) -> bool {
        let mut inner = self.inner.lock();
        let Some(workload) = inner.workloads.get_mut(id) else {
            return false;
        };
        mutate(workload);
        let updated = workload.clone();
        inner.notify_workload(WatchEvent::Modified((id.clone(), updated)));
        true
    }

    /// Remove a workload as the substrate would after deletion.
    pub fn remove_workload(&self, id: &SandboxId) -> bool {
        let mut inner = self.inner.lock();
        match inner.workloads.remove(id) {
            Some(gone) => {
                inner.notify_workload(WatchEvent::Deleted((id.clone(), gone)));
                true
            }
            None => false,
        }
    }

    /// Force the next `n` sandbox updates to fail with a conflict.
    pub fn inject_update_conflicts(&self, n: u32) {
        self.inner.lock().forced_update_conflicts = n;
    }

    /// Snapshot a stored sandbox without going through the async API.
    pub fn sandbox(&self, id: &SandboxId) -> Option<Sandbox> {
        self.inner.lock().sandboxes.get(id).cloned()
    }

    /// Snapshot a stored workload.
    pub fn workload(&self, id: &SandboxId) -> Option<Workload> {
        self.inner.lock().workloads.get(id).cloned()
    }

    pub fn sandbox_count(&self) -> usize {
        self.inner.lock().sandboxes.len()
    }
}

impl Default for FakeOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn get_sandbox(&self, id: &SandboxId) -> Result<Sandbox, OrchestratorError> {
        self.inner
            .lock()
            .sandboxes
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    async fn list_sandboxes(&self, namespace: &str) -> Result<Vec<Sandbox>, OrchestratorError> {
        let inner = self.inner.lock();
        Ok(inner
            .sandboxes
            .values()
            .filter(|s| s.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn create_sandbox(&self, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError> {
        let mut inner = self.inner.lock();
        let id = sandbox.id();
        if inner.sandboxes.contains_key(&id) {
            return Err(OrchestratorError::AlreadyExists(id.to_string()));
        }
        let mut stored = sandbox.clone();
        if stored.uid.is_empty() {
            stored.uid = nanoid::nanoid!(12);
        }
        stored.resource_version = inner.next_version();
        stored.generation = 1;
        if stored.creation_timestamp.is_none() {
            stored.creation_timestamp = Utc.timestamp_opt(CREATION_EPOCH_SECS, 0).single();
        }
        // Defaulting webhook behaviour: every sandbox carries the finalizer.
        if !stored.has_finalizer() {
            stored.finalizers.push(sp_core::annotations::FINALIZER.to_string());
        }
        inner.sandboxes.insert(id, stored.clone());
        inner.notify_sandbox(WatchEvent::Added(stored.clone()));
        Ok(stored)
    }

    async fn update_sandbox(&self, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError> {
        let mut inner = self.inner.lock();
        if inner.forced_update_conflicts > 0 {
            inner.forced_update_conflicts -= 1;
            return Err(OrchestratorError::Conflict("injected conflict".to_string()));
        }
        let id = sandbox.id();
        let stored = inner
            .sandboxes
            .get(&id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        if stored.resource_version != sandbox.resource_version {
            return Err(OrchestratorError::Conflict(format!(
                "{id}: version {} does not match {}",
                sandbox.resource_version, stored.resource_version
            )));
        }
        let mut updated = sandbox.clone();
        // Spec/metadata endpoint: status and store-owned fields are kept.
        updated.status = stored.status.clone();
        updated.uid = stored.uid.clone();
        updated.creation_timestamp = stored.creation_timestamp;
        updated.deletion_timestamp = stored.deletion_timestamp;
        updated.generation =
            if updated.spec != stored.spec { stored.generation + 1 } else { stored.generation };
        updated.resource_version = inner.next_version();
        inner.sandboxes.insert(id.clone(), updated.clone());
        inner.notify_sandbox(WatchEvent::Modified(updated.clone()));
        inner.gc_sandbox(&id);
        Ok(updated)
    }

    async fn update_sandbox_status(&self, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError> {
        let mut inner = self.inner.lock();
        let id = sandbox.id();
        let stored = inner
            .sandboxes
            .get(&id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        if stored.resource_version != sandbox.resource_version {
            return Err(OrchestratorError::Conflict(format!(
                "{id}: version {} does not match {}",
                sandbox.resource_version, stored.resource_version
            )));
        }
        let mut updated = stored;
        updated.status = sandbox.status.clone();
        updated.resource_version = inner.next_version();
        inner.sandboxes.insert(id.clone(), updated.clone());
        inner.notify_sandbox(WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    async fn delete_sandbox(&self, id: &SandboxId) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock();
        let Some(stored) = inner.sandboxes.get(id).cloned() else {
            return Err(OrchestratorError::NotFound(id.to_string()));
        };
        if stored.finalizers.is_empty() {
            if let Some(gone) = inner.sandboxes.remove(id) {
                inner.notify_sandbox(WatchEvent::Deleted(gone));
            }
            return Ok(());
        }
        if stored.deletion_timestamp.is_none() {
            let mut deleting = stored;
            deleting.deletion_timestamp = Some(Utc::now());
            deleting.resource_version = inner.next_version();
            inner.sandboxes.insert(id.clone(), deleting.clone());
            inner.notify_sandbox(WatchEvent::Modified(deleting));
        }
        Ok(())
    }

    async fn watch_sandboxes(&self) -> mpsc::UnboundedReceiver<WatchEvent<Sandbox>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        for sandbox in inner.sandboxes.values() {
            let _ = tx.send(WatchEvent::Added(sandbox.clone()));
        }
        inner.sandbox_watchers.push(tx);
        rx
    }

    async fn get_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PoolTemplate, OrchestratorError> {
        self.inner
            .lock()
            .templates
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("{namespace}/{name}")))
    }

    async fn get_workload(&self, id: &SandboxId) -> Result<Option<Workload>, OrchestratorError> {
        Ok(self.inner.lock().workloads.get(id).cloned())
    }

    async fn create_workload(
        &self,
        id: &SandboxId,
        workload: &Workload,
    ) -> Result<Workload, OrchestratorError> {
        let mut inner = self.inner.lock();
        if inner.workloads.contains_key(id) {
            return Err(OrchestratorError::AlreadyExists(id.to_string()));
        }
        let mut stored = workload.clone();
        if stored.uid.is_empty() {
            stored.uid = nanoid::nanoid!(12);
        }
        inner.workloads.insert(id.clone(), stored.clone());
        inner.notify_workload(WatchEvent::Added((id.clone(), stored.clone())));
        Ok(stored)
    }

    async fn update_workload(
        &self,
        id: &SandboxId,
        workload: &Workload,
    ) -> Result<Workload, OrchestratorError> {
        let mut inner = self.inner.lock();
        if !inner.workloads.contains_key(id) {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }
        inner.workloads.insert(id.clone(), workload.clone());
        inner.notify_workload(WatchEvent::Modified((id.clone(), workload.clone())));
        Ok(workload.clone())
    }

    async fn delete_workload(
        &self,
        id: &SandboxId,
        _grace_period: Option<Duration>,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock();
        match inner.workloads.remove(id) {
            Some(gone) => {
                inner.notify_workload(WatchEvent::Deleted((id.clone(), gone)));
                Ok(())
            }
            None => Err(OrchestratorError::NotFound(id.to_string())),
        }
    }

    async fn watch_workloads(&self) -> mpsc::UnboundedReceiver<WatchEvent<(SandboxId, Workload)>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        for (id, workload) in &inner.workloads {
            let _ = tx.send(WatchEvent::Added((id.clone(), workload.clone())));
        }
        inner.workload_watchers.push(tx);
        rx
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
