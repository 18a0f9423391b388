// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cluster substrate, reduced to the operations this process needs.
//!
//! Sandboxes are namespaced store objects guarded by resource-version
//! CAS; workloads are the scheduled containers backing them, keyed 1:1
//! by sandbox id. Watch streams open with a synthetic `Added` for every
//! object that already exists, then deliver live events in the store's
//! order.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sp_core::{PoolTemplate, Sandbox, SandboxId, Workload};

use crate::error::OrchestratorError;

/// One change observed on a watched object.
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }

    pub fn into_object(self) -> T {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// The external cluster substrate.
///
/// Every mutation is CAS-guarded by the object's resource version;
/// losing the race yields [`OrchestratorError::Conflict`]. Updates to
/// spec and metadata go through `update_sandbox`; `update_sandbox_status`
/// writes the status subresource only.
#[async_trait]
pub trait Orchestrator: Send + Sync + 'static {
    async fn get_sandbox(&self, id: &SandboxId) -> Result<Sandbox, OrchestratorError>;

    async fn list_sandboxes(&self, namespace: &str) -> Result<Vec<Sandbox>, OrchestratorError>;

    async fn create_sandbox(&self, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError>;

    async fn update_sandbox(&self, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError>;

    async fn update_sandbox_status(&self, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError>;

    /// Request deletion. With a finalizer present this only stamps the
    /// deletion timestamp; the object is reclaimed once the finalizer
    /// is removed.
    async fn delete_sandbox(&self, id: &SandboxId) -> Result<(), OrchestratorError>;

    async fn watch_sandboxes(&self) -> mpsc::UnboundedReceiver<WatchEvent<Sandbox>>;

    async fn get_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PoolTemplate, OrchestratorError>;

    async fn get_workload(&self, id: &SandboxId) -> Result<Option<Workload>, OrchestratorError>;

    async fn create_workload(
        &self,
        id: &SandboxId,
        workload: &Workload,
    ) -> Result<Workload, OrchestratorError>;

    /// Update workload metadata (annotation handshakes). Conditions may
    /// also be written where the backend supports it.
    async fn update_workload(
        &self,
        id: &SandboxId,
        workload: &Workload,
    ) -> Result<Workload, OrchestratorError>;

    async fn delete_workload(
        &self,
        id: &SandboxId,
        grace_period: Option<Duration>,
    ) -> Result<(), OrchestratorError>;

    async fn watch_workloads(&self) -> mpsc::UnboundedReceiver<WatchEvent<(SandboxId, Workload)>>;
}
