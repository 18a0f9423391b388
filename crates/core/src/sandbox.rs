// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The sandbox object: one managed execution environment.
//!
//! Shaped like a namespaced store resource — metadata, spec (intent),
//! status (observation). Mutations go through the orchestrator's
//! resource-version CAS; the only authoritative lock is the lock
//! annotation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotations;
use crate::condition::{self, Condition, ConditionType};
use crate::id::SandboxId;

/// Sandbox lifecycle phase, driven by the lifecycle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SandboxPhase {
    #[default]
    Pending,
    Running,
    Paused,
    Resuming,
    Terminating,
    Succeeded,
    Failed,
}

impl SandboxPhase {
    /// Terminal phases never leave; the reconciler becomes a no-op.
    pub fn is_terminal(self) -> bool {
        matches!(self, SandboxPhase::Succeeded | SandboxPhase::Failed)
    }
}

/// Reference from a pooled sandbox to its owning template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

/// Workload placement details copied onto the sandbox at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Desired state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSpec {
    /// Pool template this sandbox was drawn from.
    #[serde(default)]
    pub template: String,
    /// Primary container image.
    #[serde(default)]
    pub image: String,
    /// Desired paused bit.
    #[serde(default)]
    pub paused: bool,
    /// Future instant at which the sandbox is shut down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_time: Option<DateTime<Utc>>,
    /// Future instant at which the sandbox is paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_time: Option<DateTime<Utc>>,
}

/// Observed state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxStatus {
    #[serde(default)]
    pub phase: SandboxPhase,
    /// Generation the status reflects; status is fresh iff equal to
    /// the object's generation.
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_info: Option<PodInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// The central entity: one managed execution environment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub resource_version: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub spec: SandboxSpec,
    #[serde(default)]
    pub status: SandboxStatus,
}

impl Sandbox {
    pub fn id(&self) -> SandboxId {
        SandboxId::from_parts(&self.namespace, &self.name)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.annotations.insert(key.to_string(), value.into());
    }

    /// Current lock token; empty string means unlocked.
    pub fn lock(&self) -> &str {
        self.annotation(annotations::LOCK).unwrap_or("")
    }

    /// Claiming user; empty until claimed.
    pub fn owner(&self) -> &str {
        self.annotation(annotations::OWNER).unwrap_or("")
    }

    pub fn is_claimed(&self) -> bool {
        self.annotation(annotations::IS_CLAIMED) == Some(annotations::TRUE)
    }

    /// Workload address from placement info; empty until placed.
    pub fn address(&self) -> &str {
        self.status.pod_info.as_ref().map(|p| p.address.as_str()).unwrap_or("")
    }

    /// True when the template controller still owns this sandbox.
    /// Cleared at claim time so the pool scales a replacement.
    pub fn is_pool_owned(&self) -> bool {
        self.owner_references.iter().any(|r| r.controller)
    }

    /// Status freshness: the status reflects the latest generation.
    pub fn is_fresh(&self) -> bool {
        self.status.observed_generation == self.generation
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn condition(&self, r#type: ConditionType) -> Option<&Condition> {
        condition::find(&self.status.conditions, r#type)
    }

    pub fn condition_is_true(&self, r#type: ConditionType) -> bool {
        self.condition(r#type).map(|c| c.status.is_true()).unwrap_or(false)
    }

    pub fn runtime_url(&self) -> Option<&str> {
        self.annotation(annotations::RUNTIME_URL)
    }

    pub fn runtime_access_token(&self) -> Option<&str> {
        self.annotation(annotations::RUNTIME_ACCESS_TOKEN)
    }

    pub fn pod_creation_disabled(&self) -> bool {
        self.annotation(annotations::DISABLE_POD_CREATION) == Some(annotations::TRUE)
    }

    pub fn pod_deletion_disabled(&self) -> bool {
        self.annotation(annotations::DISABLE_POD_DELETION) == Some(annotations::TRUE)
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers.iter().any(|f| f == annotations::FINALIZER)
    }

    pub fn remove_finalizer(&mut self) {
        self.finalizers.retain(|f| f != annotations::FINALIZER);
    }
}

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod tests;
