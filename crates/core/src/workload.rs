// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Projection of the underlying workload object.
//!
//! The orchestrator owns scheduling; the controller only reads this view
//! and writes annotations on it. Keyed 1:1 by sandbox id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotations;

/// Workload phase as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkloadPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkloadPhase::Succeeded | WorkloadPhase::Failed)
    }
}

/// Workload condition types the controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadConditionType {
    Ready,
    ContainersPaused,
}

/// One observed condition on a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadCondition {
    pub r#type: WorkloadConditionType,
    pub status: crate::condition::ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// The substrate workload backing a sandbox.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub phase: WorkloadPhase,
    /// Routable address; empty until placed.
    #[serde(default)]
    pub address: String,
    /// Primary container image.
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<WorkloadCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl Workload {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.annotations.insert(key.to_string(), value.into());
    }

    pub fn condition(&self, r#type: WorkloadConditionType) -> Option<&WorkloadCondition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    pub fn condition_is_true(&self, r#type: WorkloadConditionType) -> bool {
        self.condition(r#type)
            .map(|c| c.status == crate::condition::ConditionStatus::True)
            .unwrap_or(false)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn pause_requested(&self) -> bool {
        self.annotation(annotations::SANDBOX_PAUSE) == Some(annotations::TRUE)
    }

    pub fn recreation_requested(&self) -> bool {
        self.annotation(annotations::RECREATING) == Some(annotations::TRUE)
    }
}
