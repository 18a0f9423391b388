// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox status conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recognised sandbox condition types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    Paused,
    Resumed,
}

/// Three-valued condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn is_true(self) -> bool {
        self == ConditionStatus::True
    }
}

/// One observed condition on a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(r#type: ConditionType, status: ConditionStatus) -> Self {
        Self { r#type, status, reason: String::new(), message: String::new(), last_transition_time: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Well-known condition reasons.
pub mod reasons {
    /// Pause progress: asking the workload to pause its containers.
    pub const SET_PAUSE: &str = "SetPause";
    /// Pause progress: deleting the paused workload.
    pub const DELETE_POD: &str = "DeletePod";
    /// Resume progress: recreating the workload.
    pub const CREATE_POD: &str = "CreatePod";
    /// Resume progress: unpausing the recreated workload.
    pub const RESUME_POD: &str = "ResumePod";
    /// Unrecoverable workload start failure; fail-fast in wait-ready.
    pub const START_CONTAINER_FAILED: &str = "StartContainerFailed";
}

/// Find a condition by type.
pub fn find(conditions: &[Condition], r#type: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Upsert `cond` into `conditions`.
///
/// `last_transition_time` is stamped with `now` only when the status
/// actually changes; reason/message updates alone keep the old instant.
pub fn set(conditions: &mut Vec<Condition>, mut cond: Condition, now: DateTime<Utc>) {
    match conditions.iter_mut().find(|c| c.r#type == cond.r#type) {
        Some(existing) => {
            if existing.status != cond.status {
                cond.last_transition_time = Some(now);
            } else {
                cond.last_transition_time = existing.last_transition_time;
            }
            *existing = cond;
        }
        None => {
            cond.last_transition_time = Some(now);
            conditions.push(cond);
        }
    }
}

/// Remove a condition by type; returns true if one was present.
pub fn remove(conditions: &mut Vec<Condition>, r#type: ConditionType) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.r#type != r#type);
    conditions.len() != before
}

#[cfg(test)]
#[path = "condition_tests.rs"]
mod tests;
