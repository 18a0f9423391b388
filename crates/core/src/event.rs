// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle events fanned out to in-process subscribers.

use serde::{Deserialize, Serialize};

use crate::id::SandboxId;

/// Which component emitted the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventSource {
    ClaimEngine,
    LifecycleController,
    Sweeper,
    Operator,
}

/// Events that announce sandbox lifecycle transitions.
///
/// Delivery is at-least-once within the process; there is no
/// cross-process fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SandboxEvent {
    #[serde(rename = "sandbox:created")]
    Created { id: SandboxId, source: EventSource, message: String },

    #[serde(rename = "sandbox:paused")]
    Paused { id: SandboxId, source: EventSource, message: String },

    #[serde(rename = "sandbox:resumed")]
    Resumed { id: SandboxId, source: EventSource, message: String },

    #[serde(rename = "sandbox:kill")]
    Kill { id: SandboxId, source: EventSource, message: String },
}

impl SandboxEvent {
    pub fn id(&self) -> &SandboxId {
        match self {
            SandboxEvent::Created { id, .. }
            | SandboxEvent::Paused { id, .. }
            | SandboxEvent::Resumed { id, .. }
            | SandboxEvent::Kill { id, .. } => id,
        }
    }
}
