// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Effective sandbox state, derived deterministically from the object.
//!
//! The derivation uses only fields already present on the sandbox — no
//! hidden state. Every reachable (phase, spec.paused, conditions) tuple
//! maps to exactly one effective state.

use serde::{Deserialize, Serialize};

use crate::condition::ConditionType;
use crate::sandbox::{Sandbox, SandboxPhase};

/// The derived, routing-grade view of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveState {
    /// Not yet usable: pending placement, or placed but not Ready.
    Creating,
    /// Pool-owned, Ready, addressable — eligible to be claimed.
    Available,
    /// Claimed and Ready.
    Running,
    /// Paused or mid-resume; not routable.
    Paused,
    /// Terminating, terminal, or marked for deletion.
    Dead,
}

/// Derive the effective state of a sandbox. Pure.
pub fn effective_state(sandbox: &Sandbox) -> EffectiveState {
    if sandbox.is_deleting() {
        return EffectiveState::Dead;
    }
    match sandbox.status.phase {
        SandboxPhase::Terminating | SandboxPhase::Succeeded | SandboxPhase::Failed => {
            EffectiveState::Dead
        }
        SandboxPhase::Paused | SandboxPhase::Resuming => EffectiveState::Paused,
        SandboxPhase::Pending => EffectiveState::Creating,
        SandboxPhase::Running => {
            let ready = sandbox.is_fresh()
                && sandbox.condition_is_true(ConditionType::Ready)
                && !sandbox.address().is_empty();
            if !ready {
                EffectiveState::Creating
            } else if sandbox.is_claimed() {
                EffectiveState::Running
            } else if sandbox.is_pool_owned() {
                EffectiveState::Available
            } else {
                EffectiveState::Running
            }
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
