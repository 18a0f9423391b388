// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data-plane projections: routes and peers.

use serde::{Deserialize, Serialize};

use crate::id::SandboxId;
use crate::sandbox::Sandbox;
use crate::state::{effective_state, EffectiveState};

/// Projection of a sandbox suitable for forwarding user requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: SandboxId,
    pub address: String,
    #[serde(default)]
    pub owner: String,
    pub state: EffectiveState,
}

impl Route {
    /// Derive the route for a sandbox directly from the object.
    pub fn from_sandbox(sandbox: &Sandbox) -> Self {
        Self {
            id: sandbox.id(),
            address: sandbox.address().to_string(),
            owner: sandbox.owner().to_string(),
            state: effective_state(sandbox),
        }
    }
}

/// Another instance of this system participating in route replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub address: String,
    /// Epoch millis of the last heartbeat received from this peer.
    pub last_heartbeat: u64,
}

#[cfg(test)]
#[path = "route_tests.rs"]
mod tests;
