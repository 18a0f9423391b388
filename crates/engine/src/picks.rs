// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide set of sandbox keys currently being claimed.
//!
//! First-level mutual exclusion above the store's optimistic lock: it
//! eliminates most losers before they issue a write, preventing
//! version-conflict thrash on a narrow pool. Advisory only —
//! correctness still comes from the store's CAS.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use sp_core::SandboxId;

#[derive(Default)]
pub struct PickRegistry {
    keys: Mutex<HashSet<SandboxId>>,
}

impl PickRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the key if absent. The returned guard releases it on drop.
    pub fn try_claim(self: &Arc<Self>, id: &SandboxId) -> Option<PickGuard> {
        if self.keys.lock().insert(id.clone()) {
            Some(PickGuard { registry: Arc::clone(self), id: id.clone() })
        } else {
            None
        }
    }

    pub fn is_picked(&self, id: &SandboxId) -> bool {
        self.keys.lock().contains(id)
    }

    fn release(&self, id: &SandboxId) {
        self.keys.lock().remove(id);
    }
}

/// Holds a pick-registry slot; dropping it releases the key.
pub struct PickGuard {
    registry: Arc<PickRegistry>,
    id: SandboxId,
}

impl Drop for PickGuard {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}
