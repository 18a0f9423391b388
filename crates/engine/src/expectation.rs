// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-object freshness gate over the eventually-consistent cache.
//!
//! After a successful write the writer's next cache read may still see
//! the old version. A writer records the version it expects to observe;
//! readers treat the cached object as stale until that version arrives
//! or the expectation ages out (a lost event must not deadlock claims).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use sp_core::{version, Clock, Sandbox, SandboxId};

/// Failsafe: an expectation older than this is treated as satisfied.
pub const DEFAULT_EXPECTATION_TIMEOUT: Duration = Duration::from_secs(3);

struct Expectation {
    uid: String,
    version: String,
    since: Instant,
}

/// Tracks the minimum resource version a cache read must meet, per
/// object.
pub struct ExpectationTracker<C: Clock> {
    clock: C,
    timeout: Duration,
    inner: Mutex<HashMap<SandboxId, Expectation>>,
}

impl<C: Clock> ExpectationTracker<C> {
    pub fn new(clock: C) -> Self {
        Self::with_timeout(clock, DEFAULT_EXPECTATION_TIMEOUT)
    }

    pub fn with_timeout(clock: C, timeout: Duration) -> Self {
        Self { clock, timeout, inner: Mutex::new(HashMap::new()) }
    }

    /// Record the written object's version as the minimum acceptable.
    pub fn expect(&self, sandbox: &Sandbox) {
        self.inner.lock().insert(
            sandbox.id(),
            Expectation {
                uid: sandbox.uid.clone(),
                version: sandbox.resource_version.clone(),
                since: self.clock.now(),
            },
        );
    }

    /// Feed every cache event through here; the expectation clears once
    /// the cache has caught up.
    pub fn observe(&self, sandbox: &Sandbox) {
        let id = sandbox.id();
        let mut inner = self.inner.lock();
        let clear = match inner.get(&id) {
            Some(e) => {
                e.uid != sandbox.uid || version::at_least(&sandbox.resource_version, &e.version)
            }
            None => false,
        };
        if clear {
            inner.remove(&id);
        }
    }

    /// True when no expectation exists, the cache has caught up, or the
    /// expectation has aged out.
    pub fn satisfied(&self, sandbox: &Sandbox) -> bool {
        let id = sandbox.id();
        let mut inner = self.inner.lock();
        let Some(e) = inner.get(&id) else {
            return true;
        };
        if e.uid != sandbox.uid || version::at_least(&sandbox.resource_version, &e.version) {
            inner.remove(&id);
            return true;
        }
        if self.clock.now().duration_since(e.since) >= self.timeout {
            warn!(sandbox = %id, expected = %e.version, "expectation timed out, treating cache as authoritative");
            inner.remove(&id);
            return true;
        }
        false
    }

    pub fn remove(&self, id: &SandboxId) {
        self.inner.lock().remove(id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
#[path = "expectation_tests.rs"]
mod tests;
