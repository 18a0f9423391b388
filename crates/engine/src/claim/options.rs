// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claim request options.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sp_core::Sandbox;

use super::ClaimError;

/// Replace the candidate's primary container image before locking; the
/// engine then waits for the sandbox to report Ready again.
#[derive(Debug, Clone)]
pub struct InplaceUpdate {
    pub image: String,
}

/// POST `/init` to the sandbox runtime after the lock is won.
#[derive(Debug, Clone, Default)]
pub struct InitRuntime {
    pub env_vars: HashMap<String, String>,
    pub access_token: Option<String>,
}

/// Run the in-sandbox mount command after init. Requires
/// [`InitRuntime`].
#[derive(Debug, Clone)]
pub struct CsiMount {
    pub driver: String,
    pub request: String,
}

/// Callback applied to the candidate before the lock write.
pub type Modifier = Arc<dyn Fn(&mut Sandbox) -> Result<(), String> + Send + Sync>;

/// Options for one claim request.
#[derive(Clone)]
pub struct ClaimOptions {
    /// Becomes the owner annotation; routing enforces it afterwards.
    pub user: String,
    /// Pool to draw from.
    pub template: String,
    pub namespace: String,
    /// Max fresh candidates to consider per attempt.
    pub candidate_count: usize,
    /// Opaque token for the lock annotation; random when unset.
    pub lock_token: Option<String>,
    pub modifier: Option<Modifier>,
    pub inplace_update: Option<InplaceUpdate>,
    pub init_runtime: Option<InitRuntime>,
    pub csi_mount: Option<CsiMount>,
    /// Leave a failed-mid-pipeline sandbox intact for inspection
    /// instead of deleting it.
    pub reserve_failed_sandbox: bool,
    /// Synthesise a fresh sandbox from the template when the pool is
    /// empty.
    pub create_on_no_stock: bool,
    /// Sandboxes Creating for at least this long may be selected
    /// speculatively.
    pub speculate_creating_duration: Option<Duration>,
    pub claim_timeout: Duration,
    pub wait_ready_timeout: Duration,
}

impl ClaimOptions {
    pub fn new(user: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            template: template.into(),
            namespace: "default".to_string(),
            candidate_count: 8,
            lock_token: None,
            modifier: None,
            inplace_update: None,
            init_runtime: None,
            csi_mount: None,
            reserve_failed_sandbox: false,
            create_on_no_stock: false,
            speculate_creating_duration: None,
            claim_timeout: Duration::from_secs(30),
            wait_ready_timeout: Duration::from_secs(60),
        }
    }

    pub fn validate(&self) -> Result<(), ClaimError> {
        if self.user.is_empty() {
            return Err(ClaimError::InvalidOptions("user is required".to_string()));
        }
        if self.template.is_empty() {
            return Err(ClaimError::InvalidOptions("template is required".to_string()));
        }
        if self.candidate_count == 0 {
            return Err(ClaimError::InvalidOptions("candidate_count must be at least 1".to_string()));
        }
        if self.csi_mount.is_some() && self.init_runtime.is_none() {
            return Err(ClaimError::InvalidOptions(
                "csi_mount requires init_runtime".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClaimOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimOptions")
            .field("user", &self.user)
            .field("template", &self.template)
            .field("namespace", &self.namespace)
            .field("candidate_count", &self.candidate_count)
            .field("has_modifier", &self.modifier.is_some())
            .field("inplace_update", &self.inplace_update)
            .field("init_runtime", &self.init_runtime.is_some())
            .field("csi_mount", &self.csi_mount)
            .field("reserve_failed_sandbox", &self.reserve_failed_sandbox)
            .field("create_on_no_stock", &self.create_on_no_stock)
            .field("speculate_creating_duration", &self.speculate_creating_duration)
            .field("claim_timeout", &self.claim_timeout)
            .field("wait_ready_timeout", &self.wait_ready_timeout)
            .finish()
    }
}
