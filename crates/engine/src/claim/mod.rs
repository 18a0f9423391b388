// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The claim engine: acquire an available sandbox from a pool under
//! concurrent demand.
//!
//! One attempt runs admission → candidate selection → modify → CAS lock
//! write → wait-ready → runtime init → CSI mount. The outer loop
//! retries retriable failures with capped backoff until
//! `claim_timeout`. The admission ticket is released as soon as the
//! lock write succeeds so later stages run outside the critical
//! section; a failure after the lock always triggers cleanup on an
//! independent, time-bounded task.

mod limiter;
mod metrics;
mod options;

pub use metrics::{ClaimMetrics, LockType};
pub use options::{ClaimOptions, CsiMount, InitRuntime, InplaceUpdate, Modifier};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sp_adapters::{
    InitRequest, Orchestrator, OrchestratorError, ProcessClient, RuntimeClient, RuntimeError,
};
use sp_core::{
    annotations, condition::reasons, effective_state, generate_lock_token, generate_name_suffix,
    Clock, ConditionType, EffectiveState, EventSource, PoolTemplate, Sandbox, SandboxEvent,
    SandboxId,
};

use crate::backoff::Backoff;
use crate::bus::EventBus;
use crate::cache::{ObjectCache, WaitAction, WaitError, WaitPredicate};
use crate::expectation::ExpectationTracker;
use crate::picks::{PickGuard, PickRegistry};

use limiter::CreateLimiter;

/// In-sandbox mount helper invoked for CSI mounts.
const MOUNT_COMMAND: &str = "/mnt/envd/sandbox-runtime-storage";

#[derive(Debug, Clone, Error)]
pub enum ClaimError {
    /// Lost the store's CAS; another claimant won.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no available sandbox in pool {0}")]
    NoAvailable(String),

    /// Transient failure worth another attempt.
    #[error("retriable: {0}")]
    Retriable(String),

    #[error("{0}")]
    Unrecoverable(String),

    #[error("claim timed out: {0}")]
    Timeout(String),

    #[error("claim cancelled")]
    Cancelled,

    #[error("invalid claim options: {0}")]
    InvalidOptions(String),
}

impl ClaimError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ClaimError::Conflict(_) | ClaimError::NoAvailable(_) | ClaimError::Retriable(_)
        )
    }
}

/// Tuning knobs for the engine; defaults match production.
#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Bounded claim-worker admission.
    pub workers: usize,
    /// Token-bucket rate for create-on-no-stock, per second.
    pub create_rate: f64,
    pub create_burst: f64,
    /// Outer retry backoff base.
    pub retry_base: Duration,
    pub retry_jitter: f64,
    /// Bound for the post-failure cleanup delete.
    pub cleanup_timeout: Duration,
    /// Bound for one in-sandbox mount command.
    pub mount_timeout: Duration,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            workers: 64,
            create_rate: 2.0,
            create_burst: 5.0,
            retry_base: Duration::from_millis(25),
            retry_jitter: 0.2,
            cleanup_timeout: Duration::from_secs(30),
            mount_timeout: Duration::from_secs(60),
        }
    }
}

/// Engine dependencies, passed explicitly to support testing and
/// deterministic teardown.
pub struct ClaimDeps<O, C: Clock> {
    pub orchestrator: Arc<O>,
    pub cache: Arc<ObjectCache<O, C>>,
    pub expectations: Arc<ExpectationTracker<C>>,
    pub picks: Arc<PickRegistry>,
    pub bus: EventBus,
    pub runtime: RuntimeClient,
    pub clock: C,
}

pub struct ClaimEngine<O, C: Clock> {
    orchestrator: Arc<O>,
    cache: Arc<ObjectCache<O, C>>,
    expectations: Arc<ExpectationTracker<C>>,
    picks: Arc<PickRegistry>,
    bus: EventBus,
    runtime: RuntimeClient,
    clock: C,
    admission: Arc<Semaphore>,
    limiter: CreateLimiter<C>,
    config: ClaimConfig,
}

struct Picked {
    sandbox: Sandbox,
    lock_type: LockType,
    _guard: Option<PickGuard>,
}

impl<O: Orchestrator, C: Clock> ClaimEngine<O, C> {
    pub fn new(deps: ClaimDeps<O, C>, config: ClaimConfig) -> Self {
        let limiter =
            CreateLimiter::new(deps.clock.clone(), config.create_rate, config.create_burst);
        Self {
            orchestrator: deps.orchestrator,
            cache: deps.cache,
            expectations: deps.expectations,
            picks: deps.picks,
            bus: deps.bus,
            runtime: deps.runtime,
            clock: deps.clock,
            admission: Arc::new(Semaphore::new(config.workers)),
            limiter,
            config,
        }
    }

    /// Claim one sandbox for `options.user` from `options.template`.
    ///
    /// Returns the outcome together with the stage metrics of the whole
    /// request, including failed attempts.
    pub async fn claim(
        &self,
        options: ClaimOptions,
        cancel: CancellationToken,
    ) -> (Result<Sandbox, ClaimError>, ClaimMetrics) {
        let mut metrics = ClaimMetrics::default();
        let started = self.clock.now();

        if let Err(e) = options.validate() {
            metrics.last_error = e.to_string();
            return (Err(e), metrics);
        }

        let deadline = started + options.claim_timeout;
        let mut backoff = Backoff::new(
            self.config.retry_base,
            1.0,
            self.config.retry_jitter,
            options.claim_timeout.max(self.config.retry_base),
        );

        let result = loop {
            match self.attempt(&options, &mut metrics, &cancel).await {
                Ok(sandbox) => break Ok(sandbox),
                Err(e) => {
                    metrics.last_error = e.to_string();
                    if !e.is_retriable() || cancel.is_cancelled() {
                        break Err(e);
                    }
                    let now = self.clock.now();
                    if now >= deadline {
                        break Err(e);
                    }
                    metrics.retries += 1;
                    let pause = backoff.next().min(deadline - now);
                    tokio::select! {
                        _ = cancel.cancelled() => break Err(ClaimError::Cancelled),
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }
        };

        metrics.total = self.clock.now().duration_since(started);
        match &result {
            Ok(sandbox) => info!(
                sandbox = %sandbox.id(),
                owner = %options.user,
                %metrics,
                "claim succeeded"
            ),
            Err(e) => warn!(
                template = %options.template,
                user = %options.user,
                error = %e,
                %metrics,
                "claim failed"
            ),
        }
        (result, metrics)
    }

    /// One pass through the pipeline.
    async fn attempt(
        &self,
        options: &ClaimOptions,
        metrics: &mut ClaimMetrics,
        cancel: &CancellationToken,
    ) -> Result<Sandbox, ClaimError> {
        // 1. Admission: bounded claim workers.
        let wait_started = self.clock.now();
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(ClaimError::Cancelled),
            permit = Arc::clone(&self.admission).acquire_owned() => {
                permit.map_err(|_| ClaimError::Retriable("claim admission closed".to_string()))?
            }
        };
        metrics.wait += self.clock.now().duration_since(wait_started);

        // 2. Candidate selection under the pick registry.
        let lock_started = self.clock.now();
        let picked = self.select_candidate(options).await?;
        let lock_type = picked.lock_type;
        let mut candidate = picked.sandbox;

        // 3. Modify the deep copy before the lock write.
        self.prepare_candidate(&mut candidate, options)?;

        // 4. Write-and-lock via the store's CAS.
        let written = match lock_type {
            LockType::Create => self.orchestrator.create_sandbox(&candidate).await,
            LockType::Update | LockType::Speculate => {
                self.orchestrator.update_sandbox(&candidate).await
            }
        }
        .map_err(translate_write_error)?;
        metrics.lock_type = Some(lock_type);
        self.expectations.expect(&written);
        // The lock annotation now guards the object; the advisory gates
        // can go, and later stages run outside the critical section.
        drop(picked._guard);
        drop(permit);
        metrics.pick_and_lock += self.clock.now().duration_since(lock_started);

        match self.post_lock(written.clone(), lock_type, options, metrics, cancel).await {
            Ok(sandbox) => Ok(sandbox),
            Err(e) => {
                self.cleanup_failed(written, options, &e);
                Err(e)
            }
        }
    }

    /// Stages 5–7: wait-ready, runtime init, CSI mount.
    async fn post_lock(
        &self,
        written: Sandbox,
        lock_type: LockType,
        options: &ClaimOptions,
        metrics: &mut ClaimMetrics,
        cancel: &CancellationToken,
    ) -> Result<Sandbox, ClaimError> {
        let id = written.id();
        let mut current = written;

        let needs_wait = matches!(lock_type, LockType::Create | LockType::Speculate)
            || options.inplace_update.is_some();
        if needs_wait {
            let wait_started = self.clock.now();
            current = self
                .cache
                .wait_until(&id, WaitAction::Ready, ready_predicate(), options.wait_ready_timeout)
                .await
                .map_err(|e| translate_wait_error(&id, e, options.inplace_update.is_some()))?;
            metrics.wait_ready += self.clock.now().duration_since(wait_started);
        }

        if let Some(init) = &options.init_runtime {
            let init_started = self.clock.now();
            let url = current
                .runtime_url()
                .ok_or_else(|| {
                    ClaimError::Unrecoverable(format!("sandbox {id} has no runtime url"))
                })?
                .to_string();
            let request = InitRequest {
                env_vars: init.env_vars.clone(),
                access_token: init.access_token.clone(),
            };
            self.runtime.init(&url, &request, cancel).await.map_err(|e| match e {
                RuntimeError::Cancelled => ClaimError::Cancelled,
                RuntimeError::Timeout(m) => ClaimError::Timeout(format!("runtime init: {m}")),
                other => ClaimError::Retriable(format!("runtime init: {other}")),
            })?;
            metrics.init_runtime += self.clock.now().duration_since(init_started);
        }

        if let Some(mount) = &options.csi_mount {
            let mount_started = self.clock.now();
            self.csi_mount(&current, mount, options).await?;
            metrics.csi_mount += self.clock.now().duration_since(mount_started);
        }

        Ok(current)
    }

    async fn csi_mount(
        &self,
        sandbox: &Sandbox,
        mount: &CsiMount,
        options: &ClaimOptions,
    ) -> Result<(), ClaimError> {
        let id = sandbox.id();
        let endpoint = sandbox
            .runtime_url()
            .ok_or_else(|| ClaimError::Unrecoverable(format!("sandbox {id} has no runtime url")))?;
        let token = sandbox.runtime_access_token().unwrap_or_default();
        let pod_uid = sandbox
            .status
            .pod_info
            .as_ref()
            .map(|p| p.uid.clone())
            .unwrap_or_default();

        let config = sp_proto::sandbox::process::v1::ProcessConfig {
            cmd: MOUNT_COMMAND.to_string(),
            args: vec![
                "mount".to_string(),
                "--driver".to_string(),
                mount.driver.clone(),
                "--config".to_string(),
                mount.request.clone(),
            ],
            envs: [("POD_UID".to_string(), pod_uid)].into_iter().collect(),
            cwd: String::new(),
        };

        ProcessClient::run(endpoint, token, &options.user, config, self.config.mount_timeout)
            .await
            .map_err(|e| match e {
                RuntimeError::CommandFailed { .. } => {
                    ClaimError::Unrecoverable(format!("csi mount: {e}"))
                }
                other => ClaimError::Retriable(format!("csi mount: {other}")),
            })?;
        Ok(())
    }

    /// Pick a candidate: available first, then speculating, else
    /// synthesise when allowed.
    async fn select_candidate(&self, options: &ClaimOptions) -> Result<Picked, ClaimError> {
        let pool = self.cache.list_by_pool(&options.namespace, &options.template);
        let now_utc = self.clock.now_utc();

        let mut available = Vec::new();
        let mut speculating = Vec::new();
        for sandbox in pool {
            if !self.expectations.satisfied(&sandbox) || !pre_check(&sandbox) {
                continue;
            }
            match effective_state(&sandbox) {
                EffectiveState::Available => available.push(sandbox),
                EffectiveState::Creating => {
                    let Some(min_age) = options.speculate_creating_duration else {
                        continue;
                    };
                    if min_age.is_zero() {
                        continue;
                    }
                    let age = sandbox
                        .creation_timestamp
                        .map(|t| (now_utc - t).to_std().unwrap_or_default())
                        .unwrap_or_default();
                    if age >= min_age {
                        speculating.push(sandbox);
                    }
                }
                _ => {}
            }
        }

        if available.is_empty() && speculating.is_empty() {
            if options.create_on_no_stock {
                if !self.limiter.try_take() {
                    return Err(ClaimError::Retriable(format!(
                        "no stock in pool {}/{} and creation is rate limited",
                        options.namespace, options.template
                    )));
                }
                let template = self
                    .orchestrator
                    .get_template(&options.namespace, &options.template)
                    .await
                    .map_err(|e| ClaimError::Retriable(format!("load template: {e}")))?;
                return Ok(Picked {
                    sandbox: synthesize(&template),
                    lock_type: LockType::Create,
                    _guard: None,
                });
            }
            return Err(ClaimError::NoAvailable(format!(
                "{}/{}",
                options.namespace, options.template
            )));
        }

        {
            use rand::seq::SliceRandom;
            let mut rng = rand::thread_rng();
            available.shuffle(&mut rng);
            speculating.shuffle(&mut rng);
        }

        let candidates = available
            .into_iter()
            .map(|s| (s, LockType::Update))
            .chain(speculating.into_iter().map(|s| (s, LockType::Speculate)))
            .take(options.candidate_count);

        for (sandbox, lock_type) in candidates {
            let Some(guard) = self.picks.try_claim(&sandbox.id()) else {
                continue;
            };
            // The registry slot is ours, but the snapshot may have gone
            // stale while we raced for it.
            if !self.expectations.satisfied(&sandbox) {
                continue;
            }
            return Ok(Picked { sandbox, lock_type, _guard: Some(guard) });
        }

        Err(ClaimError::NoAvailable(format!(
            "{}/{}: all candidates contended",
            options.namespace, options.template
        )))
    }

    /// Stage 3: modifier, image update, claim annotations, lock token.
    fn prepare_candidate(
        &self,
        sandbox: &mut Sandbox,
        options: &ClaimOptions,
    ) -> Result<(), ClaimError> {
        if let Some(modifier) = &options.modifier {
            modifier(sandbox)
                .map_err(|e| ClaimError::Unrecoverable(format!("claim modifier: {e}")))?;
        }
        if let Some(update) = &options.inplace_update {
            sandbox.spec.image = update.image.clone();
        }
        sandbox.set_annotation(annotations::IS_CLAIMED, annotations::TRUE);
        sandbox.set_annotation(annotations::OWNER, &options.user);
        sandbox.set_annotation(annotations::CLAIM_TIME, self.clock.now_utc().to_rfc3339());
        let token = options.lock_token.clone().unwrap_or_else(generate_lock_token);
        sandbox.set_annotation(annotations::LOCK, token);
        // The pool treats the object as gone and scales a replacement.
        sandbox.owner_references.clear();
        Ok(())
    }

    /// Delete (or reserve) a sandbox that failed mid-pipeline after the
    /// lock was taken. Runs on an independent, time-bounded task so
    /// caller cancellation cannot leak the resource.
    fn cleanup_failed(&self, sandbox: Sandbox, options: &ClaimOptions, error: &ClaimError) {
        let id = sandbox.id();
        if options.reserve_failed_sandbox {
            warn!(
                sandbox = %id,
                owner = %options.user,
                error = %error,
                "reserving failed sandbox, lock held for inspection"
            );
            return;
        }
        self.bus.publish(SandboxEvent::Kill {
            id: id.clone(),
            source: EventSource::ClaimEngine,
            message: format!("claim failed: {error}"),
        });
        let orchestrator = Arc::clone(&self.orchestrator);
        let timeout = self.config.cleanup_timeout;
        let owner = options.user.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, orchestrator.delete_sandbox(&id)).await {
                Ok(Ok(())) => {
                    info!(sandbox = %id, %owner, "deleted sandbox after failed claim")
                }
                Ok(Err(e)) if e.is_not_found() => {}
                Ok(Err(e)) => {
                    warn!(sandbox = %id, %owner, error = %e, "failed to delete sandbox after failed claim")
                }
                Err(_) => {
                    warn!(sandbox = %id, %owner, "timed out deleting sandbox after failed claim")
                }
            }
        });
    }
}

/// Skip candidates that already carry a lock or predate the store
/// assigning a creation timestamp.
fn pre_check(sandbox: &Sandbox) -> bool {
    sandbox.lock().is_empty() && sandbox.creation_timestamp.is_some()
}

fn translate_write_error(e: OrchestratorError) -> ClaimError {
    match e {
        OrchestratorError::Conflict(m) | OrchestratorError::AlreadyExists(m) => {
            ClaimError::Conflict(m)
        }
        OrchestratorError::Invalid(m) => ClaimError::Unrecoverable(m),
        other => ClaimError::Retriable(other.to_string()),
    }
}

fn translate_wait_error(id: &SandboxId, e: WaitError, inplace: bool) -> ClaimError {
    match e {
        WaitError::Timeout(d) => {
            ClaimError::Timeout(format!("sandbox {id} not ready after {d:?}"))
        }
        WaitError::Predicate(message) if inplace => {
            ClaimError::Unrecoverable(format!("sandbox inplace update failed: {message}"))
        }
        WaitError::Predicate(message) => ClaimError::Unrecoverable(message),
        WaitError::Deleted(_) => {
            ClaimError::Unrecoverable(format!("sandbox {id} deleted while waiting for ready"))
        }
        WaitError::Conflict { .. } | WaitError::Closed => ClaimError::Retriable(e.to_string()),
    }
}

/// Ready means: status fresh, effectively Running, and addressable. A
/// Ready condition reporting a container start failure is terminal for
/// the wait.
fn ready_predicate() -> WaitPredicate {
    Arc::new(|sandbox: &Sandbox| {
        if let Some(ready) = sandbox.condition(ConditionType::Ready) {
            if ready.reason == reasons::START_CONTAINER_FAILED {
                let detail =
                    if ready.message.is_empty() { &ready.reason } else { &ready.message };
                return Err(format!("workload start failed: {detail}"));
            }
        }
        Ok(sandbox.is_fresh()
            && effective_state(sandbox) == EffectiveState::Running
            && !sandbox.address().is_empty())
    })
}

/// Build a fresh sandbox from the pool template (create-on-no-stock).
fn synthesize(template: &PoolTemplate) -> Sandbox {
    let mut sandbox = Sandbox {
        namespace: template.namespace.clone(),
        name: format!("{}-{}", template.name, generate_name_suffix()),
        labels: template.labels.clone(),
        annotations: template.annotations.clone(),
        ..Sandbox::default()
    };
    sandbox.spec.template = template.name.clone();
    sandbox.spec.image = template.image.clone();
    sandbox.set_annotation(annotations::CREATED_BY, "claim-engine");
    sandbox.finalizers.push(annotations::FINALIZER.to_string());
    sandbox
}

#[cfg(test)]
#[path = "claim_tests.rs"]
mod tests;
