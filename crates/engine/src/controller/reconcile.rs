// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Phase handlers for the sandbox state machine.
//!
//! ```text
//! Pending ──workload ready──▶ Running ──spec.paused──▶ Paused
//!    │                          │  ▲                     │
//!    │ workload fails           │  └── ready ── Resuming ◀ spec.paused=false
//!    ▼                          ▼
//! Failed*                  Terminating ◀── deletion requested
//! ```
//!
//! Terminal phases (`Succeeded`, `Failed`) are never left.

use sp_core::{
    annotations, condition, condition::reasons, Condition, ConditionStatus, ConditionType,
    EventSource, PodInfo, Sandbox, SandboxEvent, SandboxPhase, Workload, WorkloadConditionType,
    WorkloadPhase,
};

use sp_adapters::Orchestrator;
use sp_core::Clock;

use super::{Controller, ControllerError};

impl<O: Orchestrator, C: Clock> Controller<O, C> {
    pub(crate) async fn reconcile(&self, id: &sp_core::SandboxId) -> Result<(), ControllerError> {
        let Some(sandbox) = self.cache.get_cached(id) else {
            return Ok(());
        };
        if sandbox.status.phase.is_terminal() {
            return Ok(());
        }
        let workload = self.cache.workload(id);

        // Deletion requested mid-pause/resume is held until the
        // transition completes.
        if sandbox.is_deleting() && !pause_transition_in_flight(&sandbox) {
            return self.reconcile_terminating(&sandbox, workload.as_ref()).await;
        }

        match sandbox.status.phase {
            SandboxPhase::Pending => self.reconcile_pending(&sandbox, workload.as_ref()).await,
            SandboxPhase::Running => self.reconcile_running(&sandbox, workload.as_ref()).await,
            SandboxPhase::Paused => self.reconcile_paused(&sandbox, workload.as_ref()).await,
            SandboxPhase::Resuming => self.reconcile_resuming(&sandbox, workload.as_ref()).await,
            SandboxPhase::Terminating => {
                self.reconcile_terminating(&sandbox, workload.as_ref()).await
            }
            SandboxPhase::Succeeded | SandboxPhase::Failed => Ok(()),
        }
    }

    async fn reconcile_pending(
        &self,
        sandbox: &Sandbox,
        workload: Option<&Workload>,
    ) -> Result<(), ControllerError> {
        let mut desired = sandbox.clone();
        match workload {
            None => {
                if !sandbox.pod_creation_disabled() {
                    self.ensure_workload(sandbox, false).await?;
                }
            }
            Some(workload) => {
                self.mirror_placement(&mut desired, workload);
                if workload.phase == WorkloadPhase::Failed {
                    desired.status.phase = SandboxPhase::Failed;
                } else if workload.phase == WorkloadPhase::Succeeded {
                    desired.status.phase = SandboxPhase::Succeeded;
                } else if workload.phase == WorkloadPhase::Running || (self.bypass)(workload) {
                    desired.status.phase = SandboxPhase::Running;
                    self.mirror_ready(&mut desired, workload);
                    self.bus.publish(SandboxEvent::Created {
                        id: sandbox.id(),
                        source: EventSource::LifecycleController,
                        message: "sandbox running".to_string(),
                    });
                } else {
                    // Surface start failures to ready-waiters early.
                    self.mirror_ready(&mut desired, workload);
                }
            }
        }
        self.commit_status(sandbox, desired).await
    }

    async fn reconcile_running(
        &self,
        sandbox: &Sandbox,
        workload: Option<&Workload>,
    ) -> Result<(), ControllerError> {
        let mut desired = sandbox.clone();
        match workload {
            None => {
                // Workload vanished underneath us; go back and recreate.
                desired.status.phase = SandboxPhase::Pending;
                self.set_condition(
                    &mut desired,
                    Condition::new(ConditionType::Ready, ConditionStatus::False)
                        .with_reason("WorkloadMissing"),
                );
            }
            Some(workload) => {
                self.mirror_placement(&mut desired, workload);
                self.mirror_ready(&mut desired, workload);
                if workload.phase == WorkloadPhase::Failed {
                    desired.status.phase = SandboxPhase::Failed;
                } else if workload.phase == WorkloadPhase::Succeeded {
                    desired.status.phase = SandboxPhase::Succeeded;
                } else {
                    if workload.recreation_requested() {
                        // Handshake for the external fleet manager.
                        let mut updated = workload.clone();
                        updated.annotations.remove(annotations::RECREATING);
                        self.orchestrator.update_workload(&sandbox.id(), &updated).await?;
                    }
                    if sandbox.spec.paused {
                        desired.status.phase = SandboxPhase::Paused;
                        self.set_condition(
                            &mut desired,
                            Condition::new(ConditionType::Paused, ConditionStatus::False)
                                .with_reason(reasons::SET_PAUSE),
                        );
                        self.set_condition(
                            &mut desired,
                            Condition::new(ConditionType::Ready, ConditionStatus::False)
                                .with_reason("Paused"),
                        );
                    }
                }
            }
        }
        self.commit_status(sandbox, desired).await
    }

    async fn reconcile_paused(
        &self,
        sandbox: &Sandbox,
        workload: Option<&Workload>,
    ) -> Result<(), ControllerError> {
        let mut desired = sandbox.clone();
        // The sandbox is not routable while paused.
        self.set_condition(
            &mut desired,
            Condition::new(ConditionType::Ready, ConditionStatus::False).with_reason("Paused"),
        );

        // Resume requested once the pause has fully landed.
        if !sandbox.spec.paused && sandbox.condition_is_true(ConditionType::Paused) {
            desired.status.phase = SandboxPhase::Resuming;
            condition::remove(&mut desired.status.conditions, ConditionType::Paused);
            self.set_condition(
                &mut desired,
                Condition::new(ConditionType::Resumed, ConditionStatus::False)
                    .with_reason(reasons::CREATE_POD),
            );
            return self.commit_status(sandbox, desired).await;
        }

        if sandbox.condition_is_true(ConditionType::Paused) {
            // Stable paused.
            return self.commit_status(sandbox, desired).await;
        }

        let sub_reason = sandbox
            .condition(ConditionType::Paused)
            .map(|c| c.reason.clone())
            .unwrap_or_default();

        if sub_reason == reasons::DELETE_POD {
            match workload {
                Some(workload) => {
                    if sandbox.pod_deletion_disabled() {
                        self.mark_paused(sandbox, &mut desired);
                    } else if !workload.is_deleting() {
                        let grace = Some(self.config.pod_deletion_grace);
                        match self.orchestrator.delete_workload(&sandbox.id(), grace).await {
                            Ok(()) => {}
                            Err(e) if e.is_not_found() => {}
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
                None => self.mark_paused(sandbox, &mut desired),
            }
        } else {
            // SetPause: ask the workload to pause and wait for the
            // ContainersPaused report.
            match workload {
                None => self.mark_paused(sandbox, &mut desired),
                Some(workload) => {
                    if !workload.pause_requested()
                        || workload.annotation(annotations::RESERVE_INSTANCE)
                            != Some(annotations::TRUE)
                    {
                        let mut updated = workload.clone();
                        updated.set_annotation(annotations::SANDBOX_PAUSE, annotations::TRUE);
                        updated.set_annotation(annotations::RESERVE_INSTANCE, annotations::TRUE);
                        self.orchestrator.update_workload(&sandbox.id(), &updated).await?;
                    }
                    if workload.condition_is_true(WorkloadConditionType::ContainersPaused) {
                        // Remember which instance to recover from, then
                        // advance to pod deletion.
                        let instance = workload.uid.clone();
                        if sandbox.annotation(annotations::RECOVER_FROM_INSTANCE_ID)
                            != Some(instance.as_str())
                        {
                            self.update_sandbox_with(&sandbox.id(), |s| {
                                if s.annotation(annotations::RECOVER_FROM_INSTANCE_ID)
                                    == Some(instance.as_str())
                                {
                                    return false;
                                }
                                s.set_annotation(
                                    annotations::RECOVER_FROM_INSTANCE_ID,
                                    instance.clone(),
                                );
                                true
                            })
                            .await?;
                        }
                        self.set_condition(
                            &mut desired,
                            Condition::new(ConditionType::Paused, ConditionStatus::False)
                                .with_reason(reasons::DELETE_POD),
                        );
                    } else {
                        self.set_condition(
                            &mut desired,
                            Condition::new(ConditionType::Paused, ConditionStatus::False)
                                .with_reason(reasons::SET_PAUSE),
                        );
                    }
                }
            }
        }
        self.commit_status(sandbox, desired).await
    }

    async fn reconcile_resuming(
        &self,
        sandbox: &Sandbox,
        workload: Option<&Workload>,
    ) -> Result<(), ControllerError> {
        let mut desired = sandbox.clone();
        let sub_reason = sandbox
            .condition(ConditionType::Resumed)
            .map(|c| c.reason.clone())
            .unwrap_or_default();

        if sub_reason.is_empty() {
            self.set_condition(
                &mut desired,
                Condition::new(ConditionType::Resumed, ConditionStatus::False)
                    .with_reason(reasons::CREATE_POD),
            );
            return self.commit_status(sandbox, desired).await;
        }

        if sub_reason == reasons::CREATE_POD {
            match workload {
                None => {
                    if !sandbox.pod_creation_disabled() {
                        self.ensure_workload(sandbox, true).await?;
                    }
                }
                Some(workload) => match workload.condition(WorkloadConditionType::ContainersPaused)
                {
                    Some(paused) if paused.status == ConditionStatus::True => {
                        self.set_condition(
                            &mut desired,
                            Condition::new(ConditionType::Resumed, ConditionStatus::False)
                                .with_reason(reasons::RESUME_POD),
                        );
                    }
                    Some(_) => {
                        // Acknowledge the handshake: flip the report to
                        // True before unpausing.
                        let mut updated = workload.clone();
                        for cond in &mut updated.conditions {
                            if cond.r#type == WorkloadConditionType::ContainersPaused {
                                cond.status = ConditionStatus::True;
                            }
                        }
                        self.orchestrator.update_workload(&sandbox.id(), &updated).await?;
                    }
                    None => {
                        // External controllers surface the condition.
                    }
                },
            }
            return self.commit_status(sandbox, desired).await;
        }

        // ResumePod: unpause the workload and wait for Running.
        if let Some(workload) = workload {
            if workload.pause_requested() {
                let mut updated = workload.clone();
                updated.annotations.remove(annotations::SANDBOX_PAUSE);
                self.orchestrator.update_workload(&sandbox.id(), &updated).await?;
            }
            if workload.phase == WorkloadPhase::Running {
                desired.status.phase = SandboxPhase::Running;
                condition::remove(&mut desired.status.conditions, ConditionType::Resumed);
                self.mirror_placement(&mut desired, workload);
                self.mirror_ready(&mut desired, workload);
                self.commit_status(sandbox, desired).await?;
                // A resumed sandbox starts a fresh lifetime: clear the
                // pause/shutdown instants left over from before.
                self.update_sandbox_with(&sandbox.id(), |s| {
                    let dirty = s.spec.paused
                        || s.spec.pause_time.is_some()
                        || s.spec.shutdown_time.is_some();
                    s.spec.paused = false;
                    s.spec.pause_time = None;
                    s.spec.shutdown_time = None;
                    dirty
                })
                .await?;
                self.bus.publish(SandboxEvent::Resumed {
                    id: sandbox.id(),
                    source: EventSource::LifecycleController,
                    message: "sandbox resumed".to_string(),
                });
                return Ok(());
            }
        }
        self.commit_status(sandbox, desired).await
    }

    async fn reconcile_terminating(
        &self,
        sandbox: &Sandbox,
        workload: Option<&Workload>,
    ) -> Result<(), ControllerError> {
        let mut desired = sandbox.clone();
        if desired.status.phase != SandboxPhase::Terminating {
            desired.status.phase = SandboxPhase::Terminating;
            self.bus.publish(SandboxEvent::Kill {
                id: sandbox.id(),
                source: EventSource::LifecycleController,
                message: "sandbox terminating".to_string(),
            });
        }

        // A Paused condition means no live workload: the underlying
        // instance belongs to the external fleet manager now.
        if sandbox.condition(ConditionType::Paused).is_some() {
            if sandbox.annotation(annotations::ENABLE_VK_DELETE_INSTANCE)
                != Some(annotations::TRUE)
            {
                self.update_sandbox_with(&sandbox.id(), |s| {
                    if s.annotation(annotations::ENABLE_VK_DELETE_INSTANCE)
                        == Some(annotations::TRUE)
                    {
                        return false;
                    }
                    s.set_annotation(annotations::ENABLE_VK_DELETE_INSTANCE, annotations::TRUE);
                    true
                })
                .await?;
            }
            return self.commit_status(sandbox, desired).await;
        }

        match workload {
            Some(workload) if !workload.is_deleting() => {
                let grace = Some(self.config.pod_deletion_grace);
                match self.orchestrator.delete_workload(&sandbox.id(), grace).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                self.commit_status(sandbox, desired).await
            }
            Some(_) => self.commit_status(sandbox, desired).await,
            None => {
                self.commit_status(sandbox, desired).await?;
                if sandbox.has_finalizer() {
                    self.update_sandbox_with(&sandbox.id(), |s| {
                        if !s.has_finalizer() {
                            return false;
                        }
                        s.remove_finalizer();
                        true
                    })
                    .await?;
                }
                Ok(())
            }
        }
    }

    /// Create the workload backing a sandbox, copying the sandbox's
    /// labels and non-reserved annotations.
    async fn ensure_workload(
        &self,
        sandbox: &Sandbox,
        resuming: bool,
    ) -> Result<(), ControllerError> {
        let mut workload = Workload {
            name: sandbox.name.clone(),
            image: sandbox.spec.image.clone(),
            labels: sandbox.labels.clone(),
            ..Workload::default()
        };
        for (key, value) in &sandbox.annotations {
            if !key.starts_with(annotations::DOMAIN) {
                workload.annotations.insert(key.clone(), value.clone());
            }
        }
        workload.set_annotation(annotations::CREATED_BY, annotations::CREATED_BY_SANDBOX);
        workload.set_annotation(annotations::ENABLE_PAUSED, annotations::TRUE);
        if resuming {
            // Comes up paused; the resume flow unpauses it once the
            // recovered instance reports in.
            workload.set_annotation(annotations::SANDBOX_PAUSE, annotations::TRUE);
            if let Some(instance) = sandbox.annotation(annotations::RECOVER_FROM_INSTANCE_ID) {
                workload.set_annotation(annotations::RECOVER_FROM_INSTANCE_ID, instance);
            }
        }
        match self.orchestrator.create_workload(&sandbox.id(), &workload).await {
            Ok(_) => Ok(()),
            Err(sp_adapters::OrchestratorError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn mark_paused(&self, sandbox: &Sandbox, desired: &mut Sandbox) {
        self.set_condition(
            desired,
            Condition::new(ConditionType::Paused, ConditionStatus::True)
                .with_reason(reasons::DELETE_POD),
        );
        if !sandbox.condition_is_true(ConditionType::Paused) {
            self.bus.publish(SandboxEvent::Paused {
                id: sandbox.id(),
                source: EventSource::LifecycleController,
                message: "sandbox paused".to_string(),
            });
        }
    }

    fn mirror_ready(&self, desired: &mut Sandbox, workload: &Workload) {
        let cond = match workload.condition(WorkloadConditionType::Ready) {
            Some(c) => Condition::new(ConditionType::Ready, c.status)
                .with_reason(c.reason.clone())
                .with_message(c.message.clone()),
            None => Condition::new(ConditionType::Ready, ConditionStatus::Unknown),
        };
        self.set_condition(desired, cond);
    }

    fn mirror_placement(&self, desired: &mut Sandbox, workload: &Workload) {
        if workload.address.is_empty() && workload.uid.is_empty() {
            return;
        }
        desired.status.pod_info = Some(PodInfo {
            address: workload.address.clone(),
            uid: workload.uid.clone(),
            annotations: workload.annotations.clone(),
        });
    }

    fn set_condition(&self, desired: &mut Sandbox, cond: Condition) {
        condition::set(&mut desired.status.conditions, cond, self.clock.now_utc());
    }
}

fn pause_transition_in_flight(sandbox: &Sandbox) -> bool {
    match sandbox.status.phase {
        SandboxPhase::Paused => !sandbox.condition_is_true(ConditionType::Paused),
        SandboxPhase::Resuming => true,
        _ => false,
    }
}
