// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders for constructing sandboxes and workloads in tests.

use chrono::{TimeZone, Utc};

use crate::annotations;
use crate::condition::{Condition, ConditionStatus, ConditionType};
use crate::sandbox::{OwnerReference, PodInfo, Sandbox, SandboxPhase};
use crate::workload::{Workload, WorkloadCondition, WorkloadConditionType, WorkloadPhase};

/// Fluent builder for test sandboxes.
pub struct SandboxBuilder {
    sandbox: Sandbox,
}

impl SandboxBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        let mut sandbox = Sandbox {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            resource_version: "1".to_string(),
            generation: 1,
            creation_timestamp: Utc.timestamp_opt(1_700_000_000, 0).single(),
            ..Sandbox::default()
        };
        sandbox.status.observed_generation = 1;
        sandbox.finalizers.push(annotations::FINALIZER.to_string());
        Self { sandbox }
    }

    pub fn template(mut self, template: &str) -> Self {
        self.sandbox.spec.template = template.to_string();
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.sandbox.spec.image = image.to_string();
        self
    }

    pub fn phase(mut self, phase: SandboxPhase) -> Self {
        self.sandbox.status.phase = phase;
        self
    }

    pub fn pool_owned(mut self, template: &str) -> Self {
        self.sandbox.spec.template = template.to_string();
        self.sandbox.owner_references.push(OwnerReference {
            kind: "PoolTemplate".to_string(),
            name: template.to_string(),
            uid: format!("uid-tpl-{template}"),
            controller: true,
        });
        self
    }

    pub fn address(mut self, address: &str) -> Self {
        let info = self.sandbox.status.pod_info.get_or_insert_with(PodInfo::default);
        info.address = address.to_string();
        if info.uid.is_empty() {
            info.uid = format!("pod-uid-{}", self.sandbox.name);
        }
        self
    }

    pub fn ready(mut self) -> Self {
        self.sandbox.status.conditions.push(Condition::new(ConditionType::Ready, ConditionStatus::True));
        self
    }

    pub fn condition(mut self, r#type: ConditionType, status: ConditionStatus, reason: &str) -> Self {
        self.sandbox
            .status
            .conditions
            .push(Condition::new(r#type, status).with_reason(reason));
        self
    }

    pub fn claimed(mut self, owner: &str) -> Self {
        self.sandbox.set_annotation(annotations::IS_CLAIMED, annotations::TRUE);
        self.sandbox.set_annotation(annotations::OWNER, owner);
        self.sandbox.set_annotation(annotations::LOCK, format!("lock-{owner}"));
        self.sandbox.owner_references.clear();
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.sandbox.set_annotation(key, value);
        self
    }

    pub fn paused_spec(mut self, paused: bool) -> Self {
        self.sandbox.spec.paused = paused;
        self
    }

    pub fn build(self) -> Sandbox {
        self.sandbox
    }

    /// Shorthand: a pool-owned, Ready, addressable sandbox — the shape
    /// the claim engine hunts for.
    pub fn available(namespace: &str, name: &str, template: &str, address: &str) -> Sandbox {
        Self::new(namespace, name)
            .pool_owned(template)
            .phase(SandboxPhase::Running)
            .address(address)
            .ready()
            .build()
    }
}

/// Fluent builder for test workloads.
pub struct WorkloadBuilder {
    workload: Workload,
}

impl WorkloadBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            workload: Workload {
                name: name.to_string(),
                uid: format!("wl-uid-{name}"),
                ..Workload::default()
            },
        }
    }

    pub fn phase(mut self, phase: WorkloadPhase) -> Self {
        self.workload.phase = phase;
        self
    }

    pub fn address(mut self, address: &str) -> Self {
        self.workload.address = address.to_string();
        self
    }

    pub fn ready(mut self) -> Self {
        self.workload.conditions.push(WorkloadCondition {
            r#type: WorkloadConditionType::Ready,
            status: ConditionStatus::True,
            reason: String::new(),
            message: String::new(),
        });
        self
    }

    pub fn condition(mut self, r#type: WorkloadConditionType, status: ConditionStatus, reason: &str) -> Self {
        self.workload.conditions.push(WorkloadCondition {
            r#type,
            status,
            reason: reason.to_string(),
            message: String::new(),
        });
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.workload.set_annotation(key, value);
        self
    }

    pub fn build(self) -> Workload {
        self.workload
    }
}
