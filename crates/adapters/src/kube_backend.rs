// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes-backed orchestrator.
//!
//! Sandboxes live as a namespaced custom resource addressed through the
//! dynamic API; workloads are pods named after their sandbox. Pods
//! carry the `app=sandpool-sandbox` label so watches and stale-resource
//! sweeps can select them.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference as KubeOwnerReference;
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams,
};
use kube::runtime::watcher;
use kube::{Api, Client};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use sp_core::{
    ConditionStatus, PoolTemplate, Sandbox, SandboxId, SandboxSpec, SandboxStatus, Workload,
    WorkloadCondition, WorkloadConditionType, WorkloadPhase,
};

use crate::error::OrchestratorError;
use crate::orchestrator::{Orchestrator, WatchEvent};

const GROUP: &str = "sandpool.dev";
const VERSION: &str = "v1alpha1";

/// Label stamped on every workload pod; watches select on it.
const WORKLOAD_LABEL_KEY: &str = "app";
const WORKLOAD_LABEL_VALUE: &str = "sandpool-sandbox";

/// Orchestrator backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
    namespace: String,
    sandbox_resource: ApiResource,
    template_resource: ApiResource,
}

impl KubeOrchestrator {
    pub async fn new(namespace: impl Into<String>) -> Result<Self, OrchestratorError> {
        let client = Client::try_default()
            .await
            .map_err(|e| OrchestratorError::Api(format!("failed to create kube client: {e}")))?;
        Ok(Self::with_client(client, namespace))
    }

    pub fn with_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            sandbox_resource: ApiResource::from_gvk(&GroupVersionKind::gvk(
                GROUP, VERSION, "Sandbox",
            )),
            template_resource: ApiResource::from_gvk(&GroupVersionKind::gvk(
                GROUP, VERSION, "PoolTemplate",
            )),
        }
    }

    fn sandboxes(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.sandbox_resource)
    }

    fn templates(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.template_resource)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_err(e: kube::Error) -> OrchestratorError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            OrchestratorError::AlreadyExists(ae.message)
        }
        kube::Error::Api(ae) if ae.code == 409 => OrchestratorError::Conflict(ae.message),
        kube::Error::Api(ae) if ae.code == 404 => OrchestratorError::NotFound(ae.message),
        kube::Error::Api(ae) if ae.code == 422 => OrchestratorError::Invalid(ae.message),
        other => OrchestratorError::Api(other.to_string()),
    }
}

fn none_if_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn dynamic_to_sandbox(obj: DynamicObject) -> Result<Sandbox, OrchestratorError> {
    let spec: SandboxSpec = match obj.data.get("spec") {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| OrchestratorError::Invalid(format!("sandbox spec: {e}")))?,
        None => SandboxSpec::default(),
    };
    let status: SandboxStatus = match obj.data.get("status") {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| OrchestratorError::Invalid(format!("sandbox status: {e}")))?,
        None => SandboxStatus::default(),
    };
    let meta = obj.metadata;
    Ok(Sandbox {
        namespace: meta.namespace.unwrap_or_default(),
        name: meta.name.unwrap_or_default(),
        uid: meta.uid.unwrap_or_default(),
        resource_version: meta.resource_version.unwrap_or_default(),
        generation: meta.generation.unwrap_or(0),
        creation_timestamp: meta.creation_timestamp.map(|t| t.0),
        deletion_timestamp: meta.deletion_timestamp.map(|t| t.0),
        labels: meta.labels.unwrap_or_default(),
        annotations: meta.annotations.unwrap_or_default(),
        finalizers: meta.finalizers.unwrap_or_default(),
        owner_references: meta
            .owner_references
            .unwrap_or_default()
            .into_iter()
            .map(|r| sp_core::OwnerReference {
                kind: r.kind,
                name: r.name,
                uid: r.uid,
                controller: r.controller.unwrap_or(false),
            })
            .collect(),
        spec,
        status,
    })
}

fn sandbox_to_dynamic(
    sandbox: &Sandbox,
    resource: &ApiResource,
) -> Result<DynamicObject, OrchestratorError> {
    let mut obj = DynamicObject::new(&sandbox.name, resource).within(&sandbox.namespace);
    obj.metadata.uid = none_if_empty(&sandbox.uid);
    obj.metadata.resource_version = none_if_empty(&sandbox.resource_version);
    if !sandbox.labels.is_empty() {
        obj.metadata.labels = Some(sandbox.labels.clone());
    }
    if !sandbox.annotations.is_empty() {
        obj.metadata.annotations = Some(sandbox.annotations.clone());
    }
    if !sandbox.finalizers.is_empty() {
        obj.metadata.finalizers = Some(sandbox.finalizers.clone());
    }
    if !sandbox.owner_references.is_empty() {
        obj.metadata.owner_references = Some(
            sandbox
                .owner_references
                .iter()
                .map(|r| KubeOwnerReference {
                    api_version: format!("{GROUP}/{VERSION}"),
                    kind: r.kind.clone(),
                    name: r.name.clone(),
                    uid: r.uid.clone(),
                    controller: Some(r.controller),
                    ..KubeOwnerReference::default()
                })
                .collect(),
        );
    }
    obj.data = json!({
        "spec": serde_json::to_value(&sandbox.spec)
            .map_err(|e| OrchestratorError::Invalid(e.to_string()))?,
        "status": serde_json::to_value(&sandbox.status)
            .map_err(|e| OrchestratorError::Invalid(e.to_string()))?,
    });
    Ok(obj)
}

fn pod_to_workload(pod: &Pod) -> Workload {
    let status = pod.status.clone().unwrap_or_default();
    let phase = match status.phase.as_deref() {
        Some("Pending") => WorkloadPhase::Pending,
        Some("Running") => WorkloadPhase::Running,
        Some("Succeeded") => WorkloadPhase::Succeeded,
        Some("Failed") => WorkloadPhase::Failed,
        _ => WorkloadPhase::Unknown,
    };
    let conditions = status
        .conditions
        .unwrap_or_default()
        .iter()
        .filter_map(|c| {
            let r#type = match c.type_.as_str() {
                "Ready" => WorkloadConditionType::Ready,
                "ContainersPaused" => WorkloadConditionType::ContainersPaused,
                _ => return None,
            };
            let cond_status = match c.status.as_str() {
                "True" => ConditionStatus::True,
                "False" => ConditionStatus::False,
                _ => ConditionStatus::Unknown,
            };
            Some(WorkloadCondition {
                r#type,
                status: cond_status,
                reason: c.reason.clone().unwrap_or_default(),
                message: c.message.clone().unwrap_or_default(),
            })
        })
        .collect();
    Workload {
        name: pod.metadata.name.clone().unwrap_or_default(),
        uid: pod.metadata.uid.clone().unwrap_or_default(),
        phase,
        address: status.pod_ip.unwrap_or_default(),
        image: pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.image.clone())
            .unwrap_or_default(),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        annotations: pod.metadata.annotations.clone().unwrap_or_default(),
        conditions,
        deletion_timestamp: pod.metadata.deletion_timestamp.clone().map(|t| t.0),
    }
}

fn workload_to_pod(id: &SandboxId, workload: &Workload) -> Pod {
    let mut labels: BTreeMap<String, String> = workload.labels.clone();
    labels.insert(WORKLOAD_LABEL_KEY.to_string(), WORKLOAD_LABEL_VALUE.to_string());
    Pod {
        metadata: kube::core::ObjectMeta {
            name: Some(id.name().to_string()),
            namespace: Some(id.namespace().to_string()),
            labels: Some(labels),
            annotations: if workload.annotations.is_empty() {
                None
            } else {
                Some(workload.annotations.clone())
            },
            ..kube::core::ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "sandbox".to_string(),
                image: none_if_empty(&workload.image),
                ..Container::default()
            }],
            ..PodSpec::default()
        }),
        status: None,
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn get_sandbox(&self, id: &SandboxId) -> Result<Sandbox, OrchestratorError> {
        let obj =
            self.sandboxes(id.namespace()).get(id.name()).await.map_err(map_kube_err)?;
        dynamic_to_sandbox(obj)
    }

    async fn list_sandboxes(&self, namespace: &str) -> Result<Vec<Sandbox>, OrchestratorError> {
        let list = self
            .sandboxes(namespace)
            .list(&Default::default())
            .await
            .map_err(map_kube_err)?;
        list.items.into_iter().map(dynamic_to_sandbox).collect()
    }

    async fn create_sandbox(&self, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError> {
        let obj = sandbox_to_dynamic(sandbox, &self.sandbox_resource)?;
        let created = self
            .sandboxes(&sandbox.namespace)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(map_kube_err)?;
        dynamic_to_sandbox(created)
    }

    async fn update_sandbox(&self, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError> {
        let obj = sandbox_to_dynamic(sandbox, &self.sandbox_resource)?;
        let updated = self
            .sandboxes(&sandbox.namespace)
            .replace(&sandbox.name, &PostParams::default(), &obj)
            .await
            .map_err(map_kube_err)?;
        dynamic_to_sandbox(updated)
    }

    async fn update_sandbox_status(&self, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError> {
        let obj = sandbox_to_dynamic(sandbox, &self.sandbox_resource)?;
        let bytes =
            serde_json::to_vec(&obj).map_err(|e| OrchestratorError::Invalid(e.to_string()))?;
        let updated = self
            .sandboxes(&sandbox.namespace)
            .replace_status(&sandbox.name, &PostParams::default(), bytes)
            .await
            .map_err(map_kube_err)?;
        dynamic_to_sandbox(updated)
    }

    async fn delete_sandbox(&self, id: &SandboxId) -> Result<(), OrchestratorError> {
        self.sandboxes(id.namespace())
            .delete(id.name(), &DeleteParams::default())
            .await
            .map_err(map_kube_err)?;
        Ok(())
    }

    async fn watch_sandboxes(&self) -> mpsc::UnboundedReceiver<WatchEvent<Sandbox>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let api = self.sandboxes(&self.namespace);
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(watcher(api, watcher::Config::default()));
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(watcher::Event::InitApply(obj)) => {
                        dynamic_to_sandbox(obj).map(WatchEvent::Added)
                    }
                    Ok(watcher::Event::Apply(obj)) => {
                        dynamic_to_sandbox(obj).map(WatchEvent::Modified)
                    }
                    Ok(watcher::Event::Delete(obj)) => {
                        dynamic_to_sandbox(obj).map(WatchEvent::Deleted)
                    }
                    Ok(watcher::Event::Init | watcher::Event::InitDone) => continue,
                    Err(e) => {
                        warn!(error = %e, "sandbox watch error, stream will resync");
                        continue;
                    }
                };
                match event {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping undecodable sandbox event"),
                }
            }
        });
        rx
    }

    async fn get_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PoolTemplate, OrchestratorError> {
        let obj = self.templates(namespace).get(name).await.map_err(map_kube_err)?;
        let spec = obj.data.get("spec").cloned().unwrap_or(serde_json::Value::Null);
        Ok(PoolTemplate {
            namespace: obj.metadata.namespace.unwrap_or_default(),
            name: obj.metadata.name.unwrap_or_default(),
            uid: obj.metadata.uid.unwrap_or_default(),
            image: spec
                .get("image")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            replicas: spec
                .get("replicas")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0) as i32,
            labels: obj.metadata.labels.unwrap_or_default(),
            annotations: obj.metadata.annotations.unwrap_or_default(),
        })
    }

    async fn get_workload(&self, id: &SandboxId) -> Result<Option<Workload>, OrchestratorError> {
        match self.pods(id.namespace()).get(id.name()).await {
            Ok(pod) => Ok(Some(pod_to_workload(&pod))),
            Err(e) => match map_kube_err(e) {
                OrchestratorError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn create_workload(
        &self,
        id: &SandboxId,
        workload: &Workload,
    ) -> Result<Workload, OrchestratorError> {
        let pod = workload_to_pod(id, workload);
        let created = self
            .pods(id.namespace())
            .create(&PostParams::default(), &pod)
            .await
            .map_err(map_kube_err)?;
        Ok(pod_to_workload(&created))
    }

    async fn update_workload(
        &self,
        id: &SandboxId,
        workload: &Workload,
    ) -> Result<Workload, OrchestratorError> {
        let pods = self.pods(id.namespace());
        let patch = json!({ "metadata": { "annotations": workload.annotations } });
        let patched = pods
            .patch(id.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_kube_err)?;

        // Condition handshakes (ContainersPaused) go through the status
        // subresource; external controllers own the rest of the status.
        if !workload.conditions.is_empty() {
            let conditions: Vec<serde_json::Value> = workload
                .conditions
                .iter()
                .map(|c| {
                    json!({
                        "type": match c.r#type {
                            WorkloadConditionType::Ready => "Ready",
                            WorkloadConditionType::ContainersPaused => "ContainersPaused",
                        },
                        "status": match c.status {
                            ConditionStatus::True => "True",
                            ConditionStatus::False => "False",
                            ConditionStatus::Unknown => "Unknown",
                        },
                        "reason": c.reason,
                        "message": c.message,
                    })
                })
                .collect();
            let status_patch = json!({ "status": { "conditions": conditions } });
            pods.patch_status(id.name(), &PatchParams::default(), &Patch::Merge(&status_patch))
                .await
                .map_err(map_kube_err)?;
        }
        Ok(pod_to_workload(&patched))
    }

    async fn delete_workload(
        &self,
        id: &SandboxId,
        grace_period: Option<Duration>,
    ) -> Result<(), OrchestratorError> {
        let params = DeleteParams {
            grace_period_seconds: grace_period.map(|d| d.as_secs() as u32),
            ..DeleteParams::default()
        };
        self.pods(id.namespace())
            .delete(id.name(), &params)
            .await
            .map_err(map_kube_err)?;
        Ok(())
    }

    async fn watch_workloads(&self) -> mpsc::UnboundedReceiver<WatchEvent<(SandboxId, Workload)>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let api = self.pods(&self.namespace);
        let selector = format!("{WORKLOAD_LABEL_KEY}={WORKLOAD_LABEL_VALUE}");
        tokio::spawn(async move {
            let config = watcher::Config::default().labels(&selector);
            let mut stream = std::pin::pin!(watcher(api, config));
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(watcher::Event::InitApply(pod)) => WatchEvent::Added(keyed(&pod)),
                    Ok(watcher::Event::Apply(pod)) => WatchEvent::Modified(keyed(&pod)),
                    Ok(watcher::Event::Delete(pod)) => WatchEvent::Deleted(keyed(&pod)),
                    Ok(watcher::Event::Init | watcher::Event::InitDone) => continue,
                    Err(e) => {
                        warn!(error = %e, "workload watch error, stream will resync");
                        continue;
                    }
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
        });
        rx
    }
}

fn keyed(pod: &Pod) -> (SandboxId, Workload) {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let name = pod.metadata.name.as_deref().unwrap_or_default();
    (SandboxId::from_parts(namespace, name), pod_to_workload(pod))
}
