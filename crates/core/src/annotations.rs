// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reserved annotation keys and well-known values.
//!
//! All keys live under the `sandbox.sandpool.dev/` namespace. The claim
//! engine and lifecycle controller are the only writers; everything else
//! treats them as opaque.

/// Annotation namespace for all sandbox metadata.
pub const DOMAIN: &str = "sandbox.sandpool.dev";

/// Opaque token marking the sandbox as held by a claim attempt.
pub const LOCK: &str = "sandbox.sandpool.dev/lock";
/// User id the sandbox was claimed for.
pub const OWNER: &str = "sandbox.sandpool.dev/owner";
/// RFC 3339 instant of the successful lock write.
pub const CLAIM_TIME: &str = "sandbox.sandpool.dev/claim-time";
/// "true" once a claim succeeded; claimed sandboxes never re-enter the pool.
pub const IS_CLAIMED: &str = "sandbox.sandpool.dev/is-claimed";
/// Set by an external fleet manager asking for workload recreation.
pub const RECREATING: &str = "sandbox.sandpool.dev/recreating";
/// Asks the workload runtime to pause its containers.
pub const SANDBOX_PAUSE: &str = "sandbox.sandpool.dev/sandbox-pause";
/// Keeps the underlying instance reserved while the workload is gone.
pub const RESERVE_INSTANCE: &str = "sandbox.sandpool.dev/reserve-instance";
/// Instance id a resumed workload should recover from.
pub const RECOVER_FROM_INSTANCE_ID: &str = "sandbox.sandpool.dev/recover-from-instance-id";
/// Hands instance deletion off to the external fleet manager.
pub const ENABLE_VK_DELETE_INSTANCE: &str = "sandbox.sandpool.dev/enable-vk-delete-instance";
/// Who created the workload object.
pub const CREATED_BY: &str = "sandbox.sandpool.dev/created-by";
/// Marks a workload as pause-capable; injected at creation.
pub const ENABLE_PAUSED: &str = "sandbox.sandpool.dev/enable-paused";
/// Base URL of the in-sandbox runtime daemon.
pub const RUNTIME_URL: &str = "sandbox.sandpool.dev/runtime-url";
/// Access token for the in-sandbox runtime daemon.
pub const RUNTIME_ACCESS_TOKEN: &str = "sandbox.sandpool.dev/runtime-access-token";
/// Suppresses workload creation while set.
pub const DISABLE_POD_CREATION: &str = "sandbox.sandpool.dev/disable-pod-creation";
/// Suppresses workload deletion while set.
pub const DISABLE_POD_DELETION: &str = "sandbox.sandpool.dev/disable-pod-deletion";
/// Bypass oracle marker: the workload is routable without a Ready report.
pub const BYPASS: &str = "sandbox.sandpool.dev/bypass";

/// Finalizer held while a sandbox may still own substrate resources.
pub const FINALIZER: &str = "sandbox-finalizer";

/// `CREATED_BY` value written by the lifecycle controller.
pub const CREATED_BY_SANDBOX: &str = "sandbox";
/// Truthy annotation value.
pub const TRUE: &str = "true";
