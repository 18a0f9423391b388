// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sp-core: data model for the Sandpool sandbox fleet manager

pub mod annotations;
pub mod clock;
pub mod condition;
pub mod event;
pub mod id;
pub mod route;
pub mod sandbox;
pub mod scrub;
pub mod state;
pub mod template;
pub mod version;
pub mod workload;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
#[cfg(any(test, feature = "test-support"))]
pub use test_support::{SandboxBuilder, WorkloadBuilder};
pub use condition::{Condition, ConditionStatus, ConditionType};
pub use event::{EventSource, SandboxEvent};
pub use id::{generate_lock_token, generate_name_suffix, SandboxId};
pub use route::{Peer, Route};
pub use sandbox::{OwnerReference, PodInfo, Sandbox, SandboxPhase, SandboxSpec, SandboxStatus};
pub use scrub::scrub;
pub use state::{effective_state, EffectiveState};
pub use template::PoolTemplate;
pub use workload::{Workload, WorkloadCondition, WorkloadConditionType, WorkloadPhase};
