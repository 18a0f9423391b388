// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sp-adapters: seams to the world outside the process.
//!
//! The [`Orchestrator`] trait abstracts the cluster substrate (sandbox
//! store plus workload scheduling); `kube` backs it in production and
//! [`FakeOrchestrator`] backs it in tests. The runtime clients speak to
//! the daemon running inside each sandbox.

mod error;
mod kube_backend;
mod orchestrator;
mod runtime;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use error::OrchestratorError;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeOrchestrator;
pub use kube_backend::KubeOrchestrator;
pub use orchestrator::{Orchestrator, WatchEvent};
pub use runtime::{InitRequest, ProcessClient, ProcessResult, RuntimeClient, RuntimeError};
