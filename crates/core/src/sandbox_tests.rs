// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::SandboxBuilder;

#[test]
fn id_derives_from_namespace_and_name() {
    let sandbox = SandboxBuilder::new("default", "sbx-1").build();
    assert_eq!(sandbox.id().as_str(), "default/sbx-1");
}

#[test]
fn lock_and_owner_default_to_empty() {
    let sandbox = SandboxBuilder::new("default", "sbx-1").build();
    assert_eq!(sandbox.lock(), "");
    assert_eq!(sandbox.owner(), "");
    assert!(!sandbox.is_claimed());
}

#[test]
fn claimed_sandbox_exposes_owner_and_lock() {
    let sandbox = SandboxBuilder::new("default", "sbx-1").claimed("alice").build();
    assert!(sandbox.is_claimed());
    assert_eq!(sandbox.owner(), "alice");
    assert!(!sandbox.lock().is_empty());
    assert!(!sandbox.is_pool_owned());
}

#[test]
fn pool_ownership_requires_controller_ref() {
    let sandbox = SandboxBuilder::new("default", "sbx-1").pool_owned("small").build();
    assert!(sandbox.is_pool_owned());
    assert_eq!(sandbox.spec.template, "small");
}

#[test]
fn freshness_tracks_observed_generation() {
    let mut sandbox = SandboxBuilder::new("default", "sbx-1").build();
    assert!(sandbox.is_fresh());
    sandbox.generation = 2;
    assert!(!sandbox.is_fresh());
    sandbox.status.observed_generation = 2;
    assert!(sandbox.is_fresh());
}

#[test]
fn finalizer_round_trip() {
    let mut sandbox = SandboxBuilder::new("default", "sbx-1").build();
    assert!(sandbox.has_finalizer());
    sandbox.remove_finalizer();
    assert!(!sandbox.has_finalizer());
}

#[test]
fn terminal_phases() {
    assert!(SandboxPhase::Succeeded.is_terminal());
    assert!(SandboxPhase::Failed.is_terminal());
    assert!(!SandboxPhase::Terminating.is_terminal());
    assert!(!SandboxPhase::Running.is_terminal());
}

#[test]
fn serde_round_trips_with_camel_case_fields() {
    let sandbox = SandboxBuilder::available("default", "sbx-1", "small", "10.0.0.1");
    let json = serde_json::to_value(&sandbox).unwrap();
    assert_eq!(json["spec"]["template"], "small");
    assert_eq!(json["status"]["podInfo"]["address"], "10.0.0.1");
    assert_eq!(json["status"]["observedGeneration"], 1);

    let back: Sandbox = serde_json::from_value(json).unwrap();
    assert_eq!(back, sandbox);
}
