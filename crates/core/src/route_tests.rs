// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::sandbox::SandboxPhase;
use crate::test_support::SandboxBuilder;

#[test]
fn route_projects_claimed_sandbox() {
    let sandbox = SandboxBuilder::new("default", "sbx-1")
        .phase(SandboxPhase::Running)
        .address("10.0.0.1")
        .ready()
        .claimed("alice")
        .build();

    let route = Route::from_sandbox(&sandbox);
    assert_eq!(route.id.as_str(), "default/sbx-1");
    assert_eq!(route.address, "10.0.0.1");
    assert_eq!(route.owner, "alice");
    assert_eq!(route.state, EffectiveState::Running);
}

#[test]
fn route_is_idempotent_for_identical_input() {
    let sandbox = SandboxBuilder::available("default", "sbx-1", "small", "10.0.0.1");
    assert_eq!(Route::from_sandbox(&sandbox), Route::from_sandbox(&sandbox));
}

#[test]
fn route_serde_round_trip() {
    let sandbox = SandboxBuilder::available("default", "sbx-1", "small", "10.0.0.1");
    let route = Route::from_sandbox(&sandbox);
    let json = serde_json::to_string(&route).unwrap();
    let back: Route = serde_json::from_str(&json).unwrap();
    assert_eq!(back, route);
}
