// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sp_core::{FakeClock, SandboxBuilder};

fn sandbox_at(version: &str) -> Sandbox {
    let mut s = SandboxBuilder::new("default", "sbx-1").build();
    s.resource_version = version.to_string();
    s
}

#[test]
fn no_expectation_is_satisfied() {
    let tracker = ExpectationTracker::new(FakeClock::new());
    assert!(tracker.satisfied(&sandbox_at("10")));
}

#[test]
fn stale_cache_is_unsatisfied_until_observed() {
    let tracker = ExpectationTracker::new(FakeClock::new());
    tracker.expect(&sandbox_at("20"));

    assert!(!tracker.satisfied(&sandbox_at("19")));
    assert!(tracker.satisfied(&sandbox_at("20")));
    // satisfied() at the expected version also clears the record
    assert!(tracker.satisfied(&sandbox_at("19")));
}

#[test]
fn observe_clears_at_or_past_expected_version() {
    let tracker = ExpectationTracker::new(FakeClock::new());
    tracker.expect(&sandbox_at("20"));

    tracker.observe(&sandbox_at("19"));
    assert_eq!(tracker.len(), 1);

    tracker.observe(&sandbox_at("21"));
    assert_eq!(tracker.len(), 0);
}

#[test]
fn uid_change_clears_the_expectation() {
    let tracker = ExpectationTracker::new(FakeClock::new());
    tracker.expect(&sandbox_at("20"));

    let mut replaced = sandbox_at("5");
    replaced.uid = "different-uid".to_string();
    assert!(tracker.satisfied(&replaced));
}

#[test]
fn expectation_ages_out_as_a_failsafe() {
    let clock = FakeClock::new();
    let tracker = ExpectationTracker::with_timeout(clock.clone(), Duration::from_secs(3));
    tracker.expect(&sandbox_at("20"));

    assert!(!tracker.satisfied(&sandbox_at("19")));
    clock.advance(Duration::from_secs(4));
    assert!(tracker.satisfied(&sandbox_at("19")));
    assert_eq!(tracker.len(), 0);
}
