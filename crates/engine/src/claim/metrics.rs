// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-claim latency breakdown.

use std::fmt;
use std::time::Duration;

use sp_core::scrub;

/// How the winning lock write was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    /// CAS update of an Available candidate.
    Update,
    /// Fresh sandbox synthesised from the template.
    Create,
    /// CAS update of a still-Creating candidate.
    Speculate,
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockType::Update => write!(f, "update"),
            LockType::Create => write!(f, "create"),
            LockType::Speculate => write!(f, "speculate"),
        }
    }
}

/// Stage timings and outcome of one claim request.
#[derive(Debug, Clone, Default)]
pub struct ClaimMetrics {
    pub retries: u32,
    pub total: Duration,
    /// Time blocked on claim-worker admission.
    pub wait: Duration,
    pub pick_and_lock: Duration,
    pub wait_ready: Duration,
    pub init_runtime: Duration,
    pub csi_mount: Duration,
    pub lock_type: Option<LockType>,
    /// Last error observed, verbatim; scrubbed only for display.
    pub last_error: String,
}

impl fmt::Display for ClaimMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "retries={} total={}ms wait={}ms pick_and_lock={}ms wait_ready={}ms \
             init_runtime={}ms csi_mount={}ms lock_type={} last_error={:?}",
            self.retries,
            self.total.as_millis(),
            self.wait.as_millis(),
            self.pick_and_lock.as_millis(),
            self.wait_ready.as_millis(),
            self.init_runtime.as_millis(),
            self.csi_mount.as_millis(),
            self.lock_type.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string()),
            scrub(&self.last_error),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_single_line_even_with_control_chars() {
        let metrics = ClaimMetrics {
            retries: 2,
            total: Duration::from_millis(120),
            lock_type: Some(LockType::Update),
            last_error: "conflict:\nretry".to_string(),
            ..ClaimMetrics::default()
        };
        let line = metrics.to_string();
        assert!(!line.contains('\n'));
        assert!(line.contains("retries=2"));
        assert!(line.contains("lock_type=update"));
    }

    #[test]
    fn stage_sum_never_exceeds_total_in_practice() {
        let metrics = ClaimMetrics {
            total: Duration::from_millis(100),
            wait: Duration::from_millis(10),
            pick_and_lock: Duration::from_millis(30),
            wait_ready: Duration::from_millis(40),
            ..ClaimMetrics::default()
        };
        let staged = metrics.wait
            + metrics.pick_and_lock
            + metrics.wait_ready
            + metrics.init_runtime
            + metrics.csi_mount;
        assert!(metrics.total >= staged);
    }
}
