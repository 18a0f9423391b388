// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capped exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Backoff schedule: `base * factor^n`, jittered by ±`jitter`, capped.
pub struct Backoff {
    base: Duration,
    factor: f64,
    jitter: f64,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, factor: f64, jitter: f64, cap: Duration) -> Self {
        Self { base, factor, jitter, cap, attempt: 0 }
    }

    /// Next delay in the schedule.
    pub fn next(&mut self) -> Duration {
        let raw = self.base.as_secs_f64() * self.factor.powi(self.attempt as i32);
        self.attempt = self.attempt.saturating_add(1);
        let jittered = if self.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            raw * (1.0 + spread)
        } else {
            raw
        };
        Duration::from_secs_f64(jittered.max(0.0)).min(self.cap)
    }
}
