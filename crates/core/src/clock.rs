// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time sources for the claim and lifecycle paths.
//!
//! Two kinds of time flow through the system: monotonic instants for
//! deadlines, candidate ages and backoff, and wall-clock instants for
//! everything that lands on the wire (claim-time annotations, condition
//! transitions, peer heartbeats). A [`Clock`] supplies both so fakes
//! can hold them coherent in tests.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock: Clone + Send + Sync + 'static {
    /// Monotonic instant: deadlines, stage timings, backoff.
    fn now(&self) -> Instant;

    /// Wall-clock instant: wire timestamps and age comparisons against
    /// store-recorded times.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch; the compact form used by peer
    /// heartbeat records.
    fn epoch_ms(&self) -> u64 {
        self.now_utc().timestamp_millis().max(0) as u64
    }
}

/// Real system clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock default for a fresh [`FakeClock`], in epoch millis.
const FAKE_WALL_START_MS: i64 = 1_000_000;

/// Both faces of a fake instant; advanced together so durations and
/// wire timestamps never drift apart in a test.
struct FakeNow {
    instant: Instant,
    wall: DateTime<Utc>,
}

/// Controllable clock for tests.
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<FakeNow>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(FakeNow {
                instant: Instant::now(),
                wall: Utc.timestamp_millis_opt(FAKE_WALL_START_MS).single().unwrap_or_default(),
            })),
        }
    }

    /// Advance both faces of the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        now.instant += duration;
        now.wall += duration;
    }

    /// Pin the wall clock to an epoch-millisecond instant, e.g. relative
    /// to a sandbox's creation timestamp. The monotonic face is
    /// unaffected.
    pub fn set_wall_ms(&self, epoch_ms: u64) {
        if let Some(wall) = Utc.timestamp_millis_opt(epoch_ms as i64).single() {
            self.now.lock().wall = wall;
        }
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.now.lock().instant
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.now.lock().wall
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
