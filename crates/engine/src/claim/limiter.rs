// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token bucket gating create-on-no-stock.
//!
//! Refusal surfaces as a retriable no-stock error so the pool fill-up
//! controller gets a chance to react before this process floods the
//! store with creates.

use parking_lot::Mutex;
use std::time::Instant;

use sp_core::Clock;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct CreateLimiter<C: Clock> {
    clock: C,
    rate_per_sec: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl<C: Clock> CreateLimiter<C> {
    pub fn new(clock: C, rate_per_sec: f64, burst: f64) -> Self {
        let now = clock.now();
        Self {
            clock,
            rate_per_sec,
            burst,
            bucket: Mutex::new(Bucket { tokens: burst, last_refill: now }),
        }
    }

    /// Take one token if available.
    pub fn try_take(&self) -> bool {
        let now = self.clock.now();
        let mut bucket = self.bucket.lock();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_core::FakeClock;
    use std::time::Duration;

    #[test]
    fn burst_then_refusal_then_refill() {
        let clock = FakeClock::new();
        let limiter = CreateLimiter::new(clock.clone(), 1.0, 2.0);

        assert!(limiter.try_take());
        assert!(limiter.try_take());
        assert!(!limiter.try_take());

        clock.advance(Duration::from_secs(1));
        assert!(limiter.try_take());
        assert!(!limiter.try_take());
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let clock = FakeClock::new();
        let limiter = CreateLimiter::new(clock.clone(), 10.0, 3.0);
        clock.advance(Duration::from_secs(60));

        let mut granted = 0;
        while limiter.try_take() {
            granted += 1;
        }
        assert_eq!(granted, 3);
    }
}
