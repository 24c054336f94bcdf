use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Counters for the currently active pool
#[derive(Debug, Clone)]
pub struct RotationMetrics {
    /// Anti-bot detections since `window_start`
    pub banned_count: u64,
    /// Requests routed through the pool since `window_start`
    pub request_count: u64,
    /// When the pool became active (or was last reset)
    pub window_start: Instant,
    /// Wall-clock twin of `window_start`, for reporting
    pub window_started_at: DateTime<Utc>,
}

impl RotationMetrics {
    pub fn new(now: Instant) -> Self {
        Self {
            banned_count: 0,
            request_count: 0,
            window_start: now,
            window_started_at: Utc::now(),
        }
    }

    pub fn record_request(&mut self) {
        self.request_count = self.request_count.saturating_add(1);
    }

    pub fn record_ban(&mut self) {
        self.banned_count = self.banned_count.saturating_add(1);
    }

    /// Seconds elapsed in the window, truncated
    pub fn elapsed_secs(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.window_start).as_secs()
    }
}

/// Mutable rotation state, owned by the controller
#[derive(Debug, Clone)]
pub struct RotationState {
    /// Index of the active pool, always `< pool_count`
    pub active_index: usize,
    pub metrics: RotationMetrics,
    /// Identifies the current window; bumped on every switch and restart
    pub window: u64,
    /// Full traversals of the registry since the last restart
    pub cycle_count: u32,
    /// Indices of pools that failed to yield a proxy since the last restart
    pub unusable_pools: BTreeSet<usize>,
    /// Bumped on every restart
    pub generation: u64,
    /// Fatal transport errors seen over the controller's lifetime
    pub fatal_errors: u64,
}

impl RotationState {
    pub fn new(now: Instant) -> Self {
        Self {
            active_index: 0,
            metrics: RotationMetrics::new(now),
            window: 0,
            cycle_count: 0,
            unusable_pools: BTreeSet::new(),
            generation: 0,
            fatal_errors: 0,
        }
    }

    /// Advance to the next pool. Returns true when the move wrapped back to
    /// index 0, which counts as one full cycle.
    pub fn switch(&mut self, pool_count: usize, now: Instant) -> bool {
        let wrapped = self.active_index + 1 >= pool_count;
        if wrapped {
            self.active_index = 0;
            self.cycle_count = self.cycle_count.saturating_add(1);
        } else {
            self.active_index += 1;
        }
        self.metrics = RotationMetrics::new(now);
        self.window = self.window.wrapping_add(1);
        wrapped
    }

    /// Reset everything and start over from the highest-priority pool.
    pub fn restart(&mut self, now: Instant) {
        self.active_index = 0;
        self.cycle_count = 0;
        self.unusable_pools.clear();
        self.generation = self.generation.wrapping_add(1);
        self.window = self.window.wrapping_add(1);
        self.metrics = RotationMetrics::new(now);
    }

    /// Record a pool that could not yield an endpoint. A pool is counted
    /// once until the next restart, so the count never exceeds the registry.
    pub fn mark_unusable(&mut self, index: usize) -> bool {
        self.unusable_pools.insert(index)
    }

    /// Number of distinct pools marked unusable since the last restart
    pub fn unusable_count(&self) -> usize {
        self.unusable_pools.len()
    }
}
