use std::time::Duration;

use tokio::time::Instant;

use super::state::RotationState;

/// Thresholds that drive switching and restarting
#[derive(Debug, Clone, PartialEq)]
pub struct RotationPolicy {
    /// Switch pools when bans per second exceed this
    pub max_banned_rate_per_second: f64,
    /// Do not evaluate the ban rate before the window is this old
    pub min_window_before_evaluation: Duration,
    /// Restart once the registry has been traversed more often than this
    pub max_cycles_before_restart: u32,
    /// How long to sleep before a restart
    pub restart_cooldown: Duration,
    /// Pause between retries after a transient acquisition error
    pub acquire_retry_delay: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_banned_rate_per_second: 1.0,
            min_window_before_evaluation: Duration::from_secs(60),
            max_cycles_before_restart: 3,
            restart_cooldown: Duration::from_secs(30 * 60),
            acquire_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Why a restart was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// `cycle_count` went past `max_cycles_before_restart`
    CyclesExhausted,
    /// Every pool failed to yield a proxy since the last restart
    AllPoolsUnusable,
}

impl RestartReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartReason::CyclesExhausted => "cycles_exhausted",
            RestartReason::AllPoolsUnusable => "all_pools_unusable",
        }
    }
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bans per whole second, with floor division. A zero-length window is rate 0.
pub fn ban_rate(banned_count: u64, elapsed: Duration) -> u64 {
    match elapsed.as_secs() {
        0 => 0,
        secs => banned_count / secs,
    }
}

/// Whether the active pool is being blocked hard enough to move on
pub fn should_switch(state: &RotationState, policy: &RotationPolicy, now: Instant) -> bool {
    let elapsed = now.saturating_duration_since(state.metrics.window_start);
    if elapsed < policy.min_window_before_evaluation {
        return false;
    }
    ban_rate(state.metrics.banned_count, elapsed) as f64 > policy.max_banned_rate_per_second
}

/// Why the controller must cool down and restart, if it must.
/// Cycle exhaustion is reported ahead of unusable pools.
pub fn restart_reason(
    state: &RotationState,
    policy: &RotationPolicy,
    pool_count: usize,
) -> Option<RestartReason> {
    if state.cycle_count > policy.max_cycles_before_restart {
        return Some(RestartReason::CyclesExhausted);
    }
    if state.unusable_count() >= pool_count {
        return Some(RestartReason::AllPoolsUnusable);
    }
    None
}

/// Whether the controller must cool down and restart
pub fn should_restart(state: &RotationState, policy: &RotationPolicy, pool_count: usize) -> bool {
    restart_reason(state, policy, pool_count).is_some()
}
