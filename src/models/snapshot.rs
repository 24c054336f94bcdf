use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the rotation controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationSnapshot {
    /// Index of the active pool (0 = highest priority)
    pub active_index: usize,
    /// Name of the active pool
    pub active_pool: String,
    /// Number of pools in the registry
    pub pool_count: usize,
    /// Bans observed on the active pool in the current window
    pub banned_count: u64,
    /// Requests routed through the active pool in the current window
    pub request_count: u64,
    /// Full traversals of the registry since the last restart
    pub cycle_count: u32,
    /// Pools that failed to yield a proxy since the last restart
    pub unusable_count: usize,
    /// Number of restarts performed so far
    pub restarts: u64,
    /// Fatal transport errors seen so far
    pub fatal_errors: u64,
    /// Wall-clock time the current window started
    pub window_started_at: DateTime<Utc>,
    /// Seconds elapsed in the current window
    pub window_elapsed_secs: u64,
}
