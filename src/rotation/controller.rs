//! Rotation controller state machine
//!
//! `ACTIVE` is both the start and the steady state. Every acquisition first
//! checks whether a restart is due (enter `COOLING_DOWN`, sleep, restart from
//! pool 0), then whether the ban rate calls for a switch, and only then asks
//! the active pool for an endpoint.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::policy::{ban_rate, restart_reason, should_switch, RestartReason, RotationPolicy};
use super::state::{RotationMetrics, RotationState};
use super::{AcquireError, ProxyPool};
use crate::error::{Result, RotaError};
use crate::models::{ProxyLease, RotationSnapshot};

/// What the next acquisition attempt has to do
enum Step {
    CoolDown {
        generation: u64,
        reason: RestartReason,
    },
    Acquire {
        index: usize,
        generation: u64,
        window: u64,
    },
}

/// Routes requests through a priority-ordered list of proxy pools
pub struct RotationController {
    pools: Vec<Arc<dyn ProxyPool>>,
    policy: RotationPolicy,
    state: Mutex<RotationState>,
    /// Held for the whole cooldown so overlapping callers never sleep twice
    cooldown_gate: tokio::sync::Mutex<()>,
}

impl RotationController {
    /// Create a controller over `pools`, index 0 being the preferred pool.
    pub fn new(pools: Vec<Arc<dyn ProxyPool>>, policy: RotationPolicy) -> Result<Self> {
        if pools.is_empty() {
            return Err(RotaError::NoPools);
        }

        Ok(Self {
            pools,
            policy,
            state: Mutex::new(RotationState::new(Instant::now())),
            cooldown_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    pub fn pool(&self, index: usize) -> Option<&Arc<dyn ProxyPool>> {
        self.pools.get(index)
    }

    /// Consistent copy of the current rotation state
    pub fn snapshot(&self) -> RotationSnapshot {
        let now = Instant::now();
        let state = self.state.lock();
        RotationSnapshot {
            active_index: state.active_index,
            active_pool: self.pools[state.active_index].name().to_string(),
            pool_count: self.pools.len(),
            banned_count: state.metrics.banned_count,
            request_count: state.metrics.request_count,
            cycle_count: state.cycle_count,
            unusable_count: state.unusable_count(),
            restarts: state.generation,
            fatal_errors: state.fatal_errors,
            window_started_at: state.metrics.window_started_at,
            window_elapsed_secs: state.metrics.elapsed_secs(now),
        }
    }

    /// Get a proxy from the active pool.
    ///
    /// Transient pool errors are retried indefinitely after
    /// `acquire_retry_delay`; the loop ends only on success, on a
    /// non-transient error (`PoolExhausted`) or when `cancel` fires
    /// (`Cancelled`). Wrap the call in a timeout to impose a deadline.
    #[instrument(skip(self, cancel))]
    pub async fn acquire_proxy(&self, cancel: &CancellationToken) -> Result<ProxyLease> {
        loop {
            if cancel.is_cancelled() {
                return Err(RotaError::Cancelled);
            }

            let (index, generation, window) = match self.next_step() {
                Step::CoolDown { generation, reason } => {
                    self.cool_down(generation, reason, cancel).await?;
                    continue;
                }
                Step::Acquire {
                    index,
                    generation,
                    window,
                } => (index, generation, window),
            };

            let pool = &self.pools[index];
            match pool.get().await {
                Ok(endpoint) => {
                    self.charge(Some(window), RotationMetrics::record_request);
                    debug!(pool = pool.name(), proxy = %endpoint, "Acquired proxy");
                    return Ok(ProxyLease {
                        pool_index: index,
                        window,
                        endpoint,
                    });
                }
                Err(AcquireError::Transient(reason)) => {
                    warn!(
                        pool = pool.name(),
                        reason = %reason,
                        "Transient error getting proxy, retrying in {:?}",
                        self.policy.acquire_retry_delay
                    );
                    self.pause(self.policy.acquire_retry_delay, cancel).await?;
                }
                Err(AcquireError::Unavailable(reason)) => {
                    error!(pool = pool.name(), reason = %reason, "Get proxy exception");
                    self.mark_unusable(index, generation, window);
                    return Err(RotaError::PoolExhausted {
                        pool: pool.name().to_string(),
                        reason,
                    });
                }
            }
        }
    }

    /// Decide restart-then-switch under one lock and pick the pool to ask.
    fn next_step(&self) -> Step {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(reason) = restart_reason(&state, &self.policy, self.pools.len()) {
            return Step::CoolDown {
                generation: state.generation,
                reason,
            };
        }

        if should_switch(&state, &self.policy, now) {
            let elapsed = now.saturating_duration_since(state.metrics.window_start);
            info!(
                from = self.pools[state.active_index].name(),
                requests = state.metrics.request_count,
                elapsed_secs = elapsed.as_secs(),
                banned = state.metrics.banned_count,
                rate = ban_rate(state.metrics.banned_count, elapsed),
                "Switching proxy pool"
            );
            state.switch(self.pools.len(), now);
        }

        Step::Acquire {
            index: state.active_index,
            generation: state.generation,
            window: state.window,
        }
    }

    /// Count the pool as unusable and move on to the next one. Callers that
    /// failed on the same pool concurrently count it once and switch once.
    fn mark_unusable(&self, index: usize, generation: u64, window: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.mark_unusable(index);
        if state.window == window {
            state.switch(self.pools.len(), Instant::now());
        }
    }

    /// Sleep `restart_cooldown`, then restart. Only one caller sleeps per
    /// restart; the others wait on the gate and re-evaluate afterwards.
    async fn cool_down(
        &self,
        generation: u64,
        reason: RestartReason,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _gate = tokio::select! {
            gate = self.cooldown_gate.lock() => gate,
            _ = cancel.cancelled() => return Err(RotaError::Cancelled),
        };

        let current = self.state.lock().generation;
        if current != generation {
            debug!("Restart already performed by another caller");
            return Ok(());
        }

        let cooldown_mins = self.policy.restart_cooldown.as_secs() / 60;
        match reason {
            RestartReason::CyclesExhausted => warn!(
                cycles = self.state.lock().cycle_count,
                "Proxy pools tried too many rounds, sleeping {} minutes before restart",
                cooldown_mins
            ),
            RestartReason::AllPoolsUnusable => error!(
                "All proxy pools are unusable, sleeping {} minutes before restart",
                cooldown_mins
            ),
        }

        self.pause(self.policy.restart_cooldown, cancel).await?;

        let mut state = self.state.lock();
        state.restart(Instant::now());
        info!(
            generation = state.generation,
            "Proxy pools reset at {}",
            state.metrics.window_started_at
        );
        Ok(())
    }

    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = sleep(duration) => Ok(()),
            _ = cancel.cancelled() => Err(RotaError::Cancelled),
        }
    }

    /// Apply `record` to the active window, unless `window` names one that
    /// has since been replaced. `None` means the current window.
    fn charge(&self, window: Option<u64>, record: impl FnOnce(&mut RotationMetrics)) -> bool {
        let mut state = self.state.lock();
        if window.is_some_and(|w| w != state.window) {
            return false;
        }
        record(&mut state.metrics);
        true
    }

    pub(super) fn record_ban(&self, lease: Option<&ProxyLease>) -> bool {
        self.charge(lease.map(|l| l.window), RotationMetrics::record_ban)
    }

    pub(super) fn record_reissue(&self, lease: Option<&ProxyLease>) -> bool {
        self.charge(lease.map(|l| l.window), RotationMetrics::record_request)
    }

    pub(super) fn record_fatal(&self) {
        let mut state = self.state.lock();
        state.fatal_errors = state.fatal_errors.saturating_add(1);
    }

    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut RotationState) -> R) -> R {
        f(&mut self.state.lock())
    }
}
