//! Adaptive proxy-pool rotation
//!
//! This module decides which upstream pool outbound requests are routed
//! through. It watches the ban rate on the active pool, switches to the
//! next pool when the rate gets too high, and cools down and restarts from
//! the highest-priority pool once every pool has been exhausted.

mod controller;
mod hooks;
mod policy;
mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::RotationController;
pub use hooks::RoutingDecision;
pub use policy::{ban_rate, restart_reason, should_restart, should_switch, RestartReason, RotationPolicy};
pub use state::{RotationMetrics, RotationState};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ProxyEndpoint;

/// Failure reported by a pool when asked for an endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// Infrastructure hiccup (connect/timeout); the same pool is retried
    #[error("transient acquisition error: {0}")]
    Transient(String),

    /// The pool cannot yield an endpoint (empty, quota, auth failure, ...)
    #[error("pool unavailable: {0}")]
    Unavailable(String),
}

impl AcquireError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AcquireError::Transient(_))
    }
}

/// A source of upstream proxies
///
/// Implementations wrap whatever actually supplies the addresses (a static
/// list, a vendor API, a tunnel gateway). The controller only needs to ask
/// for an endpoint and to evict one that got banned or failed.
#[async_trait]
pub trait ProxyPool: Send + Sync {
    /// Human readable pool name, used in logs and snapshots
    fn name(&self) -> &str;

    /// Yield a usable proxy endpoint
    async fn get(&self) -> std::result::Result<ProxyEndpoint, AcquireError>;

    /// Evict an endpoint so it is not handed out again
    async fn remove(&self, endpoint: &ProxyEndpoint);
}
