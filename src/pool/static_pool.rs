//! In-memory proxy pool backed by a fixed list of endpoints

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::debug;

use super::SelectionStrategy;
use crate::models::ProxyEndpoint;
use crate::rotation::{AcquireError, ProxyPool};

/// Hands out endpoints from a list, evicting the ones that get banned
///
/// Round-robin selection uses an atomic cursor so `get` never takes the
/// write lock.
pub struct StaticPool {
    name: String,
    endpoints: RwLock<Vec<ProxyEndpoint>>,
    index: AtomicUsize,
    strategy: SelectionStrategy,
}

impl StaticPool {
    pub fn new(
        name: impl Into<String>,
        endpoints: Vec<ProxyEndpoint>,
        strategy: SelectionStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            endpoints: RwLock::new(endpoints),
            index: AtomicUsize::new(0),
            strategy,
        }
    }

    pub fn available_count(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Replace the endpoint list
    pub fn refresh(&self, endpoints: Vec<ProxyEndpoint>) {
        let mut guard = self.endpoints.write();
        *guard = endpoints;
        // Reset index on refresh to avoid skipping entries of the new list
        self.index.store(0, Ordering::Relaxed);
    }

    fn pick(&self) -> Result<ProxyEndpoint, AcquireError> {
        let endpoints = self.endpoints.read();

        if endpoints.is_empty() {
            return Err(AcquireError::Unavailable(format!(
                "pool {} has no endpoints left",
                self.name
            )));
        }

        let picked = match self.strategy {
            SelectionStrategy::RoundRobin => {
                let idx = self.index.fetch_add(1, Ordering::Relaxed) % endpoints.len();
                endpoints.get(idx)
            }
            SelectionStrategy::Random => endpoints.choose(&mut rand::thread_rng()),
        };

        picked
            .cloned()
            .ok_or_else(|| AcquireError::Unavailable(format!("pool {} is empty", self.name)))
    }
}

#[async_trait]
impl ProxyPool for StaticPool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self) -> Result<ProxyEndpoint, AcquireError> {
        self.pick()
    }

    async fn remove(&self, endpoint: &ProxyEndpoint) {
        let mut endpoints = self.endpoints.write();
        let before = endpoints.len();
        endpoints.retain(|e| e != endpoint);
        debug!(
            pool = %self.name,
            proxy = %endpoint,
            removed = before - endpoints.len(),
            remaining = endpoints.len(),
            "Removed proxy from pool"
        );
    }
}
