//! Scripted pool used by the rotation and crawl tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AcquireError, ProxyPool};
use crate::models::{ProxyEndpoint, ProxyProtocol};

pub(crate) fn endpoint(host: &str) -> ProxyEndpoint {
    ProxyEndpoint::new(ProxyProtocol::Http, host, 8080)
}

/// Pool that replays a script of results, then repeats a fallback forever
pub(crate) struct FakePool {
    name: String,
    script: Mutex<VecDeque<Result<ProxyEndpoint, AcquireError>>>,
    fallback: Result<ProxyEndpoint, AcquireError>,
    delay: Option<Duration>,
    gets: AtomicUsize,
    removed: Mutex<Vec<ProxyEndpoint>>,
}

impl FakePool {
    pub(crate) fn scripted(
        name: &str,
        script: Vec<Result<ProxyEndpoint, AcquireError>>,
        fallback: Result<ProxyEndpoint, AcquireError>,
    ) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            fallback,
            delay: None,
            gets: AtomicUsize::new(0),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn healthy(name: &str, host: &str) -> Self {
        Self::scripted(name, Vec::new(), Ok(endpoint(host)))
    }

    pub(crate) fn unavailable(name: &str, reason: &str) -> Self {
        Self::scripted(name, Vec::new(), Err(AcquireError::Unavailable(reason.to_string())))
    }

    /// Sleep for `delay` inside every `get` before answering
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn removed(&self) -> Vec<ProxyEndpoint> {
        self.removed.lock().clone()
    }
}

#[async_trait]
impl ProxyPool for FakePool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self) -> Result<ProxyEndpoint, AcquireError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    async fn remove(&self, endpoint: &ProxyEndpoint) {
        self.removed.lock().push(endpoint.clone());
    }
}
