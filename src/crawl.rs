//! Host-crawler driver
//!
//! Runs URLs through dispatch, fetch and the rotation hooks, following
//! reissues until the request is accepted, given up on, or fails fatally.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::error::RotaError;
use crate::fetch::Fetch;
use crate::models::{CrawlRequest, CrawlResponse, TransportError};
use crate::rotation::{RotationController, RoutingDecision};

/// Predicate deciding whether a response was served by an anti-bot wall
pub type BanPredicate = Arc<dyn Fn(&CrawlResponse) -> bool + Send + Sync>;

/// Treat an empty body, or a body containing any of `markers`, as banned.
pub fn marker_predicate(markers: Vec<String>) -> BanPredicate {
    Arc::new(move |response: &CrawlResponse| {
        if response.body.is_empty() {
            return true;
        }
        let text = response.text();
        markers.iter().any(|m| text.contains(m.as_str()))
    })
}

/// Crawl driver configuration
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Give up on a URL after this many reissues
    pub max_reissues: u32,
    /// URLs processed concurrently
    pub concurrency: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_reissues: 5,
            concurrency: 8,
        }
    }
}

/// How a single URL ended
#[derive(Debug)]
pub enum CrawlOutcome {
    Accepted(CrawlResponse),
    /// No pool could supply a proxy, or the crawl was cancelled
    Skipped(RotaError),
    /// A fatal transport error came back from the hooks
    Failed(TransportError),
    /// Reissued more than `max_reissues` times
    GaveUp,
}

/// Totals over a crawl run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub accepted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub gave_up: usize,
}

impl CrawlSummary {
    fn record(&mut self, outcome: &CrawlOutcome) {
        match outcome {
            CrawlOutcome::Accepted(_) => self.accepted += 1,
            CrawlOutcome::Skipped(_) => self.skipped += 1,
            CrawlOutcome::Failed(_) => self.failed += 1,
            CrawlOutcome::GaveUp => self.gave_up += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.accepted + self.skipped + self.failed + self.gave_up
    }
}

/// Drives requests through the rotation controller
pub struct Crawler {
    controller: Arc<RotationController>,
    fetcher: Arc<dyn Fetch>,
    is_banned: BanPredicate,
    config: CrawlerConfig,
    cancel: CancellationToken,
}

impl Crawler {
    pub fn new(
        controller: Arc<RotationController>,
        fetcher: Arc<dyn Fetch>,
        is_banned: BanPredicate,
        config: CrawlerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            controller,
            fetcher,
            is_banned,
            config,
            cancel,
        }
    }

    /// Crawl all `urls` with bounded concurrency
    pub async fn run(&self, urls: Vec<Url>) -> CrawlSummary {
        info!(
            "Crawling {} URLs (concurrency: {}, max reissues: {})",
            urls.len(),
            self.config.concurrency,
            self.config.max_reissues
        );

        let summary = futures::stream::iter(urls)
            .map(|url| self.crawl_one(CrawlRequest::get(url)))
            .buffer_unordered(self.config.concurrency.max(1))
            .fold(CrawlSummary::default(), |mut summary, outcome| async move {
                summary.record(&outcome);
                summary
            })
            .await;

        info!(
            accepted = summary.accepted,
            skipped = summary.skipped,
            failed = summary.failed,
            gave_up = summary.gave_up,
            "Crawl complete"
        );
        summary
    }

    /// Follow one logical request until it settles
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn crawl_one(&self, request: CrawlRequest) -> CrawlOutcome {
        let mut request = request;
        loop {
            if let Err(e) = self
                .controller
                .on_request_dispatched(&mut request, &self.cancel)
                .await
            {
                warn!("Skipping {}: {}", request.url, e);
                return CrawlOutcome::Skipped(e);
            }

            let decision = match self.fetcher.fetch(&request).await {
                Ok(response) => {
                    self.controller
                        .on_response_received(&request, response, &*self.is_banned)
                        .await
                }
                Err(exception) => {
                    match self
                        .controller
                        .on_transport_exception(&request, exception)
                        .await
                    {
                        Ok(decision) => decision,
                        Err(fatal) => {
                            error!("Giving up on {}: {}", request.url, fatal);
                            return CrawlOutcome::Failed(fatal);
                        }
                    }
                }
            };

            match decision {
                RoutingDecision::Accept(response) => return CrawlOutcome::Accepted(response),
                RoutingDecision::Reissue(next) => {
                    if next.reissue_count > self.config.max_reissues {
                        warn!(
                            "Giving up on {} after {} reissues",
                            next.url, self.config.max_reissues
                        );
                        return CrawlOutcome::GaveUp;
                    }
                    request = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use http::StatusCode;
    use parking_lot::Mutex;

    use crate::models::ProxyEndpoint;
    use crate::rotation::testing::{endpoint, FakePool};
    use crate::rotation::{ProxyPool, RotationPolicy};

    /// Fetcher that replays scripted results and records the proxies it saw
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<&'static str, TransportError>>>,
        seen: Mutex<Vec<Option<ProxyEndpoint>>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<&'static str, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Fetch for ScriptedFetcher {
        async fn fetch(&self, request: &CrawlRequest) -> Result<CrawlResponse, TransportError> {
            self.seen
                .lock()
                .push(request.proxy.as_ref().map(|l| l.endpoint.clone()));
            let next = self.script.lock().pop_front().unwrap_or(Ok("default page"));
            next.map(|body| CrawlResponse::new(request.url.clone(), StatusCode::OK, body))
        }
    }

    fn crawler(
        pools: &[Arc<FakePool>],
        fetcher: Arc<ScriptedFetcher>,
        max_reissues: u32,
    ) -> (Crawler, Arc<RotationController>) {
        let pools = pools
            .iter()
            .map(|p| p.clone() as Arc<dyn ProxyPool>)
            .collect();
        let controller = Arc::new(RotationController::new(pools, RotationPolicy::default()).unwrap());
        let crawler = Crawler::new(
            controller.clone(),
            fetcher,
            marker_predicate(vec!["login.example".to_string()]),
            CrawlerConfig {
                max_reissues,
                concurrency: 2,
            },
            CancellationToken::new(),
        );
        (crawler, controller)
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("http://shop.example{}", path)).unwrap()
    }

    #[test]
    fn test_marker_predicate() {
        let predicate = marker_predicate(vec!["FAIL_SYS_USER_VALIDATE".to_string()]);
        let page = |body: &str| CrawlResponse::new(url("/"), StatusCode::OK, body.to_string());

        assert!(predicate(&page("")));
        assert!(predicate(&page("{\"ret\":[\"FAIL_SYS_USER_VALIDATE\"]}")));
        assert!(!predicate(&page("<html>item</html>")));
    }

    #[tokio::test]
    async fn test_banned_then_accepted() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok("redirecting to login.example"),
            Ok("<html>item</html>"),
        ]));
        let (crawler, controller) = crawler(&[pool.clone()], fetcher.clone(), 3);

        match crawler.crawl_one(CrawlRequest::get(url("/item/1"))).await {
            CrawlOutcome::Accepted(resp) => assert_eq!(resp.text(), "<html>item</html>"),
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(pool.removed(), vec![endpoint("10.0.0.1")]);
        assert_eq!(fetcher.seen.lock().len(), 2);
        assert!(fetcher.seen.lock().iter().all(|p| p.is_some()));
        assert_eq!(controller.snapshot().banned_count, 1);
    }

    #[tokio::test]
    async fn test_transient_error_then_accepted() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Err(TransportError::timeout("read timed out")),
            Ok("<html>item</html>"),
        ]));
        let (crawler, _) = crawler(&[pool], fetcher, 3);

        let outcome = crawler.crawl_one(CrawlRequest::get(url("/item/2"))).await;
        assert!(matches!(outcome, CrawlOutcome::Accepted(_)));
    }

    #[tokio::test]
    async fn test_fatal_error_fails_request() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Err(TransportError::other(
            "parse-error",
            "invalid header",
        ))]));
        let (crawler, controller) = crawler(&[pool], fetcher, 3);

        match crawler.crawl_one(CrawlRequest::get(url("/item/3"))).await {
            CrawlOutcome::Failed(err) => assert_eq!(err.kind.as_str(), "parse-error"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(controller.snapshot().fatal_errors, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_reissues() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(""), Ok(""), Ok(""), Ok("")]));
        let (crawler, _) = crawler(&[pool], fetcher.clone(), 2);

        let outcome = crawler.crawl_one(CrawlRequest::get(url("/item/4"))).await;
        assert!(matches!(outcome, CrawlOutcome::GaveUp));
        // First attempt plus two reissues.
        assert_eq!(fetcher.seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_pool_skips() {
        let pool = Arc::new(FakePool::unavailable("primary", "no endpoints"));
        let fetcher = Arc::new(ScriptedFetcher::new(Vec::new()));
        let (crawler, _) = crawler(&[pool], fetcher.clone(), 2);

        let outcome = crawler.crawl_one(CrawlRequest::get(url("/item/5"))).await;
        match outcome {
            CrawlOutcome::Skipped(err) => assert!(err.is_pool_exhausted()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(fetcher.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_run_summarises_outcomes() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Err(TransportError::other("parse-error", "bad")),
        ]));
        let (crawler, _) = crawler(&[pool], fetcher, 2);

        let summary = crawler
            .run(vec![url("/a"), url("/b"), url("/c")])
            .await;
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.accepted, 2);
    }
}
