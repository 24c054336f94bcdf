//! Request/response/exception hooks called by the host crawler

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::RotationController;
use crate::error::Result;
use crate::models::{CrawlRequest, CrawlResponse, ProxyLease, TransportError};

/// What the host should do with a response or failure
#[derive(Debug)]
pub enum RoutingDecision {
    /// Hand the response on to the spider
    Accept(CrawlResponse),
    /// Schedule this replay of the request instead
    Reissue(CrawlRequest),
}

impl RoutingDecision {
    pub fn is_reissue(&self) -> bool {
        matches!(self, RoutingDecision::Reissue(_))
    }
}

impl RotationController {
    /// Attach a freshly acquired proxy to an outgoing request.
    #[instrument(skip(self, request, cancel), fields(url = %request.url))]
    pub async fn on_request_dispatched(
        &self,
        request: &mut CrawlRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lease = self.acquire_proxy(cancel).await?;
        debug!("Proxy {} over {}", request.url, lease.endpoint);
        request.proxy = Some(lease);
        Ok(())
    }

    /// Check a response for anti-bot blocking.
    ///
    /// A banned response counts against the window its proxy was acquired
    /// in (if that window is still active), its proxy is evicted and a
    /// replay of the request is returned instead.
    #[instrument(skip_all, fields(url = %request.url))]
    pub async fn on_response_received<F>(
        &self,
        request: &CrawlRequest,
        response: CrawlResponse,
        is_banned: &F,
    ) -> RoutingDecision
    where
        F: Fn(&CrawlResponse) -> bool + ?Sized,
    {
        if !is_banned(&response) {
            return RoutingDecision::Accept(response);
        }

        info!("Banned request: {}. Replacing the proxy", request.url);
        if !self.record_ban(request.proxy.as_ref()) {
            debug!("Ban came from a previous window, not counted");
        }
        RoutingDecision::Reissue(self.reissue(request).await)
    }

    /// Handle a transport failure.
    ///
    /// The proxy is always evicted first. Timeouts, refused connections and
    /// tunnel failures yield a replay; every other kind is counted and handed
    /// back unchanged as `Err`.
    #[instrument(skip_all, fields(url = %request.url, kind = %exception.kind))]
    pub async fn on_transport_exception(
        &self,
        request: &CrawlRequest,
        exception: TransportError,
    ) -> std::result::Result<RoutingDecision, TransportError> {
        let next = self.reissue(request).await;

        if !exception.is_transient() {
            self.record_fatal();
            error!(error = %exception, "Fatal transport error for {}", request.url);
            return Err(exception);
        }

        warn!(error = %exception, "Transport error for {}, reissuing", request.url);
        Ok(RoutingDecision::Reissue(next))
    }

    /// Remove a proxy from the pool that handed it out.
    pub async fn evict(&self, lease: &ProxyLease) {
        match self.pool(lease.pool_index) {
            Some(pool) => {
                debug!(pool = pool.name(), proxy = %lease.endpoint, "Evicting proxy");
                pool.remove(&lease.endpoint).await;
            }
            None => warn!(
                pool_index = lease.pool_index,
                "Cannot evict proxy from unknown pool"
            ),
        }
    }

    /// Evict the used proxy, then build the replay.
    async fn reissue(&self, request: &CrawlRequest) -> CrawlRequest {
        if let Some(lease) = &request.proxy {
            self.evict(lease).await;
        }
        self.record_reissue(request.proxy.as_ref());
        request.reissue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use http::StatusCode;
    use tokio_test::assert_ok;
    use url::Url;

    use crate::models::TransportErrorKind;
    use crate::rotation::testing::{endpoint, FakePool};
    use crate::rotation::{ProxyPool, RotationPolicy};

    fn setup(pools: &[Arc<FakePool>]) -> RotationController {
        let pools = pools
            .iter()
            .map(|p| p.clone() as Arc<dyn ProxyPool>)
            .collect();
        let policy = RotationPolicy {
            min_window_before_evaluation: Duration::ZERO,
            ..RotationPolicy::default()
        };
        RotationController::new(pools, policy).unwrap()
    }

    fn request() -> CrawlRequest {
        CrawlRequest::get(Url::parse("http://shop.example/item/42").unwrap())
    }

    fn response(body: &str) -> CrawlResponse {
        CrawlResponse::new(
            Url::parse("http://shop.example/item/42").unwrap(),
            StatusCode::OK,
            body.to_string(),
        )
    }

    fn empty_body(response: &CrawlResponse) -> bool {
        response.body.is_empty()
    }

    #[tokio::test]
    async fn test_dispatch_attaches_proxy() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let controller = setup(&[pool]);
        let cancel = CancellationToken::new();

        let mut req = request();
        assert_ok!(controller.on_request_dispatched(&mut req, &cancel).await);

        let lease = req.proxy.expect("proxy attached");
        assert_eq!(lease.pool_index, 0);
        assert_eq!(lease.endpoint, endpoint("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_dispatch_propagates_pool_exhausted() {
        let pool = Arc::new(FakePool::unavailable("primary", "empty"));
        let controller = setup(&[pool]);
        let cancel = CancellationToken::new();

        let mut req = request();
        let err = controller
            .on_request_dispatched(&mut req, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_pool_exhausted());
        assert!(req.proxy.is_none());
    }

    #[tokio::test]
    async fn test_clean_response_is_accepted() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let controller = setup(&[pool.clone()]);
        let cancel = CancellationToken::new();

        let mut req = request();
        controller.on_request_dispatched(&mut req, &cancel).await.unwrap();

        let decision = controller
            .on_response_received(&req, response("<html>ok</html>"), &empty_body)
            .await;
        match decision {
            RoutingDecision::Accept(resp) => assert_eq!(resp.text(), "<html>ok</html>"),
            other => panic!("unexpected decision: {other:?}"),
        }

        assert!(pool.removed().is_empty());
        assert_eq!(controller.snapshot().banned_count, 0);
        assert_eq!(controller.snapshot().request_count, 1);
    }

    #[tokio::test]
    async fn test_banned_response_evicts_and_reissues() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let controller = setup(&[pool.clone()]);
        let cancel = CancellationToken::new();

        let mut req = request();
        controller.on_request_dispatched(&mut req, &cancel).await.unwrap();

        let decision = controller
            .on_response_received(&req, response(""), &empty_body)
            .await;
        let next = match decision {
            RoutingDecision::Reissue(next) => next,
            other => panic!("unexpected decision: {other:?}"),
        };

        assert!(next.dont_filter);
        assert!(next.proxy.is_none());
        assert_eq!(next.url, req.url);
        assert_eq!(pool.removed(), vec![endpoint("10.0.0.1")]);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.banned_count, 1);
        assert_eq!(snapshot.request_count, 2);
    }

    #[tokio::test]
    async fn test_ban_predicate_sees_body_text() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let controller = setup(&[pool]);
        let marker = |resp: &CrawlResponse| resp.text().contains("FAIL_SYS_USER_VALIDATE");

        let decision = controller
            .on_response_received(&request(), response("rgv587_flag: FAIL_SYS_USER_VALIDATE"), &marker)
            .await;
        assert!(decision.is_reissue());

        let decision = controller
            .on_response_received(&request(), response("welcome"), &marker)
            .await;
        assert!(!decision.is_reissue());
    }

    #[tokio::test]
    async fn test_timeout_reissues_with_eviction() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let controller = setup(&[pool.clone()]);
        let cancel = CancellationToken::new();

        let mut req = request();
        controller.on_request_dispatched(&mut req, &cancel).await.unwrap();

        let decision = controller
            .on_transport_exception(&req, TransportError::timeout("read timed out"))
            .await
            .unwrap();
        match decision {
            RoutingDecision::Reissue(next) => {
                assert!(next.dont_filter);
                assert!(next.proxy.is_none());
            }
            other => panic!("unexpected decision: {other:?}"),
        }
        assert_eq!(pool.removed(), vec![endpoint("10.0.0.1")]);
        assert_eq!(controller.snapshot().fatal_errors, 0);
    }

    #[tokio::test]
    async fn test_unknown_exception_is_returned_unchanged() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let controller = setup(&[pool.clone()]);
        let cancel = CancellationToken::new();

        let mut req = request();
        controller.on_request_dispatched(&mut req, &cancel).await.unwrap();

        let exception = TransportError::other("parse-error", "invalid chunk size");
        let err = controller
            .on_transport_exception(&req, exception.clone())
            .await
            .unwrap_err();

        assert_eq!(err, exception);
        assert_eq!(err.kind, TransportErrorKind::Other("parse-error".into()));
        // Evicted before the error went back up.
        assert_eq!(pool.removed(), vec![endpoint("10.0.0.1")]);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.fatal_errors, 1);
        assert_eq!(snapshot.request_count, 2);
    }

    #[tokio::test]
    async fn test_eviction_targets_originating_pool() {
        let primary = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let backup = Arc::new(FakePool::healthy("backup", "10.0.0.2"));
        let controller = setup(&[primary.clone(), backup.clone()]);
        let cancel = CancellationToken::new();

        let mut req = request();
        controller.on_request_dispatched(&mut req, &cancel).await.unwrap();

        // The active pool changes while the request is in flight.
        controller.with_state(|s| s.active_index = 1);

        controller
            .on_transport_exception(&req, TransportError::connection_refused("refused"))
            .await
            .unwrap();

        assert_eq!(primary.removed(), vec![endpoint("10.0.0.1")]);
        assert!(backup.removed().is_empty());
    }

    #[tokio::test]
    async fn test_reissue_without_proxy_skips_eviction() {
        let pool = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let controller = setup(&[pool.clone()]);

        let decision = controller
            .on_transport_exception(&request(), TransportError::tunnel("CONNECT rejected"))
            .await
            .unwrap();
        assert!(decision.is_reissue());
        assert!(pool.removed().is_empty());
    }

    #[tokio::test]
    async fn test_ban_from_previous_window_is_not_charged() {
        let primary = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let backup = Arc::new(FakePool::healthy("backup", "10.0.0.2"));
        let controller = setup(&[primary.clone(), backup.clone()]);
        let cancel = CancellationToken::new();

        let mut req = request();
        controller.on_request_dispatched(&mut req, &cancel).await.unwrap();
        assert_eq!(req.proxy.as_ref().map(|l| l.pool_index), Some(0));

        // The controller moves on to the backup while the request is in flight.
        controller.with_state(|s| s.switch(2, tokio::time::Instant::now()));

        let decision = controller
            .on_response_received(&req, response(""), &empty_body)
            .await;
        assert!(decision.is_reissue());

        // Still evicted from the pool that handed it out.
        assert_eq!(primary.removed(), vec![endpoint("10.0.0.1")]);
        assert!(backup.removed().is_empty());

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.active_index, 1);
        assert_eq!(snapshot.banned_count, 0);
        assert_eq!(snapshot.request_count, 0);
    }

    #[tokio::test]
    async fn test_stale_transport_error_is_not_charged() {
        let primary = Arc::new(FakePool::healthy("primary", "10.0.0.1"));
        let backup = Arc::new(FakePool::healthy("backup", "10.0.0.2"));
        let controller = setup(&[primary.clone(), backup]);
        let cancel = CancellationToken::new();

        let mut req = request();
        controller.on_request_dispatched(&mut req, &cancel).await.unwrap();
        controller.with_state(|s| s.switch(2, tokio::time::Instant::now()));

        controller
            .on_transport_exception(&req, TransportError::timeout("read timed out"))
            .await
            .unwrap();

        assert_eq!(primary.removed(), vec![endpoint("10.0.0.1")]);
        assert_eq!(controller.snapshot().request_count, 0);
    }
}
