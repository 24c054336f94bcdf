use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use super::ProxyEndpoint;

/// A proxy handed out for one request, tagged with the pool and rotation
/// window it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLease {
    pub pool_index: usize,
    /// Window that was active when the proxy was acquired
    pub window: u64,
    pub endpoint: ProxyEndpoint,
}

/// An outgoing crawl request as seen by the rotation hooks
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Proxy attached by the controller on dispatch
    pub proxy: Option<ProxyLease>,
    /// When set, the host must not drop this request as a duplicate
    pub dont_filter: bool,
    /// How many times this logical request has been reissued
    pub reissue_count: u32,
}

impl CrawlRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            proxy: None,
            dont_filter: false,
            reissue_count: 0,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Replay of the same logical request with a fresh proxy slot.
    pub fn reissue(&self) -> Self {
        let mut next = self.clone();
        next.proxy = None;
        next.dont_filter = true;
        next.reissue_count = self.reissue_count.saturating_add(1);
        next
    }
}

/// A response received by the host crawler
#[derive(Debug, Clone)]
pub struct CrawlResponse {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CrawlResponse {
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
