//! Minimal HTTP fetcher that sends requests through an upstream proxy
//!
//! Failures are mapped onto [`TransportErrorKind`] so the rotation hooks can
//! tell a dead proxy from a broken response.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::header::{HOST, PROXY_AUTHORIZATION};
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::models::{CrawlRequest, CrawlResponse, TransportError};

/// Something that can execute a crawl request through its attached proxy
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &CrawlRequest) -> Result<CrawlResponse, TransportError>;
}

/// Configuration for the HTTP fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for connecting to the upstream proxy
    pub connect_timeout: Duration,
    /// Timeout for the request/response exchange
    pub request_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP/1.1 fetcher speaking absolute-form requests to an HTTP proxy
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    config: FetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self { config }
    }

    fn build_request(&self, request: &CrawlRequest) -> Result<Request<Full<bytes::Bytes>>, TransportError> {
        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(request.url.as_str());

        // Copy headers, except hop-by-hop headers
        for (name, value) in &request.headers {
            if !is_hop_by_hop_header(name.as_str()) {
                builder = builder.header(name, value);
            }
        }

        if !request.headers.contains_key(HOST) {
            if let Some(host) = request.url.host_str() {
                let host = match request.url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
                builder = builder.header(HOST, host);
            }
        }

        if let Some(lease) = &request.proxy {
            if let (Some(username), Some(password)) =
                (&lease.endpoint.username, &lease.endpoint.password)
            {
                let credentials = format!("{}:{}", username, password);
                let encoded =
                    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, credentials);
                builder = builder.header(PROXY_AUTHORIZATION, format!("Basic {}", encoded));
            }
        }

        builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| TransportError::other("invalid-request", e.to_string()))
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn fetch(&self, request: &CrawlRequest) -> Result<CrawlResponse, TransportError> {
        let lease = request
            .proxy
            .as_ref()
            .ok_or_else(|| TransportError::other("no-proxy", "request has no proxy attached"))?;
        let endpoint = &lease.endpoint;

        if request.url.scheme() != "http" {
            return Err(TransportError::other(
                "unsupported-scheme",
                format!("cannot fetch {} through a plain proxy", request.url.scheme()),
            ));
        }
        if !endpoint.protocol.is_http() {
            return Err(TransportError::other(
                "unsupported-proxy",
                format!("{} proxies are not supported", endpoint.protocol),
            ));
        }

        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(endpoint.address()),
        )
        .await
        .map_err(|_| TransportError::timeout(format!("connect to {} timed out", endpoint)))?
        .map_err(classify_io_error)?;

        let outgoing = self.build_request(request)?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TransportError::tunnel(format!("handshake with {} failed: {}", endpoint, e)))?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection ended: {}", e);
            }
        });

        let response = timeout(self.config.request_timeout, sender.send_request(outgoing))
            .await
            .map_err(|_| TransportError::timeout(format!("request through {} timed out", endpoint)))?
            .map_err(classify_hyper_error)?;

        let (parts, body) = response.into_parts();
        let body = timeout(self.config.request_timeout, body.collect())
            .await
            .map_err(|_| TransportError::timeout("reading response body timed out"))?
            .map_err(classify_hyper_error)?
            .to_bytes();

        debug!(status = %parts.status, bytes = body.len(), "Response received");

        Ok(CrawlResponse {
            url: request.url.clone(),
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

fn classify_io_error(err: std::io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::TimedOut => TransportError::timeout(err.to_string()),
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrNotAvailable => TransportError::connection_refused(err.to_string()),
        _ => TransportError::other("io-error", err.to_string()),
    }
}

fn classify_hyper_error(err: hyper::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(err.to_string())
    } else if err.is_parse() {
        TransportError::other("parse-error", err.to_string())
    } else if err.is_closed() || err.is_incomplete_message() {
        TransportError::connection_refused(err.to_string())
    } else {
        TransportError::other("http-error", err.to_string())
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
