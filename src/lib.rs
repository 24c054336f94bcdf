//! Poolrota - Adaptive Proxy Pool Rotation
//!
//! Routes a crawler's outbound requests through an ordered list of proxy
//! pools, switching away from a pool once its ban rate gets too high.
//!
//! ## Features
//!
//! - Ban-rate driven switching between prioritized pools
//! - Cooldown and restart once every pool has been cycled or is unusable
//! - Request, response and transport-exception hooks for a host crawler
//! - In-memory round-robin and random pools
//! - HTTP/1.1 fetcher over upstream HTTP proxies
//! - Bounded-concurrency crawl driver

pub mod config;
pub mod crawl;
pub mod error;
pub mod fetch;
pub mod models;
pub mod pool;
pub mod rotation;

pub use config::Config;
pub use crawl::{CrawlSummary, Crawler};
pub use error::{Result, RotaError};
pub use models::{CrawlRequest, CrawlResponse, ProxyEndpoint, RotationSnapshot, TransportError};
pub use rotation::{ProxyPool, RotationController, RotationPolicy, RoutingDecision};
