use crate::crawl::CrawlerConfig;
use crate::error::{Result, RotaError};
use crate::fetch::FetcherConfig;
use crate::models::ProxyEndpoint;
use crate::pool::{SelectionStrategy, StaticPool};
use crate::rotation::{ProxyPool, RotationPolicy};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Ordered pools, index 0 has the highest priority
    pub pools: Vec<PoolConfig>,
    /// How each pool picks among its endpoints
    pub pool_strategy: SelectionStrategy,
    /// Switch/restart thresholds
    pub rotation: RotationPolicy,
    /// Fetcher and crawl driver settings
    pub crawl: CrawlConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub name: String,
    pub endpoints: Vec<ProxyEndpoint>,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Request timeout in seconds
    pub request_timeout: u64,
    /// Reissues allowed per URL before giving up
    pub max_reissues: u32,
    /// URLs crawled concurrently
    pub concurrency: usize,
    /// Body substrings that mark a banned response
    pub ban_markers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let max_banned_rate: f64 = parse_env("ROTA_MAX_BANNED_RATE", "1.0")?;
        if !max_banned_rate.is_finite() || max_banned_rate < 0.0 {
            return Err(RotaError::InvalidConfig(
                "ROTA_MAX_BANNED_RATE must be a non-negative number".into(),
            ));
        }

        let concurrency: usize = parse_env("ROTA_CONCURRENCY", "8")?;
        if concurrency == 0 {
            return Err(RotaError::InvalidConfig(
                "ROTA_CONCURRENCY must be at least 1".into(),
            ));
        }

        Ok(Config {
            pools: parse_pools(&get_env_or("ROTA_POOLS", ""))?,
            pool_strategy: SelectionStrategy::from_str(&get_env_or(
                "ROTA_POOL_STRATEGY",
                "round_robin",
            )),
            rotation: RotationPolicy {
                max_banned_rate_per_second: max_banned_rate,
                min_window_before_evaluation: Duration::from_secs(parse_env(
                    "ROTA_MIN_WINDOW_SECS",
                    "60",
                )?),
                max_cycles_before_restart: parse_env("ROTA_MAX_CYCLES", "3")?,
                restart_cooldown: Duration::from_secs(parse_env(
                    "ROTA_RESTART_COOLDOWN_SECS",
                    "1800",
                )?),
                acquire_retry_delay: Duration::from_millis(parse_env(
                    "ROTA_ACQUIRE_RETRY_MS",
                    "1000",
                )?),
            },
            crawl: CrawlConfig {
                connect_timeout: parse_env("ROTA_CONNECT_TIMEOUT", "10")?,
                request_timeout: parse_env("ROTA_REQUEST_TIMEOUT", "30")?,
                max_reissues: parse_env("ROTA_MAX_REISSUES", "5")?,
                concurrency,
                ban_markers: get_env_or("ROTA_BAN_MARKERS", "")
                    .split('|')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }

    /// Build the pool registry in priority order
    pub fn build_pools(&self) -> Vec<Arc<dyn ProxyPool>> {
        self.pools
            .iter()
            .map(|p| {
                Arc::new(StaticPool::new(
                    p.name.clone(),
                    p.endpoints.clone(),
                    self.pool_strategy,
                )) as Arc<dyn ProxyPool>
            })
            .collect()
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            connect_timeout: Duration::from_secs(self.crawl.connect_timeout),
            request_timeout: Duration::from_secs(self.crawl.request_timeout),
        }
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig {
            max_reissues: self.crawl.max_reissues,
            concurrency: self.crawl.concurrency,
        }
    }
}

/// Parse `name=url,url;name2=url` into ordered pool configs
fn parse_pools(raw: &str) -> Result<Vec<PoolConfig>> {
    let mut pools: Vec<PoolConfig> = Vec::new();

    for entry in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, urls) = entry.split_once('=').ok_or_else(|| {
            RotaError::InvalidConfig(format!("ROTA_POOLS entry '{}' must look like name=url,...", entry))
        })?;

        let name = name.trim();
        if name.is_empty() {
            return Err(RotaError::InvalidConfig(
                "ROTA_POOLS entry is missing a pool name".into(),
            ));
        }
        if pools.iter().any(|p| p.name == name) {
            return Err(RotaError::InvalidConfig(format!(
                "ROTA_POOLS names pool '{}' twice",
                name
            )));
        }

        let endpoints = urls
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|url| {
                ProxyEndpoint::parse(url).map_err(|e| {
                    RotaError::InvalidConfig(format!("ROTA_POOLS pool '{}': {}", name, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        pools.push(PoolConfig {
            name: name.to_string(),
            endpoints,
        });
    }

    Ok(pools)
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RotaError::InvalidConfig(format!("{} must be a valid number", key)))
}
