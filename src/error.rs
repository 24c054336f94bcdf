use thiserror::Error;

/// Unified error type for the Poolrota library
#[derive(Error, Debug)]
pub enum RotaError {
    // Pool errors
    #[error("Proxy pool {pool} exhausted: {reason}")]
    PoolExhausted { pool: String, reason: String },

    #[error("No proxy pools configured")]
    NoPools,

    #[error("Operation cancelled")]
    Cancelled,

    // Endpoint errors
    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for Poolrota operations
pub type Result<T> = std::result::Result<T, RotaError>;

impl RotaError {
    /// Whether this error means the current request cycle should be skipped
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, RotaError::PoolExhausted { .. } | RotaError::NoPools)
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RotaError {
    fn from(err: url::ParseError) -> Self {
        RotaError::InvalidProxyAddress(err.to_string())
    }
}
