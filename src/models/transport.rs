use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed fetch as seen by the host crawler
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    ConnectionRefused,
    /// CONNECT/handshake negotiation with the proxy failed
    Tunnel,
    /// Any other failure, tagged with a short kind name such as `parse-error`
    Other(String),
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ConnectionRefused => "connection-refused",
            TransportErrorKind::Tunnel => "tunnel",
            TransportErrorKind::Other(kind) => kind.as_str(),
        }
    }

    /// Transient kinds are retried with a different proxy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportErrorKind::Timeout
                | TransportErrorKind::ConnectionRefused
                | TransportErrorKind::Tunnel
        )
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transport-level failure reported by the host crawler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::ConnectionRefused, message)
    }

    pub fn tunnel(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Tunnel, message)
    }

    pub fn other(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other(kind.into()), message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}
