use std::sync::Arc;

use thiserror::Error;

use crate::dns::ParseError;

/// Configuration problems are fatal at startup; nothing here is retried.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("invalid upstream server: {0}")]
    InvalidUpstreamServer(String),

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid NSEC3 iteration limit {value} for key size {key_size}: {message}")]
    InvalidNsec3Iterations {
        key_size: u32,
        value: String,
        message: String,
    },

    #[error("invalid digest preference: {0}")]
    InvalidDigestPreference(String),

    #[error("trust anchor file {path}: {message}")]
    TrustAnchorFile { path: String, message: String },

    #[error("configuration parse error: {0}")]
    Parse(String),
}

/// Upstream transport and message-level failures, propagated to the caller
/// unchanged; they never turn into a security verdict.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("malformed message: {0}")]
    Malformed(#[from] ParseError),

    #[error("upstream timed out")]
    Timeout,

    #[error("all upstream servers failed")]
    NoUpstream,

    #[error("request cancelled")]
    Cancelled,

    #[error("response id or question mismatch")]
    Mismatch,
}

impl From<std::io::Error> for ResolveError {
    fn from(err: std::io::Error) -> Self {
        ResolveError::Io(Arc::new(err))
    }
}
