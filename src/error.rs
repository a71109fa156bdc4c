//! Error types for the aggregation service

use std::fmt;
use std::io;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for the aggregation service
pub type Result<T> = std::result::Result<T, Error>;

/// Upstream data providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Protocol metadata / internal scoring API
    Metadata,
    /// DefiLlama TVL API
    DefiLlama,
    /// CoinGecko market API
    CoinGecko,
}

impl Provider {
    /// Every provider, in reporting order
    pub const ALL: [Self; 3] = [Self::Metadata, Self::DefiLlama, Self::CoinGecko];

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::DefiLlama => "defillama",
            Self::CoinGecko => "coingecko",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation service errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream unreachable, timed out or returned something unparseable
    #[error("Upstream {provider} unavailable: {reason}")]
    UpstreamUnavailable {
        /// Which provider failed
        provider: Provider,
        /// What went wrong
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an upstream error
    pub fn upstream(provider: Provider, reason: impl fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            provider,
            reason: reason.to_string(),
        }
    }

    /// True for failures of a third-party provider
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }

    /// HTTP status to answer with when this error reaches a handler
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
