//! Privacy protocol metrics aggregation
//!
//! Joins a protocol registry with DefiLlama TVL history and CoinGecko market
//! data into display-ready overview and detail records.
//!
//! # Features
//!
//! - **Registry**: protocol metadata and scoring breakdowns from a JSON endpoint
//! - **Alignment**: per-protocol series merged onto a daily calendar with
//!   `month` / `year` / `all` views (see the `pracc-series` crate)
//! - **Isolation**: one protocol's failing upstream never fails the overview
//! - **Surfaces**: a JSON HTTP API and one-shot CLI commands

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod assemble;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod insights;
pub mod model;
pub mod registry;
pub mod request;
pub mod upstream;

pub use assemble::{Assembler, AssemblyOptions};
pub use error::{Error, Provider, Result};
pub use request::RequestCache;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` wins over `level` when set. Logs go to stderr so command
/// output on stdout stays machine-readable.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
