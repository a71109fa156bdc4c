//! Overview and detail assembly
//!
//! An [`Assembler`] joins the registry, TVL series and market data into the
//! records the API and CLI serve. Every call takes the [`RequestCache`] of
//! the request it belongs to.

mod detail;
mod overview;

pub use overview::fdv_series;

use crate::config::Config;
use crate::error::Result;
use crate::model::ProtocolRecord;
use crate::registry;
use crate::request::RequestCache;
use crate::upstream::Sources;

/// Tunables of one assembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyOptions {
    /// Protocols fetched at once (each with up to two upstream calls)
    pub max_in_flight: usize,
    /// Fetch daily price history for FDV series
    pub history_enabled: bool,
    /// 12-hour sparkline buckets appended to FDV series
    pub sparkline_buckets: usize,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            history_enabled: true,
            sparkline_buckets: 14,
        }
    }
}

impl AssemblyOptions {
    /// Options from the `upstream` and `market` config sections
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_in_flight: config.upstream.max_in_flight.max(1),
            history_enabled: config.market.history_enabled,
            sparkline_buckets: config.market.sparkline_buckets,
        }
    }
}

/// Joins upstream data into overview and detail records
pub struct Assembler {
    sources: Sources,
    options: AssemblyOptions,
}

impl Assembler {
    /// Create an assembler over arbitrary sources
    #[must_use]
    pub fn new(sources: Sources, options: AssemblyOptions) -> Self {
        Self { sources, options }
    }

    /// HTTP-backed assembler for a loaded config
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let sources = Sources::from_config(&config.upstream, &config.market)?;
        Ok(Self::new(sources, AssemblyOptions::from_config(config)))
    }

    /// Underlying sources
    #[must_use]
    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    /// Active options
    #[must_use]
    pub fn options(&self) -> AssemblyOptions {
        self.options
    }

    /// Normalized registry of this request
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` when the metadata endpoint fails.
    pub async fn load_protocols(&self, cache: &RequestCache) -> Result<Vec<ProtocolRecord>> {
        registry::load_protocols(&self.sources, cache).await
    }
}
