//! Upstream data sources
//!
//! Each provider sits behind a small async trait so assemblers can be driven
//! by fixtures in tests. [`Sources`] bundles one implementation of each,
//! records per-provider health and routes TVL lookups through the
//! per-request [`RequestCache`].

mod coingecko;
mod defillama;
mod health;
mod metadata;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use pracc_series::TimeSeriesPoint;
use reqwest::Client;
use tracing::debug;

pub use coingecko::CoinGeckoClient;
pub use defillama::DefiLlamaClient;
pub use health::{HealthSnapshot, HealthTracker, UpstreamHealth};
pub use metadata::MetadataClient;

use crate::config::{MarketConfig, UpstreamConfig};
use crate::error::{Error, Provider, Result};
use crate::model::{MarketSnapshot, RawDataset, SeriesSlug};
use crate::request::RequestCache;

/// Source of the raw protocol registry
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch protocols and internal scoring rows
    async fn fetch_dataset(&self) -> Result<RawDataset>;
}

/// Source of daily TVL history
#[async_trait]
pub trait TvlSource: Send + Sync {
    /// Fetch the TVL series a slug points at
    async fn fetch_tvl(&self, slug: &SeriesSlug) -> Result<Vec<TimeSeriesPoint>>;
}

/// Source of coin market data
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Current snapshots for a batch of coin ids
    async fn fetch_markets(&self, ids: &[String]) -> Result<Vec<MarketSnapshot>>;

    /// Daily USD price history of one coin
    async fn fetch_price_history(&self, id: &str) -> Result<Vec<TimeSeriesPoint>>;
}

/// The three upstream sources plus their health counters
#[derive(Clone)]
pub struct Sources {
    metadata: Arc<dyn MetadataSource>,
    tvl: Arc<dyn TvlSource>,
    market: Arc<dyn MarketSource>,
    health: Arc<UpstreamHealth>,
}

impl Sources {
    /// Bundle arbitrary source implementations
    #[must_use]
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        tvl: Arc<dyn TvlSource>,
        market: Arc<dyn MarketSource>,
    ) -> Self {
        Self {
            metadata,
            tvl,
            market,
            health: Arc::new(UpstreamHealth::new()),
        }
    }

    /// HTTP clients for the configured endpoints, sharing one `reqwest::Client`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(upstream: &UpstreamConfig, market: &MarketConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(upstream.request_timeout)
            .user_agent(upstream.user_agent.as_str())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::new(
            Arc::new(MetadataClient::new(
                client.clone(),
                upstream.data_api_url.as_str(),
            )),
            Arc::new(DefiLlamaClient::new(client.clone(), &upstream.defillama_url)),
            Arc::new(CoinGeckoClient::new(
                client,
                &upstream.coingecko_url,
                market.history_days,
            )),
        ))
    }

    /// Health counters of every provider
    #[must_use]
    pub fn health(&self) -> &UpstreamHealth {
        &self.health
    }

    /// Raw registry payload
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` when the metadata endpoint fails.
    pub async fn fetch_dataset(&self) -> Result<RawDataset> {
        self.tracked(Provider::Metadata, self.metadata.fetch_dataset())
            .await
    }

    /// TVL series behind an optional `kind:slug` reference
    ///
    /// Empty, absent or unrecognized slugs yield `Ok(None)` without a network
    /// call. Successful fetches are shared through `cache`.
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` when DefiLlama fails for a recognized slug.
    pub async fn fetch_series(
        &self,
        cache: &RequestCache,
        slug: Option<&str>,
    ) -> Result<Option<Arc<Vec<TimeSeriesPoint>>>> {
        let Some(parsed) = slug.and_then(SeriesSlug::parse) else {
            if let Some(raw) = slug.filter(|s| !s.trim().is_empty()) {
                debug!(slug = raw, "Ignoring unrecognized DeFi slug");
            }
            return Ok(None);
        };

        let points = cache
            .series(&parsed, || {
                self.tracked(Provider::DefiLlama, self.tvl.fetch_tvl(&parsed))
            })
            .await?;
        Ok(Some(points))
    }

    /// Batched market snapshots
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` when CoinGecko fails.
    pub async fn fetch_markets(&self, ids: &[String]) -> Result<Vec<MarketSnapshot>> {
        self.tracked(Provider::CoinGecko, self.market.fetch_markets(ids))
            .await
    }

    /// Daily price history of one coin, shared through `cache`
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` when CoinGecko fails.
    pub async fn fetch_price_history(
        &self,
        cache: &RequestCache,
        id: &str,
    ) -> Result<Arc<Vec<TimeSeriesPoint>>> {
        cache
            .price_history(id, || {
                self.tracked(Provider::CoinGecko, self.market.fetch_price_history(id))
            })
            .await
    }

    async fn tracked<T>(
        &self,
        provider: Provider,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let started = Instant::now();
        let result = call.await;
        let tracker = self.health.tracker(provider);
        match &result {
            Ok(_) => tracker.record_success(started.elapsed()),
            Err(e) => tracker.record_failure(&e.to_string()),
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory sources for assembler tests

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Fixture-backed implementation of every source trait
    #[derive(Default)]
    pub struct MockUpstream {
        pub dataset: Option<RawDataset>,
        pub tvl: HashMap<String, Vec<TimeSeriesPoint>>,
        pub markets: Option<Vec<MarketSnapshot>>,
        pub history: HashMap<String, Vec<TimeSeriesPoint>>,
        pub dataset_calls: AtomicUsize,
        pub tvl_calls: AtomicUsize,
        pub market_calls: AtomicUsize,
        pub history_calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub peak_in_flight: AtomicUsize,
    }

    /// Counts a per-protocol call as in flight until dropped
    struct InFlight<'a>(&'a AtomicUsize);

    impl<'a> InFlight<'a> {
        fn enter(mock: &'a MockUpstream) -> Self {
            let now = mock.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            mock.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            Self(&mock.in_flight)
        }
    }

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl MockUpstream {
        pub fn into_sources(self) -> (Arc<Self>, Sources) {
            let mock = Arc::new(self);
            let sources = Sources::new(mock.clone(), mock.clone(), mock.clone());
            (mock, sources)
        }
    }

    #[async_trait]
    impl MetadataSource for MockUpstream {
        async fn fetch_dataset(&self) -> Result<RawDataset> {
            self.dataset_calls.fetch_add(1, Ordering::SeqCst);
            self.dataset
                .clone()
                .ok_or_else(|| Error::upstream(Provider::Metadata, "connection refused"))
        }
    }

    #[async_trait]
    impl TvlSource for MockUpstream {
        async fn fetch_tvl(&self, slug: &SeriesSlug) -> Result<Vec<TimeSeriesPoint>> {
            self.tvl_calls.fetch_add(1, Ordering::SeqCst);
            let _guard = InFlight::enter(self);
            tokio::task::yield_now().await;
            self.tvl
                .get(&slug.to_string())
                .cloned()
                .ok_or_else(|| Error::upstream(Provider::DefiLlama, format!("404 for {slug}")))
        }
    }

    #[async_trait]
    impl MarketSource for MockUpstream {
        async fn fetch_markets(&self, ids: &[String]) -> Result<Vec<MarketSnapshot>> {
            self.market_calls.fetch_add(1, Ordering::SeqCst);
            let markets = self
                .markets
                .as_ref()
                .ok_or_else(|| Error::upstream(Provider::CoinGecko, "429 Too Many Requests"))?;
            Ok(markets
                .iter()
                .filter(|m| ids.contains(&m.id))
                .cloned()
                .collect())
        }

        async fn fetch_price_history(&self, id: &str) -> Result<Vec<TimeSeriesPoint>> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            let _guard = InFlight::enter(self);
            tokio::task::yield_now().await;
            self.history
                .get(id)
                .cloned()
                .ok_or_else(|| Error::upstream(Provider::CoinGecko, format!("no history for {id}")))
        }
    }
}
