//! Multi-protocol overview

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use pracc_series::{Aligner, AllStride, HALF_DAY, TimeSeriesPoint, resample_latest};
use tracing::{debug, info, warn};

use super::Assembler;
use crate::error::Result;
use crate::insights::overview_stats;
use crate::model::{MarketSnapshot, Overview, ProtocolOverview, ProtocolRecord, ScoreTier};
use crate::registry;
use crate::request::RequestCache;

/// Series gathered for one protocol; `None` means no data
struct ProtocolSeries {
    tvl: Option<Arc<Vec<TimeSeriesPoint>>>,
    price_history: Option<Arc<Vec<TimeSeriesPoint>>>,
}

impl Assembler {
    /// Assemble the overview of every registered protocol
    ///
    /// Per-protocol TVL and price-history failures only blank that protocol's
    /// data.
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` when the registry or the batched market call
    /// fails.
    pub async fn assemble_overview(&self, cache: &RequestCache) -> Result<Overview> {
        let dataset = registry::load_dataset(&self.sources, cache).await?;
        let protocols = &dataset.protocols;
        let market_ids = distinct_market_ids(protocols);

        let markets = async {
            if market_ids.is_empty() {
                return Ok(Vec::new());
            }
            self.sources.fetch_markets(&market_ids).await
        };
        let series_futures: Vec<_> = protocols
            .iter()
            .map(|protocol| self.protocol_series(cache, protocol))
            .collect();
        let per_protocol = stream::iter(series_futures)
            .buffered(self.options.max_in_flight)
            .collect::<Vec<_>>();
        let (markets, per_protocol) = tokio::join!(markets, per_protocol);
        let markets = markets?;
        let by_id: HashMap<&str, &MarketSnapshot> =
            markets.iter().map(|m| (m.id.as_str(), m)).collect();

        let mut tvls = Aligner::new();
        let mut fdvs = Aligner::new();
        let mut rows = Vec::with_capacity(protocols.len());
        for (protocol, series) in protocols.iter().zip(per_protocol) {
            let coin = protocol
                .market_id
                .as_deref()
                .and_then(|id| by_id.get(id))
                .map(|snapshot| (*snapshot).clone());

            if let Some(points) = &series.tvl {
                tvls.add_series(&protocol.name, points);
            }
            if let Some(points) = coin.as_ref().and_then(|c| {
                fdv_series(
                    c,
                    series.price_history.as_deref().map(Vec::as_slice),
                    self.options.sparkline_buckets,
                )
            }) {
                fdvs.add_series(&protocol.name, &points);
            }

            rows.push(display_record(
                protocol,
                series.tvl.as_ref().and_then(|p| p.last()).map(|p| p.value),
                coin,
            ));
        }

        let stats = overview_stats(&rows);
        if stats.total_tvl > 0.0 {
            for row in &mut rows {
                row.tvl_share = row.tvl.map(|tvl| tvl / stats.total_tvl);
            }
        }

        let cache_stats = cache.stats();
        debug!(
            cache_hits = cache_stats.hits,
            cache_misses = cache_stats.misses,
            "Request cache"
        );
        info!(
            protocols = stats.protocols,
            tvl_days = tvls.len(),
            fdv_days = fdvs.len(),
            "Overview assembled"
        );

        Ok(Overview {
            protocols: rows,
            all_tvls: tvls.views(AllStride::OVERVIEW),
            all_fdvs: fdvs.views(AllStride::OVERVIEW),
            stats,
            generated_at: Utc::now(),
        })
    }

    async fn protocol_series(&self, cache: &RequestCache, protocol: &ProtocolRecord) -> ProtocolSeries {
        let tvl = async {
            match self
                .sources
                .fetch_series(cache, protocol.defi_slug.as_deref())
                .await
            {
                Ok(points) => points,
                Err(e) => {
                    warn!(protocol = %protocol.name, error = %e, "TVL series unavailable");
                    None
                }
            }
        };
        let price_history = async {
            let id = protocol
                .market_id
                .as_deref()
                .filter(|_| self.options.history_enabled)?;
            match self.sources.fetch_price_history(cache, id).await {
                Ok(points) => Some(points),
                Err(e) => {
                    warn!(protocol = %protocol.name, error = %e, "Price history unavailable");
                    None
                }
            }
        };

        let (tvl, price_history) = tokio::join!(tvl, price_history);
        ProtocolSeries { tvl, price_history }
    }
}

/// FDV series of one coin
///
/// Daily history prices are multiplied by the snapshot's total supply, then
/// the sparkline is resampled into 12-hour buckets (newest `buckets` kept)
/// and appended where it is newer than the last history point. `None` when
/// the supply is unknown or nothing remains.
#[must_use]
pub fn fdv_series(
    snapshot: &MarketSnapshot,
    history: Option<&[TimeSeriesPoint]>,
    buckets: usize,
) -> Option<Vec<TimeSeriesPoint>> {
    let supply = snapshot.total_supply.filter(|s| *s > 0.0)?;
    let history = history.unwrap_or_default();
    let last_history = history.iter().map(|p| p.timestamp).max();

    let recent = resample_latest(&snapshot.sparkline, HALF_DAY, buckets)
        .into_iter()
        .filter(|p| last_history.is_none_or(|last| p.timestamp > last));
    let points: Vec<TimeSeriesPoint> = history
        .iter()
        .copied()
        .chain(recent)
        .map(|p| TimeSeriesPoint::new(p.timestamp, p.value * supply))
        .collect();

    (!points.is_empty()).then_some(points)
}

fn distinct_market_ids(protocols: &[ProtocolRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    protocols
        .iter()
        .filter_map(|p| p.market_id.as_deref())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

fn display_record(
    protocol: &ProtocolRecord,
    tvl: Option<f64>,
    coin: Option<MarketSnapshot>,
) -> ProtocolOverview {
    ProtocolOverview {
        id: protocol.id.clone(),
        name: protocol.name.clone(),
        logo: protocol.logo.clone(),
        categories: protocol.categories.clone(),
        sub_categories: protocol.sub_categories.clone(),
        live_at: protocol.live_at.clone(),
        website: protocol.website.clone(),
        description: protocol.description.clone(),
        tvl,
        tvl_share: None,
        coin,
        ipc: protocol.ipc,
        overall_score: protocol.overall_score,
        tier: ScoreTier::from_score(protocol.overall_score),
    }
}
