//! CoinGecko market client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pracc_series::TimeSeriesPoint;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::MarketSource;
use crate::error::{Error, Provider, Result};
use crate::model::MarketSnapshot;

/// `/coins/markets` page size limit
const MAX_PER_PAGE: usize = 250;
/// Spacing of the 7-day sparkline samples
const SPARKLINE_STEP_SECS: i64 = 3_600;

/// One element of `GET /coins/markets`
#[derive(Debug, Deserialize)]
struct RawMarketCoin {
    id: String,
    #[serde(default)]
    symbol: String,
    image: Option<String>,
    current_price: Option<f64>,
    total_supply: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    last_updated: Option<DateTime<Utc>>,
    sparkline_in_7d: Option<RawSparkline>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSparkline {
    #[serde(default)]
    price: Vec<Option<f64>>,
}

/// `GET /coins/{id}/market_chart`, only prices are read
#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<(f64, Option<f64>)>,
}

impl RawMarketCoin {
    fn into_snapshot(self) -> MarketSnapshot {
        let fdv = self
            .current_price
            .zip(self.total_supply)
            .map(|(price, supply)| price * supply);
        let sparkline = match (self.last_updated, self.sparkline_in_7d) {
            (Some(updated), Some(spark)) => timestamp_sparkline(updated.timestamp(), &spark.price),
            _ => Vec::new(),
        };

        MarketSnapshot {
            id: self.id,
            symbol: self.symbol,
            image: self.image,
            current_price: self.current_price,
            total_supply: self.total_supply,
            fdv,
            change_24h: self.price_change_percentage_24h,
            sparkline,
        }
    }
}

/// Hourly prices, the last one observed at `last_updated`
fn timestamp_sparkline(last_updated: i64, prices: &[Option<f64>]) -> Vec<TimeSeriesPoint> {
    let newest = prices.len().saturating_sub(1);
    prices
        .iter()
        .enumerate()
        .filter_map(|(i, price)| {
            let hours_back = i64::try_from(newest - i).ok()?;
            price.map(|p| TimeSeriesPoint::new(last_updated - hours_back * SPARKLINE_STEP_SECS, p))
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn millis_to_secs(ms: f64) -> i64 {
    (ms / 1000.0).floor() as i64
}

/// CoinGecko API client
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    history_days: u32,
}

impl CoinGeckoClient {
    /// Create a client rooted at `base_url` (e.g. `https://api.coingecko.com/api/v3`)
    #[must_use]
    pub fn new(client: Client, base_url: &str, history_days: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            history_days,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let upstream = |e: reqwest::Error| Error::upstream(Provider::CoinGecko, e);

        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?;
        response.json::<T>().await.map_err(upstream)
    }
}

#[async_trait]
impl MarketSource for CoinGeckoClient {
    async fn fetch_markets(&self, ids: &[String]) -> Result<Vec<MarketSnapshot>> {
        let mut snapshots = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_PER_PAGE) {
            let query = [
                ("vs_currency", "usd".to_string()),
                ("ids", chunk.join(",")),
                ("price_change_percentage", "24h".to_string()),
                ("sparkline", "true".to_string()),
                ("per_page", MAX_PER_PAGE.to_string()),
                ("page", "1".to_string()),
            ];
            let coins: Vec<RawMarketCoin> = self.get("/coins/markets", &query).await?;
            snapshots.extend(coins.into_iter().map(RawMarketCoin::into_snapshot));
        }
        Ok(snapshots)
    }

    async fn fetch_price_history(&self, id: &str) -> Result<Vec<TimeSeriesPoint>> {
        let query = [
            ("vs_currency", "usd".to_string()),
            ("days", self.history_days.to_string()),
        ];
        let chart: MarketChart = self
            .get(&format!("/coins/{id}/market_chart"), &query)
            .await?;
        Ok(chart
            .prices
            .into_iter()
            .filter_map(|(ms, price)| price.map(|p| TimeSeriesPoint::new(millis_to_secs(ms), p)))
            .collect())
    }
}
