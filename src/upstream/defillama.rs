//! DefiLlama TVL client

use async_trait::async_trait;
use pracc_series::TimeSeriesPoint;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::TvlSource;
use crate::error::{Error, Provider, Result};
use crate::model::SeriesSlug;

/// `GET /protocol/{slug}`, only the TVL history is read
#[derive(Debug, Deserialize)]
struct ProtocolTvlResponse {
    #[serde(default)]
    tvl: Vec<ProtocolTvlPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolTvlPoint {
    date: i64,
    #[serde(rename = "totalLiquidityUSD")]
    total_liquidity_usd: f64,
}

/// One element of `GET /v2/historicalChainTvl/{slug}`
#[derive(Debug, Deserialize)]
struct ChainTvlPoint {
    date: i64,
    tvl: f64,
}

/// DefiLlama API client
pub struct DefiLlamaClient {
    client: Client,
    base_url: String,
}

impl DefiLlamaClient {
    /// Create a client rooted at `base_url` (e.g. `https://api.llama.fi`)
    #[must_use]
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let upstream = |e: reqwest::Error| Error::upstream(Provider::DefiLlama, e);

        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?;
        response.json::<T>().await.map_err(upstream)
    }
}

#[async_trait]
impl TvlSource for DefiLlamaClient {
    async fn fetch_tvl(&self, slug: &SeriesSlug) -> Result<Vec<TimeSeriesPoint>> {
        match slug {
            SeriesSlug::Protocol(s) => {
                let body: ProtocolTvlResponse = self.get(&format!("/protocol/{s}")).await?;
                Ok(body
                    .tvl
                    .into_iter()
                    .map(|p| TimeSeriesPoint::new(p.date, p.total_liquidity_usd))
                    .collect())
            }
            SeriesSlug::Chain(s) => {
                let body: Vec<ChainTvlPoint> =
                    self.get(&format!("/v2/historicalChainTvl/{s}")).await?;
                Ok(body
                    .into_iter()
                    .map(|p| TimeSeriesPoint::new(p.date, p.tvl))
                    .collect())
            }
        }
    }
}
