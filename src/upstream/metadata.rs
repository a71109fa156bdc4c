//! Protocol metadata API client

use async_trait::async_trait;
use reqwest::Client;

use super::MetadataSource;
use crate::error::{Error, Provider, Result};
use crate::model::RawDataset;

/// Fetches the raw protocol dataset from the configured metadata endpoint
pub struct MetadataClient {
    client: Client,
    url: String,
}

impl MetadataClient {
    /// Create a client for `url`
    #[must_use]
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl MetadataSource for MetadataClient {
    async fn fetch_dataset(&self) -> Result<RawDataset> {
        let upstream = |e: reqwest::Error| Error::upstream(Provider::Metadata, e);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?;
        response.json::<RawDataset>().await.map_err(upstream)
    }
}
