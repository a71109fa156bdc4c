//! Single-protocol detail

use pracc_series::{AllStride, align, summarize};
use tracing::{debug, warn};

use super::Assembler;
use crate::error::Result;
use crate::model::{DetailRecord, ScoreTier};
use crate::registry;
use crate::request::RequestCache;

impl Assembler {
    /// Assemble the detail record of protocol `id`
    ///
    /// `Ok(None)` when no protocol has that id. A failing TVL fetch leaves
    /// `tvl` empty instead of failing the record.
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` when the registry cannot be loaded.
    pub async fn assemble_detail(&self, cache: &RequestCache, id: &str) -> Result<Option<DetailRecord>> {
        let dataset = registry::load_dataset(&self.sources, cache).await?;
        let Some(protocol) = dataset.protocol(id) else {
            debug!(id, "Protocol not found");
            return Ok(None);
        };

        let series = match self
            .sources
            .fetch_series(cache, protocol.defi_slug.as_deref())
            .await
        {
            Ok(series) => series,
            Err(e) => {
                warn!(protocol = %protocol.name, error = %e, "TVL series unavailable");
                None
            }
        };
        let tvl = series
            .map(|points| align([(protocol.name.as_str(), points.as_slice())], AllStride::Adaptive))
            .filter(|views| !views.is_empty());
        let tvl_summary = tvl.as_ref().map(|views| summarize(&views.month));

        Ok(Some(DetailRecord {
            tier: ScoreTier::from_score(protocol.overall_score),
            internal_protocols: dataset.internal_for(id).cloned().collect(),
            protocol: protocol.clone(),
            tvl,
            tvl_summary,
        }))
    }
}
