//! Protocol registry loading and normalization

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    InternalProtocol, ProtocolRecord, RawInternalProtocol, RawProtocol, UNCATEGORIZED,
};
use crate::request::RequestCache;
use crate::upstream::Sources;

/// Normalized registry of one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Protocols, upstream order
    pub protocols: Vec<ProtocolRecord>,
    /// Scoring breakdowns, upstream order
    pub internal: Vec<InternalProtocol>,
}

impl Dataset {
    /// Normalize a raw payload
    #[must_use]
    pub fn from_raw(protocols: Vec<RawProtocol>, internal: Vec<RawInternalProtocol>) -> Self {
        Self {
            protocols: protocols.into_iter().map(normalize_protocol).collect(),
            internal: internal.into_iter().map(normalize_internal).collect(),
        }
    }

    /// Protocol with the given id
    #[must_use]
    pub fn protocol(&self, id: &str) -> Option<&ProtocolRecord> {
        self.protocols.iter().find(|p| p.id == id)
    }

    /// Scoring breakdowns associated with `id`
    pub fn internal_for<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a InternalProtocol> {
        self.internal.iter().filter(move |i| i.protocol_id == id)
    }
}

/// Load the registry once per request
///
/// # Errors
///
/// `UpstreamUnavailable` when the metadata endpoint is unreachable or its
/// payload cannot be parsed.
pub async fn load_dataset(sources: &Sources, cache: &RequestCache) -> Result<Arc<Dataset>> {
    cache
        .dataset(|| async move {
            let (protocols, internal) = sources.fetch_dataset().await?.into_parts();
            let dataset = Dataset::from_raw(protocols, internal);
            debug!(
                protocols = dataset.protocols.len(),
                internal = dataset.internal.len(),
                "Registry loaded"
            );
            Ok::<_, Error>(dataset)
        })
        .await
}

/// Normalized protocol records
///
/// # Errors
///
/// Same as [`load_dataset`].
pub async fn load_protocols(sources: &Sources, cache: &RequestCache) -> Result<Vec<ProtocolRecord>> {
    Ok(load_dataset(sources, cache).await?.protocols.clone())
}

/// Split a comma-joined list: trim, drop empties, de-duplicate in order
#[must_use]
pub fn normalize_list(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && seen.insert(*s))
        .map(str::to_string)
        .collect()
}

/// [`normalize_list`], falling back to `Uncategorized` when nothing remains
#[must_use]
pub fn normalize_categories(raw: &str) -> Vec<String> {
    let list = normalize_list(raw);
    if list.is_empty() {
        vec![UNCATEGORIZED.to_string()]
    } else {
        list
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_protocol(raw: RawProtocol) -> ProtocolRecord {
    ProtocolRecord {
        categories: normalize_categories(&raw.categories),
        sub_categories: normalize_categories(&raw.sub_categories),
        id: raw.id,
        name: raw.name.trim().to_string(),
        logo: raw.logo_url,
        website: raw.url,
        description: non_empty(raw.description),
        twitter: non_empty(raw.twitter_url),
        live_at: non_empty(raw.live_at),
        market_id: non_empty(raw.coingecko_id),
        defi_slug: non_empty(raw.defillama_slug),
        ipc: raw.ipc,
        overall_score: raw.overall_score,
    }
}

fn normalize_internal(raw: RawInternalProtocol) -> InternalProtocol {
    InternalProtocol {
        privacy_stack: normalize_list(&raw.privacy_stack),
        tech_stack: normalize_list(&raw.tech_stack),
        protocol_id: raw.asc_id,
        name: raw.name,
        category: raw.category,
        sub_category: raw.sub_category,
        live_at: non_empty(raw.live_at),
        priv_who: raw.priv_who,
        priv_what: raw.priv_what,
        de_anon: raw.de_anon,
        liveness_req: raw.liveness_req,
        base_maturity: raw.base_maturity,
        punk_level: raw.punk_lv,
        overall_score: raw.overall_score,
        note: non_empty(raw.note),
    }
}
