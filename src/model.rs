//! Protocol, scoring and market records
//!
//! `Raw*` types mirror upstream payloads field for field; everything else is
//! the normalized, display-ready shape served to the frontend (camelCase).

use std::fmt;

use chrono::{DateTime, Utc};
use pracc_series::{GranularityViews, SeriesSummary, TimeSeriesPoint};
use serde::{Deserialize, Deserializer, Serialize};

/// Placeholder used when a protocol lists no category at all
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Protocol row as served by the metadata API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawProtocol {
    /// Stable identifier
    #[serde(deserialize_with = "null_string")]
    pub id: String,
    /// Display name
    #[serde(deserialize_with = "null_string")]
    pub name: String,
    /// Free-text description
    pub description: Option<String>,
    /// Twitter / X profile
    pub twitter_url: Option<String>,
    /// Launch date as published upstream
    pub live_at: Option<String>,
    /// Website
    #[serde(deserialize_with = "null_string")]
    pub url: String,
    /// Logo image
    #[serde(deserialize_with = "null_string")]
    pub logo_url: String,
    /// `p:<slug>` or `c:<slug>`; empty when untracked
    pub defillama_slug: Option<String>,
    /// CoinGecko coin id; empty when the protocol has no token
    pub coingecko_id: Option<String>,
    /// Comma-joined categories
    #[serde(deserialize_with = "null_string")]
    pub categories: String,
    /// Comma-joined subcategories
    #[serde(deserialize_with = "null_string")]
    pub sub_categories: String,
    /// Privacy component count
    #[serde(deserialize_with = "lenient_u32")]
    pub ipc: u32,
    /// Overall score, absent until scored
    #[serde(deserialize_with = "lenient_f64")]
    pub overall_score: Option<f64>,
}

/// Internal sub-protocol scoring row as served by the metadata API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawInternalProtocol {
    /// Id of the protocol this breakdown belongs to
    #[serde(deserialize_with = "null_string")]
    pub asc_id: String,
    /// Sub-protocol name
    #[serde(deserialize_with = "null_string")]
    pub name: String,
    /// Category
    #[serde(deserialize_with = "null_string")]
    pub category: String,
    /// Subcategory
    #[serde(deserialize_with = "null_string")]
    pub sub_category: String,
    /// Launch date
    pub live_at: Option<String>,
    /// Comma-joined privacy stack
    #[serde(deserialize_with = "null_string")]
    pub privacy_stack: String,
    /// Comma-joined tech stack
    #[serde(deserialize_with = "null_string")]
    pub tech_stack: String,
    /// Identity leakage score
    pub priv_who: Option<CriterionScore>,
    /// Action leakage score
    pub priv_what: Option<CriterionScore>,
    /// De-anonymization trust score
    pub de_anon: Option<CriterionScore>,
    /// Survivability score
    pub liveness_req: Option<CriterionScore>,
    /// Technology maturity score
    pub base_maturity: Option<CriterionScore>,
    /// Punk level
    pub punk_lv: Option<CriterionScore>,
    /// Overall score
    #[serde(deserialize_with = "lenient_f64")]
    pub overall_score: Option<f64>,
    /// Reviewer note
    pub note: Option<String>,
}

/// Payload of the metadata endpoint
///
/// Older deployments return a bare protocol array; newer ones wrap protocols
/// and internal scoring rows in an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDataset {
    /// `{ "protocols": [...], "internal_protocols": [...] }`
    Full {
        /// Protocol rows
        protocols: Vec<RawProtocol>,
        /// Scoring rows
        #[serde(default, alias = "internalProtocols")]
        internal_protocols: Vec<RawInternalProtocol>,
    },
    /// `[...]`
    Protocols(Vec<RawProtocol>),
}

impl RawDataset {
    /// Split into protocol and scoring rows
    #[must_use]
    pub fn into_parts(self) -> (Vec<RawProtocol>, Vec<RawInternalProtocol>) {
        match self {
            Self::Full {
                protocols,
                internal_protocols,
            } => (protocols, internal_protocols),
            Self::Protocols(protocols) => (protocols, Vec::new()),
        }
    }
}

/// A criterion score: numeric, or a free-text marker such as `"N/A"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionScore {
    /// Numeric score
    Number(f64),
    /// Free text
    Text(String),
}

impl CriterionScore {
    /// Numeric value, parsing text when it holds a number
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Where a DeFi slug points
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeriesSlug {
    /// `p:<slug>`, a protocol-level series
    Protocol(String),
    /// `c:<slug>`, a chain-level series
    Chain(String),
}

impl SeriesSlug {
    /// Parse `kind:providerSlug`
    ///
    /// Returns `None` for empty input, unknown kinds or an empty provider slug.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, slug) = raw.trim().split_once(':')?;
        let slug = slug.trim();
        if slug.is_empty() {
            return None;
        }
        match kind.trim() {
            "p" => Some(Self::Protocol(slug.to_string())),
            "c" => Some(Self::Chain(slug.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for SeriesSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(s) => write!(f, "p:{s}"),
            Self::Chain(s) => write!(f, "c:{s}"),
        }
    }
}

/// Normalized protocol record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolRecord {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Logo image
    pub logo: String,
    /// Website
    pub website: String,
    /// Free-text description
    pub description: Option<String>,
    /// Twitter / X profile
    pub twitter: Option<String>,
    /// Ordered, non-empty
    pub categories: Vec<String>,
    /// Ordered, non-empty
    pub sub_categories: Vec<String>,
    /// Launch date
    pub live_at: Option<String>,
    /// CoinGecko coin id
    pub market_id: Option<String>,
    /// DefiLlama slug (raw `kind:slug` form)
    pub defi_slug: Option<String>,
    /// Privacy component count
    pub ipc: u32,
    /// Overall score, `None` until scored
    pub overall_score: Option<f64>,
}

/// Normalized scoring breakdown of one sub-protocol
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalProtocol {
    /// Id of the owning protocol
    pub protocol_id: String,
    /// Sub-protocol name
    pub name: String,
    /// Category
    pub category: String,
    /// Subcategory
    pub sub_category: String,
    /// Launch date
    pub live_at: Option<String>,
    /// Privacy stack components
    pub privacy_stack: Vec<String>,
    /// Tech stack components
    pub tech_stack: Vec<String>,
    /// Identity leakage (who)
    pub priv_who: Option<CriterionScore>,
    /// Action leakage (what)
    pub priv_what: Option<CriterionScore>,
    /// De-anonymization trust assumption
    pub de_anon: Option<CriterionScore>,
    /// Protocol survivability
    pub liveness_req: Option<CriterionScore>,
    /// Underlying technology maturity
    pub base_maturity: Option<CriterionScore>,
    /// Punk level
    pub punk_level: Option<CriterionScore>,
    /// Overall score
    pub overall_score: Option<f64>,
    /// Reviewer note
    pub note: Option<String>,
}

/// Current market state of a coin
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    /// CoinGecko id
    pub id: String,
    /// Ticker
    pub symbol: String,
    /// Coin image
    pub image: Option<String>,
    /// Price in USD
    pub current_price: Option<f64>,
    /// Total token supply
    pub total_supply: Option<f64>,
    /// `current_price * total_supply`
    pub fdv: Option<f64>,
    /// 24h price change in percent
    pub change_24h: Option<f64>,
    /// Recent hourly prices, oldest first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sparkline: Vec<TimeSeriesPoint>,
}

/// Quality tier derived from the overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScoreTier {
    /// > 10.9
    S,
    /// > 8.9
    A,
    /// > 6.9
    B,
    /// > 4.9
    C,
    /// > 0.1
    D,
    /// Unscored or below every threshold
    #[serde(rename = "N/A")]
    Unrated,
}

impl ScoreTier {
    const THRESHOLDS: [(f64, Self); 5] = [
        (10.9, Self::S),
        (8.9, Self::A),
        (6.9, Self::B),
        (4.9, Self::C),
        (0.1, Self::D),
    ];

    /// Tier for an optional score
    #[must_use]
    pub fn from_score(score: Option<f64>) -> Self {
        score
            .and_then(|s| {
                Self::THRESHOLDS
                    .iter()
                    .find(|(gt, _)| s > *gt)
                    .map(|(_, tier)| *tier)
            })
            .unwrap_or(Self::Unrated)
    }
}

/// One row of the protocol overview table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolOverview {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Logo image
    pub logo: String,
    /// Ordered categories
    pub categories: Vec<String>,
    /// Ordered subcategories
    pub sub_categories: Vec<String>,
    /// Launch date
    pub live_at: Option<String>,
    /// Website
    pub website: String,
    /// Free-text description
    pub description: Option<String>,
    /// Latest TVL, `None` when untracked or unavailable
    pub tvl: Option<f64>,
    /// Share of the summed latest TVL of all protocols
    pub tvl_share: Option<f64>,
    /// Market snapshot, `None` without coin or on lookup miss
    pub coin: Option<MarketSnapshot>,
    /// Privacy component count
    pub ipc: u32,
    /// Overall score
    pub overall_score: Option<f64>,
    /// Tier of `overall_score`
    pub tier: ScoreTier,
}

/// Headline counts for the overview page
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewStats {
    /// Number of protocols
    pub protocols: usize,
    /// Distinct categories
    pub categories: usize,
    /// Distinct subcategories
    pub sub_categories: usize,
    /// Sum of latest TVLs
    pub total_tvl: f64,
}

/// Result of the overview assembly
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    /// One row per protocol, registry order
    pub protocols: Vec<ProtocolOverview>,
    /// Aligned TVL views across all protocols
    pub all_tvls: GranularityViews,
    /// Aligned FDV views across all protocols
    pub all_fdvs: GranularityViews,
    /// Headline counts
    pub stats: OverviewStats,
    /// When the assembly finished
    pub generated_at: DateTime<Utc>,
}

/// Result of the single-protocol assembly
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRecord {
    /// The matched protocol
    pub protocol: ProtocolRecord,
    /// Tier of its overall score
    pub tier: ScoreTier,
    /// Scoring breakdowns referencing it
    pub internal_protocols: Vec<InternalProtocol>,
    /// Its own aligned TVL views, `None` without a series
    pub tvl: Option<GranularityViews>,
    /// Summary of the `month` TVL view
    pub tvl_summary: Option<SeriesSummary>,
}

/// One tile of the dominance chart
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DominanceEntry {
    /// Protocol name
    pub name: String,
    /// Logo, empty when unknown
    pub logo: String,
    /// Value at the newest point
    pub tvl: f64,
    /// Share of the newest total
    pub share: f64,
    /// Change against the previous point (ratio)
    #[serde(rename = "change24h")]
    pub change_24h: f64,
    /// Values over the most recent points, zero where absent
    pub sparkline: Vec<f64>,
}

/// Treat `null` like a missing string
fn null_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept numbers, numeric strings, empty strings and null
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<CriterionScore>::deserialize(deserializer)?.and_then(|s| s.as_f64()))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_f64(deserializer)?.unwrap_or(0.0);
    if value.is_finite() && value >= 0.0 && value <= f64::from(u32::MAX) {
        Ok(value as u32)
    } else {
        Ok(0)
    }
}
