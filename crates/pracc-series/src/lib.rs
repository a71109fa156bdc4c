//! Calendar alignment of per-protocol value series
//!
//! Pure, allocation-only building blocks shared by the overview and detail
//! assemblers: daily bucketing, the sparse `timestamp -> {name: value}` grid,
//! the `month` / `year` / `all` down-sampled views, exclusion filtering and
//! change summaries. No I/O lives here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod align;
mod resample;
mod summary;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use align::{Aligner, AllStride, align, exclude};
pub use resample::resample_latest;
pub use summary::{SeriesSummary, ratio_change, summarize};

/// Seconds in one UTC day
pub const DAY: i64 = 86_400;
/// Seconds in twelve hours (sparkline bucket width)
pub const HALF_DAY: i64 = 43_200;

/// Maximum points in the `month` view
pub const MONTH_POINTS: usize = 60;
/// Raw points considered for the `year` view before down-sampling
pub const YEAR_POINTS: usize = 520;
/// Stride of the `year` view (weekly)
pub const YEAR_STRIDE: usize = 7;
/// Stride of the multi-protocol `all` view (monthly)
pub const ALL_STRIDE: usize = 30;

/// One raw observation from an upstream series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// Observed value (USD)
    pub value: f64,
}

impl TimeSeriesPoint {
    /// Create a point
    #[must_use]
    pub const fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// One calendar-aligned row of the merged table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignedSeriesPoint {
    /// Start of the UTC day this row represents
    pub timestamp: i64,
    /// Sum of `per_protocol`
    pub total: f64,
    /// Values of the protocols that reported on this day (sparse)
    pub per_protocol: BTreeMap<String, f64>,
}

impl AlignedSeriesPoint {
    /// Build a row, deriving `total` from the per-protocol values
    #[must_use]
    pub fn from_values(timestamp: i64, per_protocol: BTreeMap<String, f64>) -> Self {
        let total = per_protocol.values().sum();
        Self {
            timestamp,
            total,
            per_protocol,
        }
    }
}

/// Named down-sampled windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Daily points, most recent window
    Month,
    /// Weekly points, one-year window
    Year,
    /// Monthly points, full history
    All,
}

impl Granularity {
    /// All granularities, finest first
    pub const ALL: [Self; 3] = [Self::Month, Self::Year, Self::All];
}

/// The three views of one merged table, each ascending by timestamp
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GranularityViews {
    /// Finest view
    pub month: Vec<AlignedSeriesPoint>,
    /// Weekly view
    pub year: Vec<AlignedSeriesPoint>,
    /// Monthly view over the full history
    pub all: Vec<AlignedSeriesPoint>,
}

impl GranularityViews {
    /// Borrow one view
    #[must_use]
    pub fn view(&self, granularity: Granularity) -> &[AlignedSeriesPoint] {
        match granularity {
            Granularity::Month => &self.month,
            Granularity::Year => &self.year,
            Granularity::All => &self.all,
        }
    }

    /// True when no view holds any point
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.month.is_empty() && self.year.is_empty() && self.all.is_empty()
    }
}

/// Start of the UTC day containing `timestamp`
#[must_use]
pub const fn start_of_day(timestamp: i64) -> i64 {
    bucket_start(timestamp, DAY)
}

/// Start of the `width`-second bucket containing `timestamp`
#[must_use]
pub const fn bucket_start(timestamp: i64, width: i64) -> i64 {
    timestamp - timestamp.rem_euclid(width)
}
