//! Sparse daily grid and the down-sampled views built from it

use std::collections::{BTreeMap, HashSet};

use crate::{
    ALL_STRIDE, AlignedSeriesPoint, GranularityViews, MONTH_POINTS, TimeSeriesPoint, YEAR_POINTS,
    YEAR_STRIDE, start_of_day,
};

/// Stride used to down-sample the `all` view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllStride {
    /// Keep every n-th point (n >= 1)
    Fixed(usize),
    /// `clamp(len / 30, 1, 30)`, for single short series
    Adaptive,
}

impl AllStride {
    /// The multi-protocol default
    pub const OVERVIEW: Self = Self::Fixed(ALL_STRIDE);

    /// Resolve against the number of aligned points
    #[must_use]
    pub fn resolve(self, len: usize) -> usize {
        match self {
            Self::Fixed(n) => n.max(1),
            Self::Adaptive => (len / ALL_STRIDE).clamp(1, ALL_STRIDE),
        }
    }
}

/// A value that landed in a day bucket, with the timestamp it came from
#[derive(Debug, Clone, Copy)]
struct Slot {
    value: f64,
    source_timestamp: i64,
}

/// Accumulates named series into a sparse `day -> {name: value}` grid
#[derive(Debug, Default, Clone)]
pub struct Aligner {
    grid: BTreeMap<i64, BTreeMap<String, Slot>>,
}

impl Aligner {
    /// Create an empty aligner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one protocol's raw series
    ///
    /// Zero, negative and non-finite values never enter the grid. When two
    /// points of the same series land on the same UTC day, the one with the
    /// later original timestamp wins; equal timestamps keep the later input.
    pub fn add_series(&mut self, name: &str, points: &[TimeSeriesPoint]) {
        for point in points {
            if !point.value.is_finite() || point.value <= 0.0 {
                continue;
            }
            let day = self.grid.entry(start_of_day(point.timestamp)).or_default();
            let incoming = Slot {
                value: point.value,
                source_timestamp: point.timestamp,
            };
            match day.get_mut(name) {
                Some(slot) if slot.source_timestamp > point.timestamp => {}
                Some(slot) => *slot = incoming,
                None => {
                    day.insert(name.to_string(), incoming);
                }
            }
        }
    }

    /// Number of distinct days in the grid
    #[must_use]
    pub fn len(&self) -> usize {
        self.grid.len()
    }

    /// True when nothing has been added
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    /// Every aligned row, ascending
    #[must_use]
    pub fn rows(&self) -> Vec<AlignedSeriesPoint> {
        self.grid
            .iter()
            .map(|(&timestamp, slots)| {
                AlignedSeriesPoint::from_values(
                    timestamp,
                    slots
                        .iter()
                        .map(|(name, slot)| (name.clone(), slot.value))
                        .collect(),
                )
            })
            .collect()
    }

    /// Build the `month`, `year` and `all` views
    #[must_use]
    pub fn views(&self, stride: AllStride) -> GranularityViews {
        let rows = self.rows();
        let all_stride = stride.resolve(rows.len());

        GranularityViews {
            month: most_recent(&rows, MONTH_POINTS).to_vec(),
            year: every_nth_from_latest(most_recent(&rows, YEAR_POINTS), YEAR_STRIDE),
            all: every_nth_from_latest(&rows, all_stride),
        }
    }
}

/// Align a set of named series in one call
#[must_use]
pub fn align<'a, I>(series: I, stride: AllStride) -> GranularityViews
where
    I: IntoIterator<Item = (&'a str, &'a [TimeSeriesPoint])>,
{
    let mut aligner = Aligner::new();
    for (name, points) in series {
        aligner.add_series(name, points);
    }
    aligner.views(stride)
}

/// Remove the named protocols from every view
///
/// Totals are recomputed from what remains. Points at the head of a view that
/// end up empty are dropped so the first point has a positive total.
#[must_use]
pub fn exclude<S: AsRef<str>>(views: &GranularityViews, names: &[S]) -> GranularityViews {
    let excluded: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
    if excluded.is_empty() {
        return views.clone();
    }

    let filter = |rows: &[AlignedSeriesPoint]| -> Vec<AlignedSeriesPoint> {
        rows.iter()
            .map(|row| {
                AlignedSeriesPoint::from_values(
                    row.timestamp,
                    row.per_protocol
                        .iter()
                        .filter(|(name, _)| !excluded.contains(name.as_str()))
                        .map(|(name, value)| (name.clone(), *value))
                        .collect(),
                )
            })
            .skip_while(|row| row.per_protocol.is_empty())
            .collect()
    };

    GranularityViews {
        month: filter(&views.month),
        year: filter(&views.year),
        all: filter(&views.all),
    }
}

fn most_recent(rows: &[AlignedSeriesPoint], n: usize) -> &[AlignedSeriesPoint] {
    &rows[rows.len().saturating_sub(n)..]
}

/// Walk back from the newest row keeping every `stride`-th, then restore order
fn every_nth_from_latest(rows: &[AlignedSeriesPoint], stride: usize) -> Vec<AlignedSeriesPoint> {
    let mut kept: Vec<AlignedSeriesPoint> =
        rows.iter().rev().step_by(stride.max(1)).cloned().collect();
    kept.reverse();
    kept
}
