//! Headline numbers for one view

use serde::{Deserialize, Serialize};

use crate::AlignedSeriesPoint;

/// Latest value and relative changes of a view
///
/// Changes are ratios (`0.1` means +10%).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSummary {
    /// Total at the newest point
    pub current: Option<f64>,
    /// Newest point against the one before it
    #[serde(rename = "change24h")]
    pub change_24h: Option<f64>,
    /// Newest point against the oldest point of the view
    pub change_window: Option<f64>,
}

/// Summarize an ascending view
#[must_use]
pub fn summarize(view: &[AlignedSeriesPoint]) -> SeriesSummary {
    let Some(last) = view.last() else {
        return SeriesSummary::default();
    };
    let previous = view.len().checked_sub(2).map(|i| &view[i]);

    SeriesSummary {
        current: Some(last.total),
        change_24h: previous.and_then(|p| ratio_change(p.total, last.total)),
        change_window: view.first().and_then(|f| ratio_change(f.total, last.total)),
    }
}

/// `(to - from) / from`, undefined when `from` is zero
#[must_use]
pub fn ratio_change(from: f64, to: f64) -> Option<f64> {
    (from != 0.0 && from.is_finite() && to.is_finite()).then(|| (to - from) / from)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn row(timestamp: i64, total: f64) -> AlignedSeriesPoint {
        AlignedSeriesPoint::from_values(timestamp, BTreeMap::from([("a".to_string(), total)]))
    }

    #[test]
    fn test_summary() {
        let view = vec![row(0, 50.0), row(1, 100.0), row(2, 110.0)];
        let summary = summarize(&view);

        assert_eq!(summary.current, Some(110.0));
        assert!((summary.change_24h.unwrap() - 0.1).abs() < 1e-9);
        assert!((summary.change_window.unwrap() - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_single_point() {
        let summary = summarize(&[row(0, 10.0)]);
        assert_eq!(summary.current, Some(10.0));
        assert_eq!(summary.change_24h, None);
        assert_eq!(summary.change_window, Some(0.0));
    }

    #[test]
    fn test_empty_view() {
        assert_eq!(summarize(&[]), SeriesSummary::default());
    }

    #[test]
    fn test_zero_reference() {
        assert_eq!(ratio_change(0.0, 5.0), None);
        assert_eq!(ratio_change(4.0, 5.0), Some(0.25));
    }
}
