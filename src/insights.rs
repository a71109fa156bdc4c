//! Derived views over an assembled overview

use std::collections::{HashMap, HashSet};

use pracc_series::{exclude, ratio_change};

use crate::model::{DominanceEntry, Overview, OverviewStats, ProtocolOverview};

/// Points of the `month` view shown as a dominance sparkline
pub const DOMINANCE_SPARKLINE: usize = 14;

/// Headline counts of a set of overview rows
#[must_use]
pub fn overview_stats(rows: &[ProtocolOverview]) -> OverviewStats {
    let categories: HashSet<&str> = rows
        .iter()
        .flat_map(|r| r.categories.iter().map(String::as_str))
        .collect();
    let sub_categories: HashSet<&str> = rows
        .iter()
        .flat_map(|r| r.sub_categories.iter().map(String::as_str))
        .collect();

    OverviewStats {
        protocols: rows.len(),
        categories: categories.len(),
        sub_categories: sub_categories.len(),
        total_tvl: rows.iter().filter_map(|r| r.tvl).sum(),
    }
}

/// Per-protocol share of the newest total TVL
///
/// The newest point of `allTvls.month` is split by protocol, compared with
/// the point before it and sorted by share, largest first.
#[must_use]
pub fn dominance(overview: &Overview) -> Vec<DominanceEntry> {
    let month = &overview.all_tvls.month;
    let Some(last) = month.last() else {
        return Vec::new();
    };
    let previous = month.len().checked_sub(2).map(|i| &month[i]);
    let window = &month[month.len().saturating_sub(DOMINANCE_SPARKLINE)..];
    let logos: HashMap<&str, &str> = overview
        .protocols
        .iter()
        .map(|p| (p.name.as_str(), p.logo.as_str()))
        .collect();

    let mut entries: Vec<DominanceEntry> = last
        .per_protocol
        .iter()
        .map(|(name, &value)| DominanceEntry {
            name: name.clone(),
            logo: logos
                .get(name.as_str())
                .map(|logo| (*logo).to_string())
                .unwrap_or_default(),
            tvl: value,
            share: if last.total > 0.0 {
                value / last.total
            } else {
                0.0
            },
            change_24h: previous
                .and_then(|p| p.per_protocol.get(name))
                .and_then(|&prev| ratio_change(prev, value))
                .unwrap_or(0.0),
            sparkline: window
                .iter()
                .map(|row| row.per_protocol.get(name).copied().unwrap_or(0.0))
                .collect(),
        })
        .collect();

    entries.sort_by(|a, b| {
        b.share
            .total_cmp(&a.share)
            .then_with(|| a.name.cmp(&b.name))
    });
    entries
}

/// Keep rows matching any selected category and any selected subcategory
///
/// An empty selection matches everything.
#[must_use]
pub fn filter_protocols<S: AsRef<str>>(
    rows: &[ProtocolOverview],
    categories: &[S],
    sub_categories: &[S],
) -> Vec<ProtocolOverview> {
    let matches = |have: &[String], wanted: &[S]| {
        wanted.is_empty()
            || have
                .iter()
                .any(|h| wanted.iter().any(|w| w.as_ref() == h.as_str()))
    };

    rows.iter()
        .filter(|r| matches(&r.categories, categories) && matches(&r.sub_categories, sub_categories))
        .cloned()
        .collect()
}

/// Overview with the named protocols removed from both view sets
#[must_use]
pub fn exclude_protocols<S: AsRef<str>>(overview: &Overview, names: &[S]) -> Overview {
    Overview {
        all_tvls: exclude(&overview.all_tvls, names),
        all_fdvs: exclude(&overview.all_fdvs, names),
        ..overview.clone()
    }
}
