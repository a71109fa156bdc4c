//! Per-request memoization
//!
//! One [`RequestCache`] lives for exactly one overview / detail assembly and
//! is passed down the call chain. Concurrent lookups of the same key share a
//! single in-flight fetch; failures are not memoized.
//!
//! Memoized: the registry, TVL series by slug and price histories by coin id.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use pracc_series::TimeSeriesPoint;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::model::SeriesSlug;
use crate::registry::Dataset;

type SeriesCell = Arc<OnceCell<Arc<Vec<TimeSeriesPoint>>>>;

/// Request-scoped memo of upstream payloads
#[derive(Default)]
pub struct RequestCache {
    dataset: OnceCell<Arc<Dataset>>,
    series: DashMap<SeriesSlug, SeriesCell>,
    history: DashMap<String, SeriesCell>,
    lookups: AtomicU64,
    fetches: AtomicU64,
}

impl RequestCache {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry, loaded at most once per request
    ///
    /// # Errors
    ///
    /// Propagates the loader's error; the next caller retries.
    pub async fn dataset<F, Fut>(&self, load: F) -> Result<Arc<Dataset>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Dataset>>,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.dataset
            .get_or_try_init(|| async move {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                load().await.map(Arc::new)
            })
            .await
            .cloned()
    }

    /// The series behind `slug`, fetched at most once per request
    ///
    /// # Errors
    ///
    /// Propagates the fetcher's error; the next caller retries.
    pub async fn series<F, Fut>(&self, slug: &SeriesSlug, fetch: F) -> Result<Arc<Vec<TimeSeriesPoint>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<TimeSeriesPoint>>>,
    {
        self.memoized(&self.series, slug.clone(), fetch).await
    }

    /// The daily price history of coin `id`, fetched at most once per request
    ///
    /// # Errors
    ///
    /// Propagates the fetcher's error; the next caller retries.
    pub async fn price_history<F, Fut>(&self, id: &str, fetch: F) -> Result<Arc<Vec<TimeSeriesPoint>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<TimeSeriesPoint>>>,
    {
        self.memoized(&self.history, id.to_string(), fetch).await
    }

    async fn memoized<K, F, Fut>(
        &self,
        cells: &DashMap<K, SeriesCell>,
        key: K,
        fetch: F,
    ) -> Result<Arc<Vec<TimeSeriesPoint>>>
    where
        K: Eq + Hash,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<TimeSeriesPoint>>>,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        // Clone the cell out so no map guard is held across the await.
        let cell = cells.entry(key).or_default().clone();
        cell.get_or_try_init(|| async move {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            fetch().await.map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Lookup counters so far
    #[must_use]
    pub fn stats(&self) -> RequestCacheStats {
        let lookups = self.lookups.load(Ordering::Relaxed);
        let fetches = self.fetches.load(Ordering::Relaxed);
        RequestCacheStats {
            hits: lookups.saturating_sub(fetches),
            misses: fetches,
            series: self.series.len(),
            coins: self.history.len(),
        }
    }
}

/// Counters of one [`RequestCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestCacheStats {
    /// Lookups served without a fetch
    pub hits: u64,
    /// Lookups that triggered a fetch
    pub misses: u64,
    /// Distinct slugs seen
    pub series: usize,
    /// Distinct coin ids seen
    pub coins: usize,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::{Error, Provider};

    fn slug(s: &str) -> SeriesSlug {
        SeriesSlug::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_fetch() {
        let cache = RequestCache::new();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok::<_, Error>(vec![TimeSeriesPoint::new(0, 1.0)])
        };

        let key = slug("p:railgun");
        let (a, b, c) = tokio::join!(
            cache.series(&key, fetch),
            cache.series(&key, fetch),
            cache.series(&key, fetch)
        );
        assert_eq!(a.unwrap().len(), 1);
        assert!(Arc::ptr_eq(&b.unwrap(), &c.unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.series, 1);
    }

    #[tokio::test]
    async fn test_distinct_slugs_fetch_separately() {
        let cache = RequestCache::new();
        cache
            .series(&slug("p:a"), || async { Ok::<_, Error>(Vec::new()) })
            .await
            .unwrap();
        cache
            .series(&slug("c:a"), || async { Ok::<_, Error>(Vec::new()) })
            .await
            .unwrap();
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_failures_are_retried() {
        let cache = RequestCache::new();
        let key = slug("p:flaky");

        let first = cache
            .series(&key, || async {
                Err::<Vec<TimeSeriesPoint>, _>(Error::upstream(Provider::DefiLlama, "timeout"))
            })
            .await;
        assert!(first.is_err());

        let second = cache
            .series(&key, || async { Ok::<_, Error>(vec![TimeSeriesPoint::new(1, 2.0)]) })
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn test_price_history_keyed_by_coin() {
        let cache = RequestCache::new();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(vec![TimeSeriesPoint::new(0, 3.0)])
        };

        let (a, b) = tokio::join!(
            cache.price_history("zcash", fetch),
            cache.price_history("zcash", fetch)
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        cache.price_history("monero", fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Same string as a slug does not collide with a coin id.
        cache
            .series(&slug("p:zcash"), || async { Ok::<_, Error>(Vec::new()) })
            .await
            .unwrap();
        let stats = cache.stats();
        assert_eq!(stats.coins, 2);
        assert_eq!(stats.series, 1);
        assert_eq!(stats.misses, 3);
    }

    #[tokio::test]
    async fn test_dataset_loaded_once() {
        let cache = RequestCache::new();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let load = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(Dataset::default())
        };

        cache.dataset(load).await.unwrap();
        cache.dataset(load).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
