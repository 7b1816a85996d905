//! In-process [`OrderedStore`] backed by a sorted map.
//!
//! All cells live in one `BTreeMap<StorePath, f64>` behind a
//! `tokio::sync::RwLock`. A fold holds the write lock across read, update and
//! write, which makes every cell linearizable. Scans hold the read lock only
//! while collecting; the returned stream owns its entries.
//!
//! The store also carries the hooks tests need to exercise partial failure
//! and slow reads: failing path prefixes, a per-item scan delay and a fold
//! counter.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::RwLock;
use tracing::trace;

use super::{KeyRange, OrderedStore, ScanEntry, ScanLimit, StorePath, ValueRange, compare_keys};
use crate::error::StoreError;

/// Reason reported for injected failures.
const INJECTED_FAILURE: &str = "injected failure";

/// How operations under a failing prefix fail.
#[derive(Debug, Clone, Copy)]
enum Failure {
    Unavailable,
    Rejected,
}

#[derive(Debug, Default)]
struct Inner {
    cells: BTreeMap<StorePath, f64>,
    failing: Vec<(StorePath, Failure)>,
}

impl Inner {
    fn check(&self, path: &StorePath) -> Result<(), StoreError> {
        let failure = self
            .failing
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, failure)| *failure);
        match failure {
            None => Ok(()),
            Some(Failure::Unavailable) => Err(StoreError::Unavailable {
                path: path.to_string(),
                reason: INJECTED_FAILURE.to_string(),
            }),
            Some(Failure::Rejected) => Err(StoreError::Backend {
                path: path.to_string(),
                reason: INJECTED_FAILURE.to_string(),
            }),
        }
    }

    /// Collects `(child key, value)` for every direct child of `collection`
    /// holding a value at `child`.
    fn children(&self, collection: &StorePath, child: &StorePath) -> Vec<ScanEntry> {
        let depth = collection.len();
        let expected_len = depth + 1 + child.len();

        self.cells
            .range(collection.clone()..)
            .take_while(|(path, _)| path.starts_with(collection))
            .filter(|(path, _)| {
                path.len() == expected_len && path.segments()[depth + 1..] == *child.segments()
            })
            .map(|(path, value)| ScanEntry {
                key: path.segments()[depth].clone(),
                value: *value,
            })
            .collect()
    }
}

/// An in-memory ordered store.
///
/// # Example
///
/// ```rust
/// use rollup::store::{MemoryStore, OrderedStore, StorePath};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::new();
/// let path = StorePath::new(["default", "metrics", "default", "value~~sum"]);
///
/// store.fold(&path, &|old| old.unwrap_or(0.0) + 5.0).await?;
/// store.fold(&path, &|old| old.unwrap_or(0.0) + 2.0).await?;
/// assert_eq!(store.read(&path).await?, Some(7.0));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    scan_delay: Option<Duration>,
    folds: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every item of a value scan stream by `delay`.
    #[must_use]
    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = Some(delay);
        self
    }

    /// Makes every operation on a path under `prefix` fail with
    /// [`StoreError::Unavailable`].
    pub async fn fail_prefix(&self, prefix: StorePath) {
        self.inner
            .write()
            .await
            .failing
            .push((prefix, Failure::Unavailable));
    }

    /// Makes every operation on a path under `prefix` fail with
    /// [`StoreError::Backend`], as a reachable store refusing the request.
    pub async fn reject_prefix(&self, prefix: StorePath) {
        self.inner
            .write()
            .await
            .failing
            .push((prefix, Failure::Rejected));
    }

    /// Clears every failing prefix.
    pub async fn heal(&self) {
        self.inner.write().await.failing.clear();
    }

    /// Returns the number of folds applied successfully.
    pub fn fold_count(&self) -> u64 {
        self.folds.load(Ordering::Relaxed)
    }

    /// Returns a copy of every cell.
    pub async fn snapshot(&self) -> BTreeMap<StorePath, f64> {
        self.inner.read().await.cells.clone()
    }

    /// Returns the number of cells written so far.
    pub async fn len(&self) -> usize {
        self.inner.read().await.cells.len()
    }

    /// Returns true if nothing has been written.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.cells.is_empty()
    }
}

#[async_trait]
impl OrderedStore for MemoryStore {
    async fn fold(
        &self,
        path: &StorePath,
        update: &(dyn Fn(Option<f64>) -> f64 + Send + Sync),
    ) -> Result<f64, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check(path)?;

        let old = inner.cells.get(path).copied();
        let new = update(old);
        inner.cells.insert(path.clone(), new);
        self.folds.fetch_add(1, Ordering::Relaxed);

        trace!(%path, ?old, new, "folded cell");
        Ok(new)
    }

    async fn read(&self, path: &StorePath) -> Result<Option<f64>, StoreError> {
        let inner = self.inner.read().await;
        inner.check(path)?;
        Ok(inner.cells.get(path).copied())
    }

    async fn scan_by_value(
        &self,
        collection: &StorePath,
        child: &StorePath,
        range: ValueRange,
        limit: Option<ScanLimit>,
    ) -> Result<BoxStream<'static, Result<ScanEntry, StoreError>>, StoreError> {
        let mut entries = {
            let inner = self.inner.read().await;
            inner.check(collection)?;
            inner.children(collection, child)
        };

        entries.retain(|entry| range.contains(entry.value));
        entries.sort_by(|a, b| {
            a.value
                .total_cmp(&b.value)
                .then_with(|| compare_keys(&a.key, &b.key))
        });

        match limit {
            Some(ScanLimit::First(n)) => entries.truncate(n),
            Some(ScanLimit::Last(n)) => {
                let skip = entries.len().saturating_sub(n);
                entries.drain(..skip);
            }
            None => {}
        }

        trace!(%collection, %child, count = entries.len(), "value scan");
        let items = stream::iter(entries);
        Ok(match self.scan_delay {
            Some(delay) => items
                .then(move |entry| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, StoreError>(entry)
                })
                .boxed(),
            None => items.map(Ok).boxed(),
        })
    }

    async fn count_by_value(
        &self,
        collection: &StorePath,
        child: &StorePath,
        range: ValueRange,
    ) -> Result<usize, StoreError> {
        let inner = self.inner.read().await;
        inner.check(collection)?;
        Ok(inner
            .children(collection, child)
            .iter()
            .filter(|entry| range.contains(entry.value))
            .count())
    }

    async fn scan_by_key(
        &self,
        collection: &StorePath,
        child: &StorePath,
        range: KeyRange,
    ) -> Result<Vec<ScanEntry>, StoreError> {
        let mut entries = {
            let inner = self.inner.read().await;
            inner.check(collection)?;
            inner.children(collection, child)
        };

        entries.retain(|entry| range.contains(&entry.key));
        entries.sort_by(|a, b| compare_keys(&a.key, &b.key));
        trace!(%collection, %child, count = entries.len(), "key scan");
        Ok(entries)
    }
}
