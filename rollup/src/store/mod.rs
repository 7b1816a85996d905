//! Ordered store interface used by the aggregation engine.
//!
//! The engine never persists anything itself. Every aggregate lives in an
//! external ordered key-value store that provides per-cell atomic folds and
//! ordered range scans; [`OrderedStore`] is the contract such a store must
//! satisfy. [`MemoryStore`] is the in-process implementation.
//!
//! # Layout
//!
//! ```text
//! {dimension}/
//! ├── metrics/
//! │   └── {partition}/
//! │       └── {metric}                      <- scalar
//! └── retainers/
//!     └── {partition}/
//!         └── {retainer}/
//!             └── {bucket}/
//!                 └── {metric}              <- scalar
//! ```
//!
//! Value scans run over the children of a collection (`{dimension}/metrics`
//! for ranking partitions) and compare the scalar found at a fixed sub-path
//! below each child (`{metric}`). Key scans do the same, ordered by child key
//! (`{bucket}` under a retainer).

pub mod memory;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StoreError;
use crate::keys;

pub use memory::MemoryStore;

/// Segment name of the non-bucketed metric collection.
pub const METRICS_SEGMENT: &str = "metrics";

/// Segment name of the bucketed metric collection.
pub const RETAINERS_SEGMENT: &str = "retainers";

/// Returns `{dimension}/metrics`, whose children are partitions.
pub fn metrics_collection(dimension: &str) -> StorePath {
    StorePath::new([dimension, METRICS_SEGMENT])
}

/// Returns `{dimension}/retainers/{partition}/{retainer}`, whose children are buckets.
pub fn retainer_collection(dimension: &str, partition: &str, retainer: &str) -> StorePath {
    StorePath::new([dimension, RETAINERS_SEGMENT, partition, retainer])
}

/// A slash-separated logical path into the store.
///
/// Segments are kept apart so a key containing `/` can never be mistaken for
/// two levels.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath(Vec<String>);

impl StorePath {
    /// Creates a path from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Returns this path extended by one segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Returns this path extended by every segment of `other`.
    #[must_use]
    pub fn join(&self, other: &StorePath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// Returns the segments of this path.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns true if `prefix` is a leading run of this path's segments.
    pub fn starts_with(&self, prefix: &StorePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Inclusive bounds on a scanned value. `None` leaves a side open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValueRange {
    /// Lowest value included.
    pub start: Option<f64>,
    /// Highest value included.
    pub end: Option<f64>,
}

impl ValueRange {
    /// Matches every value.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches values `<= end`.
    pub fn at_most(end: f64) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// Matches values `>= start`.
    pub fn at_least(start: f64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Matches values in `start..=end`.
    pub fn between(start: f64, end: f64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Returns true if `value` lies within the range.
    pub fn contains(&self, value: f64) -> bool {
        self.start.is_none_or(|start| value >= start) && self.end.is_none_or(|end| value <= end)
    }
}

/// Inclusive bounds on a scanned child key, compared with [`compare_keys`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    /// Lowest key included.
    pub start: Option<String>,
    /// Highest key included.
    pub end: Option<String>,
}

impl KeyRange {
    /// Matches keys in `start..=end`.
    pub fn between(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    /// Returns true if `key` lies within the range.
    pub fn contains(&self, key: &str) -> bool {
        self.start
            .as_deref()
            .is_none_or(|start| compare_keys(key, start) != Ordering::Less)
            && self
                .end
                .as_deref()
                .is_none_or(|end| compare_keys(key, end) != Ordering::Greater)
    }
}

/// Truncation applied to an ascending value scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanLimit {
    /// Keep the `n` lowest entries.
    First(usize),
    /// Keep the `n` highest entries.
    Last(usize),
}

/// One child returned by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    /// Child key within the scanned collection.
    pub key: String,
    /// Value found at the child's sub-path.
    pub value: f64,
}

/// The ordered key-value store the engine folds aggregates into.
///
/// Implementations must make [`fold`](OrderedStore::fold) linearizable per
/// path: concurrent folds on the same cell serialize, and each one observes
/// the value left by the previous.
#[async_trait]
pub trait OrderedStore: Send + Sync {
    /// Atomically replaces the value at `path` with `update(current)`.
    ///
    /// `current` is `None` if the cell was never written. Returns the stored
    /// value after the update.
    async fn fold(
        &self,
        path: &StorePath,
        update: &(dyn Fn(Option<f64>) -> f64 + Send + Sync),
    ) -> Result<f64, StoreError>;

    /// Reads the value at `path`.
    async fn read(&self, path: &StorePath) -> Result<Option<f64>, StoreError>;

    /// Streams the children of `collection` whose value at `child` lies in
    /// `range`, ascending by value, ties broken by [`compare_keys`].
    ///
    /// `limit` truncates the ascending sequence from the front or the back;
    /// the stream stays ascending either way.
    async fn scan_by_value(
        &self,
        collection: &StorePath,
        child: &StorePath,
        range: ValueRange,
        limit: Option<ScanLimit>,
    ) -> Result<BoxStream<'static, Result<ScanEntry, StoreError>>, StoreError>;

    /// Counts the children [`scan_by_value`](OrderedStore::scan_by_value)
    /// would return without a limit.
    async fn count_by_value(
        &self,
        collection: &StorePath,
        child: &StorePath,
        range: ValueRange,
    ) -> Result<usize, StoreError>;

    /// Returns the children of `collection` whose key lies in `range` and
    /// that hold a value at `child`, ordered by [`compare_keys`].
    async fn scan_by_key(
        &self,
        collection: &StorePath,
        child: &StorePath,
        range: KeyRange,
    ) -> Result<Vec<ScanEntry>, StoreError>;
}

/// Orders child keys the way stores order them.
///
/// Canonical unsigned integers (bucket keys) compare numerically and sort
/// before every other key; the rest compare lexicographically.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (keys::parse_bucket_key(a), keys::parse_bucket_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
