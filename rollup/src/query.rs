//! Query builder: the read path.
//!
//! A query is built in stages, each an immutable value that can be cloned and
//! reused:
//!
//! 1. [`ReportQuery`]: a dimension, and optionally one partition of it
//! 2. [`MetricQuery`]: a property aggregated by one reducer
//! 3. terminal reads on the metric: [`value`](MetricQuery::value),
//!    [`select`](MetricQuery::select), [`count`](MetricQuery::count) and the
//!    [`CountQuery`] comparisons, or [`during`](MetricQuery::during) for
//!    time-bucketed reads through a [`RetainerQuery`]
//!
//! Partition keys are derived with the same [`crate::keys::KeyCodec`] the
//! engine writes with, so a query selecting `{mode: 1}` reads exactly the
//! cells ingestion of a record with `mode: 1` folded into.
//!
//! Every name is validated when the stage is built, before the store is
//! touched. Terminal reads never mutate anything and may be repeated.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rollup::{Catalog, MemoryStore, Order, Record, Reporting};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut catalog = Catalog::new();
//! catalog.add_dimension("by_mode", ["mode"])?;
//! catalog.add_metric("value", ["sum"])?;
//! let reporting = Reporting::new(Arc::new(MemoryStore::new()), catalog);
//!
//! reporting
//!     .ingest(&[
//!         Record::new().with("value", 50).with("mode", 1),
//!         Record::new().with("value", 2).with("mode", 2),
//!         Record::new().with("value", 5).with("mode", 1),
//!     ])
//!     .await?;
//!
//! // Point read of one partition.
//! let mode_one = Record::new().with("mode", 1);
//! let sum = reporting.select("by_mode", Some(&mode_one))?.sum("value")?;
//! assert_eq!(sum.value().await?, Some(55.0));
//!
//! // Ranking and counting across every partition of the dimension.
//! let sums = reporting.select("by_mode", None)?.sum("value")?;
//! assert_eq!(sums.select(2, Order::Desc).await?, vec![55.0, 2.0]);
//! assert_eq!(sums.greater(5.0).count().await?, 1);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use futures::StreamExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::catalog::{self, DEFAULT_DIMENSION, Retainer};
use crate::engine::Reporting;
use crate::error::{LookupError, QueryError, Result};
use crate::keys::{self, DEFAULT_PARTITION};
use crate::record::Record;
use crate::reducer::BuiltinReducer;
use crate::store::{self, KeyRange, OrderedStore, ScanEntry, ScanLimit, StorePath, ValueRange};

/// Sort order of a ranked select.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Lowest values first.
    Asc,
    /// Highest values first.
    #[default]
    Desc,
}

/// How a time-bucketed read treats buckets nothing was folded into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapFill {
    /// Return every bucket in the range; empty ones read as `0.0`.
    #[default]
    Zero,
    /// Return only buckets holding a value.
    Omit,
}

/// The value of one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketValue {
    /// Bucket key.
    pub bucket: String,
    /// Start of the bucket in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Aggregate value, `0.0` for gap-filled buckets.
    pub value: f64,
}

/// One partition of a ranked select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPartition {
    /// Partition key.
    pub partition: String,
    /// Value of the selected metric in this partition.
    pub value: f64,
}

/// `property -> reducer -> value` for one partition.
pub type MetricSnapshot = BTreeMap<String, BTreeMap<String, Option<f64>>>;

impl<S: OrderedStore> Reporting<S> {
    /// Starts a query on the `default` dimension.
    pub fn query(&self) -> ReportQuery<S> {
        ReportQuery {
            reporting: self.clone(),
            dimension: DEFAULT_DIMENSION.to_string(),
            partition: Some(DEFAULT_PARTITION.to_string()),
        }
    }

    /// Starts a query on `dimension`.
    ///
    /// With `values`, the query is bound to the partition those property
    /// values map to. Without, it spans every partition of the dimension,
    /// which ranked selects and counts need; `default` always has exactly one
    /// partition and is bound either way.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownDimension`] if the dimension does not exist.
    pub fn select(&self, dimension: &str, values: Option<&Record>) -> Result<ReportQuery<S>> {
        let partition = match values {
            Some(values) => Some(self.catalog.partition_key(dimension, values)?),
            None if dimension == DEFAULT_DIMENSION => Some(DEFAULT_PARTITION.to_string()),
            None => {
                self.catalog.dimension(dimension)?;
                None
            }
        };

        Ok(ReportQuery {
            reporting: self.clone(),
            dimension: dimension.to_string(),
            partition,
        })
    }
}

/// A dimension, optionally narrowed to one partition.
#[derive(Debug)]
pub struct ReportQuery<S> {
    reporting: Reporting<S>,
    dimension: String,
    partition: Option<String>,
}

impl<S> Clone for ReportQuery<S> {
    fn clone(&self) -> Self {
        Self {
            reporting: self.reporting.clone(),
            dimension: self.dimension.clone(),
            partition: self.partition.clone(),
        }
    }
}

macro_rules! builtin_metric {
    ($($(#[$doc:meta])* $name:ident => $reducer:expr;)*) => {
        $(
            $(#[$doc])*
            ///
            /// # Errors
            ///
            /// Returns [`LookupError::UnknownMetric`] if no metric rule
            /// aggregates `property` with this reducer.
            pub fn $name(&self, property: &str) -> Result<MetricQuery<S>> {
                self.metric(property, $reducer.name())
            }
        )*
    };
}

impl<S: OrderedStore> ReportQuery<S> {
    /// Returns the dimension name.
    pub fn dimension(&self) -> &str {
        &self.dimension
    }

    /// Returns the bound partition key, if any.
    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }

    /// Selects `property` aggregated by `reducer`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownReducer`] if the reducer does not exist
    /// and [`LookupError::UnknownMetric`] if no metric rule aggregates
    /// `property` with it.
    pub fn metric(&self, property: &str, reducer: &str) -> Result<MetricQuery<S>> {
        let catalog = &self.reporting.catalog;
        catalog.check_metric(property, reducer)?;

        Ok(MetricQuery {
            report: self.clone(),
            property: property.to_string(),
            reducer: reducer.to_string(),
            metric: catalog.metric_key(property, reducer),
        })
    }

    builtin_metric! {
        /// Selects the largest observation of `property`.
        max => BuiltinReducer::Max;
        /// Selects the smallest observation of `property`.
        min => BuiltinReducer::Min;
        /// Selects the first observation of `property`.
        first => BuiltinReducer::First;
        /// Selects the latest observation of `property`.
        last => BuiltinReducer::Last;
        /// Selects the sum of `property`.
        sum => BuiltinReducer::Sum;
        /// Selects the running difference of `property`.
        diff => BuiltinReducer::Diff;
        /// Selects the running product of `property`.
        multi => BuiltinReducer::Multi;
        /// Selects the running quotient of `property`.
        div => BuiltinReducer::Div;
    }

    /// Reads every configured metric of the bound partition.
    ///
    /// Covers each `(property, reducer)` pair a metric rule aggregates,
    /// including reducers only enabled through a retainer. Those are never
    /// folded outside time buckets, so they read as `None` here, as do cells
    /// never written.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::PartitionNotSelected`] for an unbound query and
    /// the first store error encountered otherwise.
    pub async fn metrics(&self) -> Result<MetricSnapshot> {
        let partition = self.bound_partition()?;
        let catalog = &self.reporting.catalog;
        let store = &self.reporting.store;

        let cells: Vec<(&str, &str, StorePath)> = catalog
            .metrics()
            .flat_map(|(property, rule)| {
                rule.all_reducers().into_iter().map(move |reducer| {
                    let path = store::metrics_collection(&self.dimension)
                        .child(partition)
                        .child(catalog.metric_key(property, reducer));
                    (property, reducer, path)
                })
            })
            .collect();

        let values = join_all(cells.iter().map(|(_, _, path)| store.read(path))).await;

        let mut snapshot = MetricSnapshot::new();
        for (property, _) in catalog.metrics() {
            snapshot.entry(property.to_string()).or_default();
        }
        for ((property, reducer, _), value) in cells.iter().zip(values) {
            snapshot
                .entry(property.to_string())
                .or_default()
                .insert(reducer.to_string(), value?);
        }
        Ok(snapshot)
    }

    fn bound_partition(&self) -> Result<&str> {
        self.partition.as_deref().ok_or_else(|| {
            QueryError::PartitionNotSelected {
                dimension: self.dimension.clone(),
            }
            .into()
        })
    }
}

/// A report query bound to one metric.
#[derive(Debug)]
pub struct MetricQuery<S> {
    report: ReportQuery<S>,
    property: String,
    reducer: String,
    metric: String,
}

impl<S> Clone for MetricQuery<S> {
    fn clone(&self) -> Self {
        Self {
            report: self.report.clone(),
            property: self.property.clone(),
            reducer: self.reducer.clone(),
            metric: self.metric.clone(),
        }
    }
}

impl<S: OrderedStore> MetricQuery<S> {
    /// Returns the property name.
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Returns the reducer name.
    pub fn reducer(&self) -> &str {
        &self.reducer
    }

    /// Returns the metric key cells are stored under.
    pub fn metric_key(&self) -> &str {
        &self.metric
    }

    /// Reads the metric in the bound partition.
    ///
    /// Returns `None` if nothing was ever folded into the cell, which is
    /// distinct from a stored `0.0`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::PartitionNotSelected`] for an unbound query, or
    /// the store error.
    pub async fn value(&self) -> Result<Option<f64>> {
        let partition = self.report.bound_partition()?;
        let path = self
            .collection()
            .child(partition)
            .child(self.metric.as_str());
        Ok(self.report.reporting.store.read(&path).await?)
    }

    /// Returns the `limit` highest (`Desc`) or lowest (`Asc`) values of the
    /// metric across all partitions of the dimension, sorted in `order`.
    ///
    /// # Errors
    ///
    /// See [`MetricQuery::ranked`].
    pub async fn select(&self, limit: usize, order: Order) -> Result<Vec<f64>> {
        let ranked = self.ranked(limit, order).await?;
        Ok(ranked.into_iter().map(|r| r.value).collect())
    }

    /// Like [`MetricQuery::select`], keeping the partition key of each value.
    ///
    /// The scan runs under the catalog's
    /// [`select_timeout`](crate::catalog::Options::select_timeout). When the
    /// deadline passes first, whatever arrived so far is returned, sorted.
    /// Partitions never observed for this metric are not ranked.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidLimit`] if `limit` is zero, or the store
    /// error.
    pub async fn ranked(&self, limit: usize, order: Order) -> Result<Vec<RankedPartition>> {
        if limit == 0 {
            return Err(QueryError::InvalidLimit { limit }.into());
        }

        let reporting = &self.report.reporting;
        let deadline = Instant::now() + reporting.catalog.options().select_timeout;
        let scan_limit = match order {
            Order::Asc => ScanLimit::First(limit),
            Order::Desc => ScanLimit::Last(limit),
        };

        let collection = self.collection();
        let child = self.child();
        let mut ranked = Vec::new();
        let scan =
            reporting
                .store
                .scan_by_value(&collection, &child, ValueRange::all(), Some(scan_limit));

        match timeout_at(deadline, scan).await {
            Ok(stream) => {
                let mut stream = stream?;
                while ranked.len() < limit {
                    match timeout_at(deadline, stream.next()).await {
                        Ok(Some(entry)) => {
                            let ScanEntry { key, value } = entry?;
                            ranked.push(RankedPartition {
                                partition: key,
                                value,
                            });
                        }
                        Ok(None) => break,
                        Err(_) => {
                            self.warn_timeout(ranked.len(), limit);
                            break;
                        }
                    }
                }
            }
            Err(_) => self.warn_timeout(0, limit),
        }

        match order {
            Order::Asc => ranked.sort_by(|a, b| a.value.total_cmp(&b.value)),
            Order::Desc => ranked.sort_by(|a, b| b.value.total_cmp(&a.value)),
        }
        Ok(ranked)
    }

    /// Counts the partitions holding this metric.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn count(&self) -> Result<usize> {
        self.count_in(ValueRange::all()).await
    }

    /// Restricts the count to values `<= value`.
    pub fn lesser(&self, value: f64) -> CountQuery<S> {
        self.comparison(ValueRange::at_most(value))
    }

    /// Restricts the count to values `>= value`.
    pub fn greater(&self, value: f64) -> CountQuery<S> {
        self.comparison(ValueRange::at_least(value))
    }

    /// Restricts the count to values in `start..=end`.
    pub fn between(&self, start: f64, end: f64) -> CountQuery<S> {
        self.comparison(ValueRange::between(start, end))
    }

    /// Restricts the count to values equal to `value`; same as
    /// `between(value, value)`.
    pub fn equal(&self, value: f64) -> CountQuery<S> {
        self.between(value, value)
    }

    /// Switches to the time buckets of `retainer` between two timestamps.
    ///
    /// # Errors
    ///
    /// Fails before touching the store with
    /// [`LookupError::UnknownRetainer`] if the retainer cannot be resolved,
    /// [`LookupError::RetainerNotEnabled`] if it does not bucket this metric,
    /// [`QueryError::PartitionNotSelected`] for an unbound query, or
    /// [`QueryError::InvalidTimeRange`] if `start_ms > end_ms`.
    pub fn during(&self, retainer: &str, start_ms: u64, end_ms: u64) -> Result<RetainerQuery<S>> {
        let catalog = &self.report.reporting.catalog;
        let resolved = catalog.retainer(retainer)?;

        let enabled = catalog
            .metric(&self.property)
            .is_some_and(|rule| rule.retains(retainer, &self.reducer));
        if !enabled {
            return Err(LookupError::RetainerNotEnabled {
                retainer: retainer.to_string(),
                property: self.property.clone(),
                reducer: self.reducer.clone(),
            }
            .into());
        }

        self.report.bound_partition()?;
        if start_ms > end_ms {
            return Err(QueryError::InvalidTimeRange {
                start: start_ms,
                end: end_ms,
            }
            .into());
        }

        Ok(RetainerQuery {
            metric: self.clone(),
            retainer: resolved,
            start_ms,
            end_ms,
        })
    }

    fn comparison(&self, range: ValueRange) -> CountQuery<S> {
        CountQuery {
            metric: self.clone(),
            range,
        }
    }

    async fn count_in(&self, range: ValueRange) -> Result<usize> {
        let count = self
            .report
            .reporting
            .store
            .count_by_value(&self.collection(), &self.child(), range)
            .await?;
        debug!(metric = %self.metric, dimension = %self.report.dimension, ?range, count, "counted partitions");
        Ok(count)
    }

    fn collection(&self) -> StorePath {
        store::metrics_collection(&self.report.dimension)
    }

    fn child(&self) -> StorePath {
        StorePath::new([self.metric.as_str()])
    }

    fn warn_timeout(&self, received: usize, limit: usize) {
        warn!(
            "Select on {} in {} timed out, returning {received} of {limit} values",
            self.metric, self.report.dimension
        );
    }
}

/// A metric query narrowed to a value range, for counting partitions.
#[derive(Debug)]
pub struct CountQuery<S> {
    metric: MetricQuery<S>,
    range: ValueRange,
}

impl<S> Clone for CountQuery<S> {
    fn clone(&self) -> Self {
        Self {
            metric: self.metric.clone(),
            range: self.range,
        }
    }
}

impl<S: OrderedStore> CountQuery<S> {
    /// Returns the inclusive value range being counted.
    pub fn range(&self) -> ValueRange {
        self.range
    }

    /// Counts the partitions whose value lies in the range.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn count(&self) -> Result<usize> {
        self.metric.count_in(self.range).await
    }
}

/// A metric query over the time buckets of one retainer.
#[derive(Debug)]
pub struct RetainerQuery<S> {
    metric: MetricQuery<S>,
    retainer: Retainer,
    start_ms: u64,
    end_ms: u64,
}

impl<S> Clone for RetainerQuery<S> {
    fn clone(&self) -> Self {
        Self {
            metric: self.metric.clone(),
            retainer: self.retainer.clone(),
            start_ms: self.start_ms,
            end_ms: self.end_ms,
        }
    }
}

impl<S: OrderedStore> RetainerQuery<S> {
    /// Returns the resolved retainer.
    pub fn retainer(&self) -> &Retainer {
        &self.retainer
    }

    /// Returns the bucket values between the start and end bucket, inclusive,
    /// ordered by time.
    ///
    /// With [`GapFill::Zero`] every bucket of the range is present and empty
    /// buckets read as `0.0`; with [`GapFill::Omit`] only written buckets are.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::TooManyBuckets`] if a zero-filled range is too
    /// wide, or the store error.
    pub async fn values(&self, fill: GapFill) -> Result<Vec<BucketValue>> {
        let duration_ms = self.retainer.duration_ms();
        if fill == GapFill::Zero {
            catalog::check_fill_range(&self.retainer, self.start_ms, self.end_ms)?;
        }

        let first = keys::bucket_index(duration_ms, self.start_ms);
        let last = keys::bucket_index(duration_ms, self.end_ms);
        let report = &self.metric.report;
        let partition = report.bound_partition()?;
        let collection = store::retainer_collection(&report.dimension, partition, &self.retainer.name);

        let entries = report
            .reporting
            .store
            .scan_by_key(
                &collection,
                &self.metric.child(),
                KeyRange::between(keys::bucket_key(first), keys::bucket_key(last)),
            )
            .await?;

        let observed = entries
            .into_iter()
            .filter_map(|entry| keys::parse_bucket_key(&entry.key).map(|index| (index, entry.value)));

        let buckets: BTreeMap<u64, f64> = match fill {
            GapFill::Zero => {
                let mut buckets = keys::empty_bucket_range(duration_ms, self.start_ms, self.end_ms);
                buckets.extend(observed);
                buckets
            }
            GapFill::Omit => observed.collect(),
        };

        debug!(
            metric = %self.metric.metric,
            retainer = %self.retainer.name,
            buckets = buckets.len(),
            "read retained buckets"
        );

        Ok(buckets
            .into_iter()
            .map(|(index, value)| BucketValue {
                bucket: keys::bucket_key(index),
                timestamp: self.retainer.bucket_start(index),
                value,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::catalog::Catalog;
    use crate::error::RollupError;
    use crate::store::MemoryStore;

    fn reporting() -> Reporting<MemoryStore> {
        let mut catalog = Catalog::new();
        catalog.add_dimension("by_mode", ["mode"]).unwrap();
        catalog.add_metric("value", ["sum", "max", "diff"]).unwrap();
        catalog.enable_retainer("second", "value", ["sum"]).unwrap();
        Reporting::new(Arc::new(MemoryStore::new()), catalog)
    }

    async fn seeded() -> Reporting<MemoryStore> {
        let reporting = reporting();
        let records = [(50, 1), (2, 2), (5, 1)];
        for (value, mode) in records {
            reporting
                .ingest_at(&[Record::new().with("value", value).with("mode", mode)], 1_000)
                .await
                .unwrap();
        }
        reporting
    }

    fn mode(value: i64) -> Record {
        Record::new().with("mode", value)
    }

    #[tokio::test]
    async fn test_value_reads_default_partition() {
        let reporting = seeded().await;
        let query = reporting.query();

        assert_eq!(query.sum("value").unwrap().value().await.unwrap(), Some(57.0));
        assert_eq!(query.max("value").unwrap().value().await.unwrap(), Some(50.0));
        assert_eq!(query.diff("value").unwrap().value().await.unwrap(), Some(43.0));
    }

    #[tokio::test]
    async fn test_value_is_idempotent() {
        let reporting = seeded().await;
        let sum = reporting.select("by_mode", Some(&mode(1))).unwrap().sum("value").unwrap();

        let first = sum.value().await.unwrap();
        let second = sum.value().await.unwrap();
        assert_eq!(first, Some(55.0));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_value_of_unobserved_partition_is_none() {
        let reporting = seeded().await;
        let sum = reporting.select("by_mode", Some(&mode(3))).unwrap().sum("value").unwrap();
        assert_eq!(sum.value().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_value_requires_partition() {
        let reporting = seeded().await;
        let sum = reporting.select("by_mode", None).unwrap().sum("value").unwrap();

        match sum.value().await.unwrap_err() {
            RollupError::Query(QueryError::PartitionNotSelected { dimension }) => {
                assert_eq!(dimension, "by_mode");
            }
            other => panic!("Expected PartitionNotSelected error, got {other:?}"),
        }
    }

    #[test]
    fn test_metric_selection_errors() {
        let reporting = reporting();
        let query = reporting.query();

        assert!(matches!(
            query.min("value"),
            Err(RollupError::Lookup(LookupError::UnknownMetric { .. }))
        ));
        assert!(matches!(
            query.sum("other"),
            Err(RollupError::Lookup(LookupError::UnknownMetric { .. }))
        ));
        assert!(matches!(
            query.metric("value", "median"),
            Err(RollupError::Lookup(LookupError::UnknownReducer { .. }))
        ));
        assert!(matches!(
            reporting.select("by_host", None),
            Err(RollupError::Lookup(LookupError::UnknownDimension { .. }))
        ));
    }

    #[tokio::test]
    async fn test_select_orders_and_limits() {
        let reporting = seeded().await;
        let sums = reporting.select("by_mode", None).unwrap().sum("value").unwrap();

        assert_eq!(sums.select(1, Order::Desc).await.unwrap(), vec![55.0]);
        assert_eq!(sums.select(1, Order::Asc).await.unwrap(), vec![2.0]);
        assert_eq!(sums.select(10, Order::Desc).await.unwrap(), vec![55.0, 2.0]);
        assert_eq!(sums.select(10, Order::Asc).await.unwrap(), vec![2.0, 55.0]);

        let ranked = sums.ranked(1, Order::Desc).await.unwrap();
        assert_eq!(ranked[0].partition, "4:mode~~1:1~~");
        let decoded = reporting
            .catalog()
            .codec()
            .decode_partition_key(&ranked[0].partition)
            .unwrap();
        assert_eq!(decoded, vec![("mode".to_string(), "1".to_string())]);
    }

    #[tokio::test]
    async fn test_select_rejects_zero_limit() {
        let reporting = seeded().await;
        let sums = reporting.query().sum("value").unwrap();
        assert!(matches!(
            sums.select(0, Order::Desc).await,
            Err(RollupError::Query(QueryError::InvalidLimit { limit: 0 }))
        ));
    }

    #[tokio::test]
    async fn test_counts() {
        let reporting = seeded().await;
        let sums = reporting.select("by_mode", None).unwrap().sum("value").unwrap();

        assert_eq!(sums.count().await.unwrap(), 2);
        assert_eq!(sums.greater(5.0).count().await.unwrap(), 1);
        assert_eq!(sums.lesser(55.0).count().await.unwrap(), 2);
        assert_eq!(sums.lesser(54.0).count().await.unwrap(), 1);
        assert_eq!(sums.between(0.0, 55.0).count().await.unwrap(), 2);
        assert_eq!(sums.between(3.0, 50.0).count().await.unwrap(), 0);

        for v in [2.0, 55.0, 7.0] {
            assert_eq!(
                sums.equal(v).count().await.unwrap(),
                sums.between(v, v).count().await.unwrap()
            );
        }
        assert_eq!(sums.equal(2.0).range(), ValueRange::between(2.0, 2.0));
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let reporting = seeded().await;
        let snapshot = reporting
            .select("by_mode", Some(&mode(2)))
            .unwrap()
            .metrics()
            .await
            .unwrap();

        let value = &snapshot["value"];
        assert_eq!(value["sum"], Some(2.0));
        assert_eq!(value["max"], Some(2.0));
        assert_eq!(value["diff"], Some(2.0));

        let empty = reporting
            .select("by_mode", Some(&mode(9)))
            .unwrap()
            .metrics()
            .await
            .unwrap();
        assert_eq!(empty["value"]["sum"], None);
    }

    #[tokio::test]
    async fn test_metrics_snapshot_lists_retained_only_reducers() {
        let mut catalog = Catalog::new();
        catalog.add_metric("value", ["sum"]).unwrap();
        catalog.enable_retainer("second", "value", ["sum", "last"]).unwrap();
        let reporting = Reporting::new(Arc::new(MemoryStore::new()), catalog);
        reporting
            .ingest_at(&[Record::new().with("value", 4)], 1_000)
            .await
            .unwrap();

        let snapshot = reporting.query().metrics().await.unwrap();
        let value = &snapshot["value"];
        assert_eq!(value.len(), 2);
        assert_eq!(value["sum"], Some(4.0));
        assert_eq!(value["last"], None);

        let last = reporting.query().last("value").unwrap();
        let buckets = last
            .during("second", 1_000, 1_000)
            .unwrap()
            .values(GapFill::Omit)
            .await
            .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].value, 4.0);
    }

    #[tokio::test]
    async fn test_during_validation() {
        let reporting = seeded().await;
        let query = reporting.query();

        assert!(matches!(
            query.sum("value").unwrap().during("fortnight", 0, 1),
            Err(RollupError::Lookup(LookupError::UnknownRetainer { .. }))
        ));
        assert!(matches!(
            query.max("value").unwrap().during("second", 0, 1),
            Err(RollupError::Lookup(LookupError::RetainerNotEnabled { .. }))
        ));
        assert!(matches!(
            query.sum("value").unwrap().during("second", 5, 1),
            Err(RollupError::Query(QueryError::InvalidTimeRange { start: 5, end: 1 }))
        ));
        assert!(matches!(
            reporting
                .select("by_mode", None)
                .unwrap()
                .sum("value")
                .unwrap()
                .during("second", 0, 1),
            Err(RollupError::Query(QueryError::PartitionNotSelected { .. }))
        ));
    }

    #[tokio::test]
    async fn test_during_dense_and_sparse() {
        let reporting = reporting();
        reporting
            .ingest_at(&[Record::new().with("value", 4)], 1_200)
            .await
            .unwrap();
        reporting
            .ingest_at(&[Record::new().with("value", 6)], 3_900)
            .await
            .unwrap();

        let during = reporting
            .query()
            .sum("value")
            .unwrap()
            .during("second", 0, 4_500)
            .unwrap();

        let dense = during.values(GapFill::Zero).await.unwrap();
        let values: Vec<f64> = dense.iter().map(|b| b.value).collect();
        assert_eq!(values, vec![0.0, 4.0, 0.0, 6.0, 0.0]);
        assert_eq!(dense[3].bucket, "3");
        assert_eq!(dense[3].timestamp, 3_000);

        let sparse = during.values(GapFill::Omit).await.unwrap();
        assert_eq!(
            sparse,
            vec![
                BucketValue {
                    bucket: "1".to_string(),
                    timestamp: 1_000,
                    value: 4.0
                },
                BucketValue {
                    bucket: "3".to_string(),
                    timestamp: 3_000,
                    value: 6.0
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_during_rejects_huge_dense_ranges() {
        let reporting = seeded().await;
        let during = reporting
            .query()
            .sum("value")
            .unwrap()
            .during("second", 0, u64::MAX)
            .unwrap();

        assert!(matches!(
            during.values(GapFill::Zero).await,
            Err(RollupError::Query(QueryError::TooManyBuckets { .. }))
        ));
        let sparse = during.values(GapFill::Omit).await.unwrap();
        assert_eq!(sparse.len(), 1);
        assert_eq!(sparse[0].value, 57.0);
    }

    #[test]
    fn test_order_and_fill_serde() {
        assert_eq!(serde_json::to_string(&Order::Asc).unwrap(), r#""asc""#);
        assert_eq!(serde_json::from_str::<GapFill>(r#""omit""#).unwrap(), GapFill::Omit);
        assert_eq!(Order::default(), Order::Desc);
        assert_eq!(GapFill::default(), GapFill::Zero);
    }
}
