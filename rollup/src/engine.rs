//! Aggregation engine: the write path.
//!
//! [`Reporting`] turns each ingested record into a set of atomic folds, one
//! per aggregate cell the record touches, and issues all of them
//! concurrently against the [`OrderedStore`]. A record touches:
//!
//! - for every property with a metric rule and every reducer in that rule,
//!   one cell per dimension (`default` plus every registered dimension)
//! - for every retainer enabled for the property, one bucket cell per
//!   dimension and reducer, in the bucket containing the observation time
//!
//! Folds are independent. A failing fold is reported in the
//! [`IngestReport`] next to its successful siblings; nothing is rolled back.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rollup::{Catalog, MemoryStore, Record, Reporting};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut catalog = Catalog::new();
//! catalog.add_dimension("by_mode", ["mode"])?;
//! catalog.add_metric("value", ["sum", "max"])?;
//!
//! let reporting = Reporting::new(Arc::new(MemoryStore::new()), catalog);
//! let report = reporting
//!     .ingest(&[
//!         Record::new().with("value", 50).with("mode", 1),
//!         Record::new().with("value", 2).with("mode", 2),
//!     ])
//!     .await?;
//!
//! assert!(report.is_complete());
//! // 2 records x 2 reducers x 2 dimensions
//! assert_eq!(report.fold_count(), 8);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use tracing::{debug, trace, warn};

use crate::catalog::Catalog;
use crate::error::{RecordError, Result, StoreError};
use crate::record::Record;
use crate::reducer::Reducer;
use crate::store::{self, OrderedStore, StorePath};

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// The time bucket part of a cell address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketAddress {
    /// Retainer name as configured, e.g. `minute` or `5minute`.
    pub retainer: String,
    /// Bucket key.
    pub bucket: String,
}

/// The address of one aggregate cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    /// Dimension name.
    pub dimension: String,
    /// Partition key within the dimension.
    pub partition: String,
    /// Time bucket, for retained cells.
    pub bucket: Option<BucketAddress>,
    /// Metric key.
    pub metric: String,
}

impl CellAddress {
    /// Returns the store path of this cell.
    pub fn path(&self) -> StorePath {
        match &self.bucket {
            None => store::metrics_collection(&self.dimension)
                .child(self.partition.as_str())
                .child(self.metric.as_str()),
            Some(bucket) => {
                store::retainer_collection(&self.dimension, &self.partition, &bucket.retainer)
                    .child(bucket.bucket.as_str())
                    .child(self.metric.as_str())
            }
        }
    }
}

/// One fold the engine issues for a record.
#[derive(Debug, Clone)]
pub struct PlannedFold {
    /// Target cell.
    pub cell: CellAddress,
    /// Reducer folding the observation into the cell.
    pub reducer: Reducer,
    /// The observed value.
    pub value: f64,
}

/// Every fold a single record produces, plus the properties it had to skip.
#[derive(Debug, Clone, Default)]
pub struct IngestPlan {
    /// Folds to issue, in planning order.
    pub folds: Vec<PlannedFold>,
    /// Metric properties that could not be folded.
    pub rejected: Vec<RecordError>,
}

/// The settled result of one fold.
#[derive(Debug, Clone)]
pub struct FoldOutcome {
    /// Target cell.
    pub cell: CellAddress,
    /// Name of the reducer that was applied.
    pub reducer: String,
    /// The stored value after the fold, or the store failure.
    pub result: std::result::Result<f64, StoreError>,
}

/// Outcomes for one ingested record.
#[derive(Debug, Clone, Default)]
pub struct RecordOutcome {
    /// Outcome of every fold the record produced.
    pub folds: Vec<FoldOutcome>,
    /// Metric properties that were skipped.
    pub rejected: Vec<RecordError>,
}

impl RecordOutcome {
    /// Returns true if every fold succeeded and nothing was rejected.
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty() && self.folds.iter().all(|f| f.result.is_ok())
    }
}

/// Outcomes of an ingest call, one entry per input record, in input order.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Per-record outcomes.
    pub records: Vec<RecordOutcome>,
}

impl IngestReport {
    /// Returns true if every record was applied in full.
    pub fn is_complete(&self) -> bool {
        self.records.iter().all(RecordOutcome::is_complete)
    }

    /// Returns the total number of folds issued.
    pub fn fold_count(&self) -> usize {
        self.records.iter().map(|r| r.folds.len()).sum()
    }

    /// Iterates over failed folds.
    pub fn failures(&self) -> impl Iterator<Item = (&CellAddress, &StoreError)> {
        self.records
            .iter()
            .flat_map(|r| &r.folds)
            .filter_map(|f| f.result.as_ref().err().map(|e| (&f.cell, e)))
    }

    /// Iterates over rejected properties across all records.
    pub fn rejected(&self) -> impl Iterator<Item = &RecordError> {
        self.records.iter().flat_map(|r| &r.rejected)
    }
}

/// The aggregation engine and entry point for queries.
///
/// Cloning is cheap: the store and the catalog are shared.
#[derive(Debug)]
pub struct Reporting<S> {
    pub(crate) store: Arc<S>,
    pub(crate) catalog: Arc<Catalog>,
}

impl<S> Clone for Reporting<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            catalog: Arc::clone(&self.catalog),
        }
    }
}

impl<S: OrderedStore> Reporting<S> {
    /// Creates an engine over `store`, freezing `catalog`.
    pub fn new(store: Arc<S>, catalog: Catalog) -> Self {
        Self {
            store,
            catalog: Arc::new(catalog),
        }
    }

    /// Returns the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Computes the folds `record` produces when observed at `observed_at_ms`,
    /// without touching the store.
    ///
    /// Metric properties holding a non-numeric value are listed in
    /// [`IngestPlan::rejected`] and produce no folds; the record's other
    /// properties are unaffected.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::LookupError`] if the catalog references a
    /// reducer or retainer it cannot resolve.
    pub fn plan(&self, record: &Record, observed_at_ms: u64) -> Result<IngestPlan> {
        let catalog = &self.catalog;
        let mut plan = IngestPlan::default();

        let partitions = catalog
            .dimension_names()
            .map(|dimension| {
                catalog
                    .partition_key(dimension, record)
                    .map(|partition| (dimension, partition))
            })
            .collect::<Result<Vec<_>>>()?;

        for (property, raw) in record.iter() {
            let Some(rule) = catalog.metric(property) else {
                continue;
            };
            let Some(value) = raw.as_f64() else {
                plan.rejected.push(RecordError::NonNumericValue {
                    property: property.to_string(),
                    value: raw.to_string(),
                });
                continue;
            };

            for name in &rule.reducers {
                let reducer = catalog.reducer(name)?;
                let metric = catalog.metric_key(property, name);
                for (dimension, partition) in &partitions {
                    plan.folds.push(PlannedFold {
                        cell: CellAddress {
                            dimension: dimension.to_string(),
                            partition: partition.clone(),
                            bucket: None,
                            metric: metric.clone(),
                        },
                        reducer: reducer.clone(),
                        value,
                    });
                }
            }

            for (retainer, reducers) in &rule.retainers {
                let bucket = catalog.bucket_key(retainer, observed_at_ms)?;
                for name in reducers {
                    let reducer = catalog.reducer(name)?;
                    let metric = catalog.metric_key(property, name);
                    for (dimension, partition) in &partitions {
                        plan.folds.push(PlannedFold {
                            cell: CellAddress {
                                dimension: dimension.to_string(),
                                partition: partition.clone(),
                                bucket: Some(BucketAddress {
                                    retainer: retainer.clone(),
                                    bucket: bucket.clone(),
                                }),
                                metric: metric.clone(),
                            },
                            reducer: reducer.clone(),
                            value,
                        });
                    }
                }
            }
        }

        Ok(plan)
    }

    /// Ingests a single record observed now.
    ///
    /// # Errors
    ///
    /// See [`Reporting::ingest_at`].
    pub async fn ingest_one(&self, record: &Record) -> Result<RecordOutcome> {
        let mut report = self.ingest_at(std::slice::from_ref(record), now_ms()).await?;
        Ok(report.records.pop().unwrap_or_default())
    }

    /// Ingests a batch of records observed now.
    ///
    /// # Errors
    ///
    /// See [`Reporting::ingest_at`].
    pub async fn ingest(&self, records: &[Record]) -> Result<IngestReport> {
        self.ingest_at(records, now_ms()).await
    }

    /// Ingests a batch of records observed at `observed_at_ms`.
    ///
    /// Every record is planned before any fold is issued; all folds of the
    /// batch then run concurrently and the call returns once each has
    /// settled. Store failures are reported per cell in the returned
    /// [`IngestReport`].
    ///
    /// # Errors
    ///
    /// Returns an error only if planning fails, in which case the store was
    /// not touched.
    pub async fn ingest_at(&self, records: &[Record], observed_at_ms: u64) -> Result<IngestReport> {
        let plans = records
            .iter()
            .map(|record| self.plan(record, observed_at_ms))
            .collect::<Result<Vec<_>>>()?;

        let fold_count: usize = plans.iter().map(|p| p.folds.len()).sum();
        debug!(
            records = records.len(),
            folds = fold_count,
            observed_at_ms,
            "ingesting batch"
        );

        let records = join_all(plans.into_iter().map(|plan| async move {
            for rejected in &plan.rejected {
                warn!("Skipping property: {rejected}");
            }
            let folds = join_all(plan.folds.into_iter().map(|fold| self.apply(fold))).await;
            RecordOutcome {
                folds,
                rejected: plan.rejected,
            }
        }))
        .await;

        Ok(IngestReport { records })
    }

    async fn apply(&self, fold: PlannedFold) -> FoldOutcome {
        let PlannedFold {
            cell,
            reducer,
            value,
        } = fold;
        let path = cell.path();
        let update = |old: Option<f64>| reducer.fold(value, old);

        let result = self.store.fold(&path, &update).await;
        match &result {
            Ok(stored) => trace!(%path, reducer = reducer.name(), value, stored, "fold applied"),
            Err(e) => warn!("Failed to fold into {path}: {e}"),
        }

        FoldOutcome {
            cell,
            reducer: reducer.name().to_string(),
            result,
        }
    }
}
