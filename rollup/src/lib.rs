//! # rollup
//!
//! Incremental roll-up aggregation over an ordered key-value store.
//!
//! rollup ingests a stream of records and keeps, for each configured
//! property, a set of running aggregates: sliced along categorical
//! dimensions and optionally bucketed into fixed-width time windows. The
//! aggregates live in an external store that provides per-cell atomic folds
//! and ordered range scans; rollup derives the keys, plans the folds and
//! answers point, ranking, counting and time-range queries on top of it.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Pluggable reducers with an explicit "keep the old value" outcome
//! - Length-prefixed partition keys that never collide on the separator
//! - Every fold of a batch issued concurrently, failures reported per cell
//! - Ranked selects bounded by a deadline, returning partial results
//! - Time-range reads with explicit gap filling
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use rollup::{Catalog, GapFill, MemoryStore, Order, Record, Reporting};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Configure once: partition by "mode", sum and max of "value",
//! // with the sum also bucketed per minute.
//! let mut catalog = Catalog::new();
//! catalog.add_dimension("by_mode", ["mode"])?;
//! catalog.add_metric("value", ["sum", "max"])?;
//! catalog.enable_retainer("minute", "value", ["sum"])?;
//!
//! let reporting = Reporting::new(Arc::new(MemoryStore::new()), catalog);
//!
//! // Write path
//! let t = 1_700_000_000_000;
//! let report = reporting
//!     .ingest_at(
//!         &[
//!             Record::new().with("value", 50).with("mode", 1),
//!             Record::new().with("value", 2).with("mode", 2),
//!             Record::new().with("value", 5).with("mode", 1),
//!         ],
//!         t,
//!     )
//!     .await?;
//! assert!(report.is_complete());
//!
//! // Read path
//! let total = reporting.query().sum("value")?;
//! assert_eq!(total.value().await?, Some(57.0));
//!
//! let by_mode = reporting.select("by_mode", None)?.sum("value")?;
//! assert_eq!(by_mode.select(1, Order::Desc).await?, vec![55.0]);
//!
//! let buckets = total
//!     .during("minute", t - 60_000, t + 60_000)?
//!     .values(GapFill::Zero)
//!     .await?;
//! assert_eq!(buckets.len(), 3);
//! assert_eq!(buckets[1].value, 57.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Catalog`]: reducers, dimensions, retainers and metric rules, built once
//! - [`Reporting`]: the aggregation engine; plans and issues folds
//! - [`ReportQuery`] / [`MetricQuery`]: the query builder stages
//! - [`OrderedStore`]: what the backing store must provide
//! - [`MemoryStore`]: in-process store implementation
//!
//! ## Modules
//!
//! - [`catalog`]: configuration and name resolution
//! - [`engine`]: ingestion, fold planning and outcomes
//! - [`query`]: query builder and terminal reads
//! - [`keys`]: partition, metric and bucket key derivation
//! - [`reducer`]: built-in and custom reducers
//! - [`record`]: the ingested record type
//! - [`store`]: store interface and the in-memory implementation
//! - [`error`]: error types

pub mod catalog;
pub mod engine;
pub mod error;
pub mod keys;
pub mod query;
pub mod record;
pub mod reducer;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use catalog::{Catalog, Options};
pub use engine::{IngestReport, Reporting};
pub use error::{Result, RollupError};
pub use query::{BucketValue, GapFill, MetricQuery, Order, ReportQuery};
pub use record::Record;
pub use reducer::{BuiltinReducer, Reduction};
pub use store::{MemoryStore, OrderedStore};
