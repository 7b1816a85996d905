//! Error types for the rollup aggregation engine.

use thiserror::Error;

/// The main error type for all rollup operations.
///
/// Configuration, lookup, query and record errors are raised synchronously,
/// before the store is touched. Store errors come back from the collaborator
/// and describe a single cell or read.
#[derive(Error, Debug)]
pub enum RollupError {
    /// Invalid reducer, dimension, retainer or metric registration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Reference to a name that was never registered.
    #[error("lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Invalid arguments to a terminal read.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// An ingested record could not be interpreted.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// The ordered store failed an individual fold or read.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised while registering catalog entries.
///
/// A failing registration leaves the catalog exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A name was empty.
    #[error("{kind} name is required")]
    EmptyName {
        /// What kind of entry was being registered.
        kind: &'static str,
    },

    /// A name contains a reserved character sequence.
    #[error("invalid {kind} name '{name}': {reason}")]
    InvalidName {
        /// What kind of entry was being registered.
        kind: &'static str,
        /// The rejected name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// The `default` dimension cannot be redefined.
    #[error("cannot override the default dimension")]
    ReservedDimension,

    /// A dimension must partition on at least one property.
    #[error("dimension '{name}' must list at least one property")]
    EmptyDimension {
        /// The dimension name.
        name: String,
    },

    /// An entry with this name already exists.
    #[error("{kind} '{name}' is already registered")]
    Duplicate {
        /// What kind of entry was being registered.
        kind: &'static str,
        /// The conflicting name.
        name: String,
    },

    /// A metric rule names a reducer that is not registered.
    #[error("reducer '{name}' is not registered")]
    UnknownReducer {
        /// The missing reducer name.
        name: String,
    },

    /// A retainer could not be resolved while enabling it for a metric.
    #[error("retainer '{name}' is not registered and cannot be derived")]
    UnresolvedRetainer {
        /// The retainer name.
        name: String,
    },

    /// A retainer duration is not usable for bucketing.
    #[error("invalid duration for retainer '{name}': {reason}")]
    InvalidDuration {
        /// The retainer name.
        name: String,
        /// Why the duration is invalid.
        reason: String,
    },

    /// The key separator is unusable.
    #[error("invalid separator '{separator}': {reason}")]
    InvalidSeparator {
        /// The rejected separator.
        separator: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors raised when a query or write references an unregistered name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The dimension was never registered.
    #[error("dimension '{name}' does not exist")]
    UnknownDimension {
        /// The dimension name.
        name: String,
    },

    /// The retainer is neither registered nor derivable from one.
    #[error("retainer '{name}' does not exist")]
    UnknownRetainer {
        /// The retainer name.
        name: String,
    },

    /// The reducer was never registered.
    #[error("reducer '{name}' does not exist")]
    UnknownReducer {
        /// The reducer name.
        name: String,
    },

    /// No metric rule aggregates this property with this reducer.
    #[error("no metric aggregates '{property}' with '{reducer}'")]
    UnknownMetric {
        /// The property name.
        property: String,
        /// The reducer name.
        reducer: String,
    },

    /// The metric exists but is not bucketed by this retainer.
    #[error("retainer '{retainer}' is not enabled for '{property}' with '{reducer}'")]
    RetainerNotEnabled {
        /// The retainer name.
        retainer: String,
        /// The property name.
        property: String,
        /// The reducer name.
        reducer: String,
    },
}

/// Errors raised while validating a terminal read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A point read needs a concrete partition, not a whole dimension.
    #[error("no partition selected in dimension '{dimension}'")]
    PartitionNotSelected {
        /// The dimension that was selected without values.
        dimension: String,
    },

    /// A ranked select needs a positive limit.
    #[error("invalid limit {limit}: must be > 0")]
    InvalidLimit {
        /// The rejected limit.
        limit: usize,
    },

    /// The time range is inverted.
    #[error("invalid time range: start {start} > end {end}")]
    InvalidTimeRange {
        /// Start of the range in milliseconds.
        start: u64,
        /// End of the range in milliseconds.
        end: u64,
    },

    /// Gap filling would materialise too many buckets.
    #[error("range spans {buckets} buckets of '{retainer}' (max {max_buckets})")]
    TooManyBuckets {
        /// The retainer used for bucketing.
        retainer: String,
        /// Number of buckets the range covers.
        buckets: u64,
        /// The maximum allowed.
        max_buckets: u64,
    },
}

/// Errors describing a record or one of its properties.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// Records must be JSON objects.
    #[error("record must be a JSON object, got {found}")]
    NotAnObject {
        /// Kind of JSON value that was supplied.
        found: String,
    },

    /// A metric property carries a value that cannot be folded.
    #[error("property '{property}' has non-numeric value {value}")]
    NonNumericValue {
        /// The property name.
        property: String,
        /// The offending value, rendered as JSON.
        value: String,
    },
}

/// Errors reported by the ordered store for a single operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable at '{path}': {reason}")]
    Unavailable {
        /// Path of the cell or collection being accessed.
        path: String,
        /// Description of the failure.
        reason: String,
    },

    /// The store rejected or failed the operation.
    #[error("store operation on '{path}' failed: {reason}")]
    Backend {
        /// Path of the cell or collection being accessed.
        path: String,
        /// Description of the failure.
        reason: String,
    },
}

/// Type alias for `Result<T, RollupError>`.
pub type Result<T> = std::result::Result<T, RollupError>;
