//! Catalog configuration for rollup aggregation.
//!
//! The [`Catalog`] is built once, before any data flows, and then shared by
//! ingestion and queries. It holds four registries:
//!
//! - **reducers**: how an observation folds into an aggregate
//! - **dimensions**: which record properties partition aggregates
//! - **retainers**: fixed-width time buckets
//! - **metric rules**: which reducers (and retained reducers) apply to a property
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use rollup::Catalog;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut catalog = Catalog::new();
//! catalog.add_dimension("by_mode", ["mode"])?;
//! catalog.add_retainer("quarter", Duration::from_secs(900))?;
//! catalog.add_metric("latency", ["max", "sum"])?;
//! catalog.enable_retainer("minute", "latency", ["sum"])?;
//! catalog.enable_retainer("4quarter", "latency", ["max"])?;
//!
//! assert_eq!(catalog.retainer("4quarter")?.duration_ms(), 3_600_000);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, LookupError, QueryError, Result};
use crate::keys::{self, DEFAULT_PARTITION, DEFAULT_SEPARATOR, KeyCodec};
use crate::record::Record;
use crate::reducer::{Reducer, ReducerRegistry, Reduction};

/// Name of the implicit dimension that maps every record to one partition.
pub const DEFAULT_DIMENSION: &str = "default";

/// Default bound on how long a ranked select waits for results.
pub const DEFAULT_SELECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of buckets a gap-filled read may materialise.
pub const MAX_FILLED_BUCKETS: u64 = 1_000_000;

/// Retainers registered by [`Catalog::new`].
const DEFAULT_RETAINERS: [(&str, u64); 5] = [
    ("second", 1_000),
    ("minute", 60_000),
    ("hour", 3_600_000),
    ("day", 86_400_000),
    ("week", 604_800_000),
];

/// Process-level options shared by every catalog operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Separator placed between key segments.
    pub separator: String,

    /// How long a ranked select waits before returning a partial result.
    #[serde(with = "duration_serde")]
    pub select_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            select_timeout: DEFAULT_SELECT_TIMEOUT,
        }
    }
}

impl Options {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSeparator`] if the separator is empty or
    /// contains `/`, `:` or an ASCII digit, all of which appear in keys.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let reason = if self.separator.is_empty() {
            Some("separator cannot be empty")
        } else if self.separator.contains('/') {
            Some("separator cannot contain '/'")
        } else if self.separator.contains(':') {
            Some("separator cannot contain ':'")
        } else if self.separator.bytes().any(|b| b.is_ascii_digit()) {
            Some("separator cannot contain digits")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ConfigError::InvalidSeparator {
                separator: self.separator.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// A named, ordered list of properties that partitions aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// Dimension name.
    pub name: String,
    /// Properties whose values form the partition key, in key order.
    pub properties: Vec<String>,
}

/// A fixed time window used to bucket aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retainer {
    /// Retainer name, e.g. `minute` or the derived `5minute`.
    pub name: String,
    /// Bucket width.
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl Retainer {
    /// Returns the bucket width in whole milliseconds.
    #[allow(clippy::cast_possible_truncation)] // validated to fit when registered
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Returns the bucket key for a timestamp.
    pub fn bucket_key(&self, timestamp_ms: u64) -> String {
        keys::bucket_key(keys::bucket_index(self.duration_ms(), timestamp_ms))
    }

    /// Returns the start of a bucket in milliseconds.
    pub fn bucket_start(&self, index: u64) -> u64 {
        index.saturating_mul(self.duration_ms())
    }
}

/// Reducers applied to one property, overall and per retainer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRule {
    /// Reducers folded into the non-bucketed cell of every partition.
    pub reducers: Vec<String>,
    /// Retainer name -> reducers additionally folded into time buckets.
    pub retainers: BTreeMap<String, Vec<String>>,
}

impl MetricRule {
    /// Returns true if `reducer` is aggregated by this rule anywhere.
    pub fn aggregates(&self, reducer: &str) -> bool {
        self.reducers.iter().any(|r| r == reducer)
            || self
                .retainers
                .values()
                .any(|reducers| reducers.iter().any(|r| r == reducer))
    }

    /// Returns every reducer this rule aggregates: the overall list first,
    /// then reducers only enabled through a retainer, without duplicates.
    pub fn all_reducers(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.reducers.iter().map(String::as_str).collect();
        for reducer in self.retainers.values().flatten() {
            if !all.contains(&reducer.as_str()) {
                all.push(reducer);
            }
        }
        all
    }

    /// Returns true if `reducer` is bucketed by `retainer`.
    pub fn retains(&self, retainer: &str, reducer: &str) -> bool {
        self.retainers
            .get(retainer)
            .is_some_and(|reducers| reducers.iter().any(|r| r == reducer))
    }
}

/// The explicit configuration object shared by ingestion and queries.
///
/// Registration methods validate their input completely before changing
/// anything, so a failed call leaves the catalog untouched.
#[derive(Debug, Clone)]
pub struct Catalog {
    options: Options,
    codec: KeyCodec,
    reducers: ReducerRegistry,
    dimensions: BTreeMap<String, Dimension>,
    retainers: BTreeMap<String, Retainer>,
    metrics: BTreeMap<String, MetricRule>,
}

impl Catalog {
    /// Creates a catalog with default options, the built-in reducers and the
    /// default retainers (`second`, `minute`, `hour`, `day`, `week`).
    pub fn new() -> Self {
        Self::build(Options::default())
    }

    /// Creates a catalog with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSeparator`] if the options are invalid.
    pub fn with_options(options: Options) -> Result<Self> {
        options.validate()?;
        Ok(Self::build(options))
    }

    fn build(options: Options) -> Self {
        let retainers = DEFAULT_RETAINERS
            .iter()
            .map(|&(name, ms)| {
                let retainer = Retainer {
                    name: name.to_string(),
                    duration: Duration::from_millis(ms),
                };
                (name.to_string(), retainer)
            })
            .collect();

        Self {
            codec: KeyCodec::new(options.separator.clone()),
            options,
            reducers: ReducerRegistry::with_builtins(),
            dimensions: BTreeMap::new(),
            retainers,
            metrics: BTreeMap::new(),
        }
    }

    /// Registers a custom reducer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the name is invalid or already registered.
    pub fn add_reducer<F>(&mut self, name: &str, reduce: F) -> Result<()>
    where
        F: Fn(f64, f64) -> Reduction + Send + Sync + 'static,
    {
        self.check_name("reducer", name)?;
        self.reducers.register(Reducer::custom(name, reduce))?;
        debug!(reducer = name, "registered reducer");
        Ok(())
    }

    /// Registers a dimension partitioning records by `properties`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the name is `default`, invalid or already
    /// taken, or if the property list is empty or holds an invalid name.
    pub fn add_dimension<I, S>(&mut self, name: &str, properties: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if name == DEFAULT_DIMENSION {
            return Err(ConfigError::ReservedDimension.into());
        }
        self.check_name("dimension", name)?;
        if self.dimensions.contains_key(name) {
            return Err(ConfigError::Duplicate {
                kind: "dimension",
                name: name.to_string(),
            }
            .into());
        }

        let properties: Vec<String> = properties.into_iter().map(Into::into).collect();
        if properties.is_empty() {
            return Err(ConfigError::EmptyDimension {
                name: name.to_string(),
            }
            .into());
        }
        for property in &properties {
            self.check_name("property", property)?;
        }

        debug!(dimension = name, ?properties, "registered dimension");
        self.dimensions.insert(
            name.to_string(),
            Dimension {
                name: name.to_string(),
                properties,
            },
        );
        Ok(())
    }

    /// Registers a retainer with the given bucket width.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the name is invalid, starts with a digit
    /// (reserved for derived retainers) or is taken, or if the duration is
    /// shorter than one millisecond.
    pub fn add_retainer(&mut self, name: &str, duration: Duration) -> Result<()> {
        self.check_name("retainer", name)?;
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidName {
                kind: "retainer",
                name: name.to_string(),
                reason: "leading digits are reserved for derived retainers".to_string(),
            }
            .into());
        }
        if self.retainers.contains_key(name) {
            return Err(ConfigError::Duplicate {
                kind: "retainer",
                name: name.to_string(),
            }
            .into());
        }
        if duration.as_millis() == 0 {
            return Err(ConfigError::InvalidDuration {
                name: name.to_string(),
                reason: "duration must be at least one millisecond".to_string(),
            }
            .into());
        }
        if u64::try_from(duration.as_millis()).is_err() {
            return Err(ConfigError::InvalidDuration {
                name: name.to_string(),
                reason: "duration is too large".to_string(),
            }
            .into());
        }

        debug!(retainer = name, ?duration, "registered retainer");
        self.retainers.insert(
            name.to_string(),
            Retainer {
                name: name.to_string(),
                duration,
            },
        );
        Ok(())
    }

    /// Sets the reducers applied to `property`.
    ///
    /// Calling this again for the same property replaces its reducer list and
    /// keeps any retainers already enabled for it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the property name is invalid or a reducer
    /// is not registered.
    pub fn add_metric<I, S>(&mut self, property: &str, reducers: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.check_name("property", property)?;
        let reducers = self.checked_reducers(reducers)?;

        debug!(property, ?reducers, "registered metric");
        self.metrics.entry(property.to_string()).or_default().reducers = reducers;
        Ok(())
    }

    /// Buckets `reducers` of `property` by `retainer` in addition to the
    /// overall aggregate.
    ///
    /// The retainer may be derived (e.g. `15minute`). The property's metric
    /// rule is created if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the property name is invalid, the retainer
    /// cannot be resolved, or a reducer is not registered.
    pub fn enable_retainer<I, S>(&mut self, retainer: &str, property: &str, reducers: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.check_name("property", property)?;
        if self.retainer(retainer).is_err() {
            return Err(ConfigError::UnresolvedRetainer {
                name: retainer.to_string(),
            }
            .into());
        }
        let reducers = self.checked_reducers(reducers)?;

        debug!(retainer, property, ?reducers, "enabled retainer");
        self.metrics
            .entry(property.to_string())
            .or_default()
            .retainers
            .insert(retainer.to_string(), reducers);
        Ok(())
    }

    /// Resolves a retainer by name.
    ///
    /// A name of the form `<n><base>` with a positive integer `n` resolves to
    /// `n` times the registered retainer `base`; derived retainers are not
    /// stored.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownRetainer`] if the name is neither
    /// registered nor derivable.
    pub fn retainer(&self, name: &str) -> Result<Retainer> {
        let unknown = || LookupError::UnknownRetainer {
            name: name.to_string(),
        };

        let digits = name.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return self.retainers.get(name).cloned().ok_or_else(|| unknown().into());
        }

        let (multiple, base) = name.split_at(digits);
        let multiple: u32 = multiple.parse().map_err(|_| unknown())?;
        if multiple == 0 {
            return Err(unknown().into());
        }
        let base = self.retainers.get(base).ok_or_else(unknown)?;
        let duration = base.duration.checked_mul(multiple).ok_or_else(unknown)?;
        if u64::try_from(duration.as_millis()).is_err() {
            return Err(unknown().into());
        }

        Ok(Retainer {
            name: name.to_string(),
            duration,
        })
    }

    /// Returns the partition key of `record` within `dimension`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownDimension`] if the dimension is neither
    /// `default` nor registered.
    pub fn partition_key(&self, dimension: &str, record: &Record) -> Result<String> {
        if dimension == DEFAULT_DIMENSION {
            return Ok(DEFAULT_PARTITION.to_string());
        }
        let dimension = self.dimension(dimension)?;
        Ok(self.codec.partition_key(&dimension.properties, record))
    }

    /// Returns the metric key for `property` aggregated by `reducer`.
    pub fn metric_key(&self, property: &str, reducer: &str) -> String {
        self.codec.metric_key(property, reducer)
    }

    /// Returns the bucket key of `timestamp_ms` under `retainer`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownRetainer`] if the retainer cannot be resolved.
    pub fn bucket_key(&self, retainer: &str, timestamp_ms: u64) -> Result<String> {
        Ok(self.retainer(retainer)?.bucket_key(timestamp_ms))
    }

    /// Returns every bucket index of `retainer` between two timestamps,
    /// inclusive, mapped to zero.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownRetainer`] if the retainer cannot be
    /// resolved, [`QueryError::InvalidTimeRange`] if `start_ms > end_ms`, and
    /// [`QueryError::TooManyBuckets`] past [`MAX_FILLED_BUCKETS`].
    pub fn empty_bucket_range(
        &self,
        retainer: &str,
        start_ms: u64,
        end_ms: u64,
    ) -> Result<BTreeMap<u64, f64>> {
        let retainer = self.retainer(retainer)?;
        check_fill_range(&retainer, start_ms, end_ms)?;
        Ok(keys::empty_bucket_range(retainer.duration_ms(), start_ms, end_ms))
    }

    /// Looks up a registered dimension.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownDimension`] if it does not exist. The
    /// implicit `default` dimension has no entry and is not returned here.
    pub fn dimension(&self, name: &str) -> Result<&Dimension> {
        self.dimensions.get(name).ok_or_else(|| {
            LookupError::UnknownDimension {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Returns true if `name` is `default` or a registered dimension.
    pub fn has_dimension(&self, name: &str) -> bool {
        name == DEFAULT_DIMENSION || self.dimensions.contains_key(name)
    }

    /// Iterates over registered dimensions, excluding `default`.
    pub fn dimensions(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.values()
    }

    /// Iterates over every dimension name a record is aggregated under,
    /// starting with `default`.
    pub fn dimension_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(DEFAULT_DIMENSION).chain(self.dimensions.keys().map(String::as_str))
    }

    /// Looks up a reducer by name.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownReducer`] if it does not exist.
    pub fn reducer(&self, name: &str) -> Result<&Reducer> {
        self.reducers.get(name).ok_or_else(|| {
            LookupError::UnknownReducer {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Returns the reducer registry.
    pub fn reducers(&self) -> &ReducerRegistry {
        &self.reducers
    }

    /// Returns the metric rule for a property, if any.
    pub fn metric(&self, property: &str) -> Option<&MetricRule> {
        self.metrics.get(property)
    }

    /// Iterates over `(property, rule)` pairs.
    pub fn metrics(&self) -> impl Iterator<Item = (&str, &MetricRule)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Verifies that `property` is aggregated with `reducer`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownReducer`] or [`LookupError::UnknownMetric`].
    pub fn check_metric(&self, property: &str, reducer: &str) -> Result<()> {
        self.reducer(reducer)?;
        match self.metrics.get(property) {
            Some(rule) if rule.aggregates(reducer) => Ok(()),
            _ => Err(LookupError::UnknownMetric {
                property: property.to_string(),
                reducer: reducer.to_string(),
            }
            .into()),
        }
    }

    /// Returns the key codec.
    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Returns the options this catalog was built with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    fn check_name(&self, kind: &'static str, name: &str) -> std::result::Result<(), ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyName { kind });
        }
        let reason = if name.contains('/') {
            Some("cannot contain '/'".to_string())
        } else if name.contains(self.codec.separator()) {
            Some(format!("cannot contain the separator '{}'", self.codec.separator()))
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ConfigError::InvalidName {
                kind,
                name: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn checked_reducers<I, S>(&self, reducers: I) -> std::result::Result<Vec<String>, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reducers: Vec<String> = reducers.into_iter().map(Into::into).collect();
        if let Some(missing) = reducers.iter().find(|r| !self.reducers.contains(r)) {
            return Err(ConfigError::UnknownReducer {
                name: missing.clone(),
            });
        }
        Ok(reducers)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates a time range for gap filling under `retainer`.
pub(crate) fn check_fill_range(retainer: &Retainer, start_ms: u64, end_ms: u64) -> Result<()> {
    if start_ms > end_ms {
        return Err(QueryError::InvalidTimeRange {
            start: start_ms,
            end: end_ms,
        }
        .into());
    }
    let buckets = keys::bucket_span(retainer.duration_ms(), start_ms, end_ms);
    if buckets > MAX_FILLED_BUCKETS {
        return Err(QueryError::TooManyBuckets {
            retainer: retainer.name.clone(),
            buckets,
            max_buckets: MAX_FILLED_BUCKETS,
        }
        .into());
    }
    Ok(())
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}
