//! Key derivation shared by the write and read paths.
//!
//! Every aggregate cell is addressed by three keys:
//!
//! - a **partition key**, derived from a dimension and a record
//! - a **metric key**, derived from a property and a reducer name
//! - for time-bucketed cells, a **bucket key**, derived from a retainer
//!   duration and a timestamp
//!
//! Ingestion and queries go through the same [`KeyCodec`], so a value written
//! for a record is always found by a query selecting the same property values.
//!
//! # Partition key format
//!
//! Each property name and value is written as a length-prefixed segment
//! (`<byte length>:<text>`) followed by the separator:
//!
//! ```text
//! dimension ["mode", "host"], record {mode: 1, host: "a~~b"}
//!   -> 4:mode~~1:1~~4:host~~4:a~~b~~
//! ```
//!
//! The length prefix keeps keys unambiguous even when a value contains the
//! separator itself.

use std::collections::BTreeMap;

use crate::record::Record;

/// Partition key of the implicit, unpartitioned dimension.
pub const DEFAULT_PARTITION: &str = "default";

/// Default separator between key segments.
pub const DEFAULT_SEPARATOR: &str = "~~";

/// Pure key encoder parameterised by the configured separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    separator: String,
}

impl KeyCodec {
    /// Creates a codec using `separator` between segments.
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    /// Returns the configured separator.
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Builds the metric key for `property` aggregated by `reducer`.
    ///
    /// ```rust
    /// use rollup::keys::KeyCodec;
    ///
    /// assert_eq!(KeyCodec::default().metric_key("value", "sum"), "value~~sum");
    /// ```
    pub fn metric_key(&self, property: &str, reducer: &str) -> String {
        let mut key = String::with_capacity(property.len() + self.separator.len() + reducer.len());
        key.push_str(property);
        key.push_str(&self.separator);
        key.push_str(reducer);
        key
    }

    /// Builds the partition key for a record under a dimension's property list.
    ///
    /// Absent properties are encoded as [`crate::record::MISSING_VALUE`].
    pub fn partition_key<S: AsRef<str>>(&self, properties: &[S], record: &Record) -> String {
        let mut key = String::new();
        for property in properties {
            let property = property.as_ref();
            self.push_segment(&mut key, property);
            self.push_segment(&mut key, &record.render(property));
        }
        key
    }

    /// Splits a partition key back into `(property, value)` pairs.
    ///
    /// Returns an empty list for [`DEFAULT_PARTITION`] and `None` if the key
    /// was not produced by this codec.
    pub fn decode_partition_key(&self, key: &str) -> Option<Vec<(String, String)>> {
        if key == DEFAULT_PARTITION {
            return Some(Vec::new());
        }

        let mut segments = Vec::new();
        let mut rest = key;
        while !rest.is_empty() {
            let (len, after) = rest.split_once(':')?;
            let len: usize = len.parse().ok()?;
            let text = after.get(..len)?;
            rest = after[len..].strip_prefix(self.separator.as_str())?;
            segments.push(text.to_string());
        }

        if segments.len() % 2 != 0 {
            return None;
        }

        let mut pairs = Vec::with_capacity(segments.len() / 2);
        let mut iter = segments.into_iter();
        while let (Some(property), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((property, value));
        }
        Some(pairs)
    }

    fn push_segment(&self, key: &mut String, text: &str) {
        key.push_str(&text.len().to_string());
        key.push(':');
        key.push_str(text);
        key.push_str(&self.separator);
    }
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

/// Returns the index of the bucket of width `duration_ms` containing `timestamp_ms`.
///
/// # Panics
///
/// Panics if `duration_ms` is zero; catalog validation rules this out.
pub fn bucket_index(duration_ms: u64, timestamp_ms: u64) -> u64 {
    timestamp_ms / duration_ms
}

/// Renders a bucket index as a bucket key.
pub fn bucket_key(index: u64) -> String {
    index.to_string()
}

/// Parses a bucket key produced by [`bucket_key`].
///
/// Keys with a sign, leading zeros or other characters are rejected, so a
/// parsed key always renders back to the same string.
pub fn parse_bucket_key(key: &str) -> Option<u64> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Returns every bucket between two timestamps, inclusive, mapped to zero.
///
/// The map covers `bucket_index(start)..=bucket_index(end)` and is empty when
/// `start_ms > end_ms`.
///
/// ```rust
/// use rollup::keys::empty_bucket_range;
///
/// let buckets = empty_bucket_range(1000, 1500, 4200);
/// assert_eq!(buckets.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
/// assert!(buckets.values().all(|v| *v == 0.0));
/// ```
pub fn empty_bucket_range(duration_ms: u64, start_ms: u64, end_ms: u64) -> BTreeMap<u64, f64> {
    let start = bucket_index(duration_ms, start_ms);
    let end = bucket_index(duration_ms, end_ms);
    (start..=end).map(|index| (index, 0.0)).collect()
}

/// Returns the number of buckets `empty_bucket_range` would produce.
///
/// Saturates at `u64::MAX` when the range covers every bucket index.
pub fn bucket_span(duration_ms: u64, start_ms: u64, end_ms: u64) -> u64 {
    if start_ms > end_ms {
        return 0;
    }
    (bucket_index(duration_ms, end_ms) - bucket_index(duration_ms, start_ms)).saturating_add(1)
}
