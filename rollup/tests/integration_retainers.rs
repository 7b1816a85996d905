//! Integration tests for time-bucketed aggregation.

use std::sync::Arc;
use std::time::Duration;

use rollup::engine::now_ms;
use rollup::query::BucketValue;
use rollup::error::QueryError;
use rollup::{Catalog, GapFill, MemoryStore, Record, Reporting, RollupError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const HOUR_MS: u64 = 3_600_000;

fn per_second() -> Reporting<MemoryStore> {
    init_tracing();
    let mut catalog = Catalog::new();
    catalog.add_dimension("by_mode", ["mode"]).unwrap();
    catalog.add_metric("value", ["sum"]).unwrap();
    catalog.enable_retainer("second", "value", ["sum"]).unwrap();
    Reporting::new(Arc::new(MemoryStore::new()), catalog)
}

fn non_zero(buckets: &[BucketValue]) -> Vec<f64> {
    buckets.iter().map(|b| b.value).filter(|v| *v != 0.0).collect()
}

#[tokio::test]
async fn test_two_windows_hold_their_own_sums() {
    let reporting = per_second();
    let t = 1_700_000_000_250;

    reporting
        .ingest_at(
            &[Record::new().with("value", 3), Record::new().with("value", 4)],
            t,
        )
        .await
        .unwrap();
    reporting
        .ingest_at(&[Record::new().with("value", 10)], t + 1_500)
        .await
        .unwrap();

    let sum = reporting.query().sum("value").unwrap();
    assert_eq!(sum.value().await.unwrap(), Some(17.0));

    let during = sum.during("second", t - HOUR_MS, t + HOUR_MS).unwrap();
    let dense = during.values(GapFill::Zero).await.unwrap();
    assert_eq!(dense.len(), 7_201);
    assert_eq!(non_zero(&dense), vec![7.0, 10.0]);

    // Ordered by time, each bucket stamped with its start.
    assert!(dense.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    let sparse = during.values(GapFill::Omit).await.unwrap();
    assert_eq!(
        sparse
            .iter()
            .map(|b| (b.bucket.as_str(), b.timestamp, b.value))
            .collect::<Vec<_>>(),
        vec![
            ("1700000000", 1_700_000_000_000, 7.0),
            ("1700000001", 1_700_000_001_000, 10.0),
        ]
    );
}

#[tokio::test]
async fn test_ingest_now_lands_in_current_window() {
    let reporting = per_second();
    let start = now_ms();

    reporting
        .ingest(&[Record::new().with("value", 2)])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    reporting
        .ingest(&[Record::new().with("value", 5)])
        .await
        .unwrap();

    let dense = reporting
        .query()
        .sum("value")
        .unwrap()
        .during("second", start - HOUR_MS, start + HOUR_MS)
        .unwrap()
        .values(GapFill::Zero)
        .await
        .unwrap();
    assert_eq!(non_zero(&dense), vec![2.0, 5.0]);
}

#[tokio::test]
async fn test_partitioned_retainers() {
    let reporting = per_second();
    let t = 42_000;

    reporting
        .ingest_at(
            &[
                Record::new().with("value", 1).with("mode", "a"),
                Record::new().with("value", 2).with("mode", "b"),
                Record::new().with("value", 4).with("mode", "a"),
            ],
            t,
        )
        .await
        .unwrap();

    let mode_a = Record::new().with("mode", "a");
    let buckets = reporting
        .select("by_mode", Some(&mode_a))
        .unwrap()
        .sum("value")
        .unwrap()
        .during("second", t, t)
        .unwrap()
        .values(GapFill::Zero)
        .await
        .unwrap();

    assert_eq!(
        buckets,
        vec![BucketValue {
            bucket: "42".to_string(),
            timestamp: 42_000,
            value: 5.0,
        }]
    );
}

#[tokio::test]
async fn test_derived_retainer() {
    init_tracing();
    let mut catalog = Catalog::new();
    catalog.add_retainer("quarter", Duration::from_secs(900)).unwrap();
    catalog.add_metric("bytes", ["sum", "max"]).unwrap();
    catalog.enable_retainer("5minute", "bytes", ["sum"]).unwrap();
    catalog.enable_retainer("2quarter", "bytes", ["max"]).unwrap();
    let reporting = Reporting::new(Arc::new(MemoryStore::new()), catalog);

    // Minutes 0, 4, 5 and 31.
    for (minute, bytes) in [(0, 100), (4, 50), (5, 70), (31, 20)] {
        reporting
            .ingest_at(&[Record::new().with("bytes", bytes)], minute * 60_000)
            .await
            .unwrap();
    }

    let sums = reporting
        .query()
        .sum("bytes")
        .unwrap()
        .during("5minute", 0, 34 * 60_000)
        .unwrap()
        .values(GapFill::Zero)
        .await
        .unwrap();
    let values: Vec<f64> = sums.iter().map(|b| b.value).collect();
    assert_eq!(values, vec![150.0, 70.0, 0.0, 0.0, 0.0, 0.0, 20.0]);
    assert_eq!(sums[6].timestamp, 30 * 60_000);

    let maxes = reporting
        .query()
        .max("bytes")
        .unwrap()
        .during("2quarter", 0, 59 * 60_000)
        .unwrap()
        .values(GapFill::Omit)
        .await
        .unwrap();
    let values: Vec<f64> = maxes.iter().map(|b| b.value).collect();
    assert_eq!(values, vec![100.0, 20.0]);
}

#[tokio::test]
async fn test_empty_range_reads_as_zeros() {
    let reporting = per_second();
    let during = reporting
        .query()
        .sum("value")
        .unwrap()
        .during("second", 10_000, 12_999)
        .unwrap();

    let dense = during.values(GapFill::Zero).await.unwrap();
    assert_eq!(dense.len(), 3);
    assert!(dense.iter().all(|b| b.value == 0.0));
    assert!(during.values(GapFill::Omit).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bucket_keys_order_numerically_across_digit_counts() {
    let reporting = per_second();
    for t in [9_000, 10_000, 100_000] {
        reporting
            .ingest_at(&[Record::new().with("value", 1)], t)
            .await
            .unwrap();
    }

    let buckets = reporting
        .query()
        .sum("value")
        .unwrap()
        .during("second", 9_000, 100_000)
        .unwrap()
        .values(GapFill::Omit)
        .await
        .unwrap();
    let keys: Vec<&str> = buckets.iter().map(|b| b.bucket.as_str()).collect();
    assert_eq!(keys, vec!["9", "10", "100"]);
}

#[tokio::test]
async fn test_millisecond_retainer_over_all_time() {
    init_tracing();
    let mut catalog = Catalog::new();
    catalog.add_retainer("ms", Duration::from_millis(1)).unwrap();
    catalog.add_metric("value", ["sum"]).unwrap();
    catalog.enable_retainer("ms", "value", ["sum"]).unwrap();
    let reporting = Reporting::new(Arc::new(MemoryStore::new()), catalog);
    reporting
        .ingest_at(&[Record::new().with("value", 4)], 1_234)
        .await
        .unwrap();

    let during = reporting
        .query()
        .sum("value")
        .unwrap()
        .during("ms", 0, u64::MAX)
        .unwrap();
    assert!(matches!(
        during.values(GapFill::Zero).await,
        Err(RollupError::Query(QueryError::TooManyBuckets { buckets: u64::MAX, .. }))
    ));

    let sparse = during.values(GapFill::Omit).await.unwrap();
    assert_eq!(sparse.len(), 1);
    assert_eq!((sparse[0].timestamp, sparse[0].value), (1_234, 4.0));
}
