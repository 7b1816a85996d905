//! Integration tests for the query builder across partitions.

use std::sync::Arc;

use rollup::catalog::Options;
use rollup::error::{LookupError, QueryError};
use rollup::{Catalog, MemoryStore, Order, Record, Reporting, RollupError};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn record(value: serde_json::Value) -> Record {
    Record::try_from(value).unwrap()
}

/// Ingests `{value:50,mode:1}`, `{value:2,mode:2}`, `{value:5,mode:1}` with
/// `sum` on `value` and a `by_mode` dimension.
async fn mode_scenario() -> Reporting<MemoryStore> {
    init_tracing();
    let mut catalog = Catalog::new();
    catalog.add_dimension("by_mode", ["mode"]).unwrap();
    catalog.add_metric("value", ["sum", "max", "min"]).unwrap();
    let reporting = Reporting::new(Arc::new(MemoryStore::new()), catalog);

    let report = reporting
        .ingest(&[
            record(json!({"value": 50, "mode": 1})),
            record(json!({"value": 2, "mode": 2})),
            record(json!({"value": 5, "mode": 1})),
        ])
        .await
        .unwrap();
    assert!(report.is_complete());
    reporting
}

#[tokio::test]
async fn test_partition_sums() {
    let reporting = mode_scenario().await;

    let mode_one = reporting
        .select("by_mode", Some(&record(json!({"mode": 1}))))
        .unwrap()
        .sum("value")
        .unwrap();
    let mode_two = reporting
        .select("by_mode", Some(&record(json!({"mode": 2}))))
        .unwrap()
        .sum("value")
        .unwrap();

    assert_eq!(mode_one.value().await.unwrap(), Some(55.0));
    assert_eq!(mode_two.value().await.unwrap(), Some(2.0));
}

#[tokio::test]
async fn test_integer_and_float_spellings_share_a_partition() {
    let reporting = mode_scenario().await;
    let float_mode: Record = serde_json::from_str(r#"{"value": 5, "mode": 1.0}"#).unwrap();
    reporting.ingest(&[float_mode]).await.unwrap();

    let mode_one = reporting
        .select("by_mode", Some(&record(json!({"mode": 1}))))
        .unwrap()
        .sum("value")
        .unwrap();
    assert_eq!(mode_one.value().await.unwrap(), Some(60.0));

    let sums = reporting.select("by_mode", None).unwrap().sum("value").unwrap();
    assert_eq!(sums.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_threshold_counts_across_partitions() {
    let reporting = mode_scenario().await;
    let sums = reporting.select("by_mode", None).unwrap().sum("value").unwrap();

    assert_eq!(sums.count().await.unwrap(), 2);
    assert_eq!(sums.greater(5.0).count().await.unwrap(), 1);
    assert_eq!(sums.lesser(50.0).count().await.unwrap(), 1);
    assert_eq!(sums.between(0.0, 55.0).count().await.unwrap(), 2);

    let total = reporting.query().sum("value").unwrap();
    assert_eq!(total.equal(57.0).count().await.unwrap(), 1);
    assert_eq!(total.equal(55.0).count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ranked_selects() {
    let reporting = mode_scenario().await;
    let maxes = reporting.select("by_mode", None).unwrap().max("value").unwrap();

    assert_eq!(maxes.select(1, Order::Desc).await.unwrap(), vec![50.0]);
    assert_eq!(maxes.select(5, Order::Asc).await.unwrap(), vec![2.0, 50.0]);

    let mins = reporting.select("by_mode", None).unwrap().min("value").unwrap();
    let ranked = mins.ranked(2, Order::Asc).await.unwrap();
    let codec = reporting.catalog().codec();
    let modes: Vec<_> = ranked
        .iter()
        .map(|r| codec.decode_partition_key(&r.partition).unwrap())
        .collect();
    assert_eq!(
        modes,
        vec![
            vec![("mode".to_string(), "2".to_string())],
            vec![("mode".to_string(), "1".to_string())],
        ]
    );
}

#[tokio::test]
async fn test_multi_property_dimension() {
    init_tracing();
    let mut catalog = Catalog::new();
    catalog.add_dimension("by_host_mode", ["host", "mode"]).unwrap();
    catalog.add_metric("latency", ["max"]).unwrap();
    let reporting = Reporting::new(Arc::new(MemoryStore::new()), catalog);

    reporting
        .ingest(&[
            record(json!({"latency": 12, "host": "web1", "mode": "fast"})),
            record(json!({"latency": 30, "host": "web1", "mode": "slow"})),
            record(json!({"latency": 18, "host": "web1", "mode": "fast"})),
            record(json!({"latency": 7, "host": "web2"})),
        ])
        .await
        .unwrap();

    let fast = reporting
        .select("by_host_mode", Some(&record(json!({"mode": "fast", "host": "web1"}))))
        .unwrap()
        .max("latency")
        .unwrap();
    assert_eq!(fast.value().await.unwrap(), Some(18.0));

    // web2 never reported a mode; its partition is keyed on "undefined".
    let web2 = reporting
        .select("by_host_mode", Some(&record(json!({"host": "web2"}))))
        .unwrap()
        .max("latency")
        .unwrap();
    assert_eq!(web2.value().await.unwrap(), Some(7.0));

    let all = reporting.select("by_host_mode", None).unwrap().max("latency").unwrap();
    assert_eq!(all.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_separator_inside_values_does_not_collide() {
    init_tracing();
    let mut catalog = Catalog::new();
    catalog.add_dimension("by_pair", ["a", "b"]).unwrap();
    catalog.add_metric("value", ["sum"]).unwrap();
    let reporting = Reporting::new(Arc::new(MemoryStore::new()), catalog);

    // Naively joined, both records map to "a~~x~~b~~b~~y~~".
    reporting
        .ingest(&[
            record(json!({"value": 1, "a": "x~~b", "b": "y"})),
            record(json!({"value": 10, "a": "x", "b": "b~~y"})),
        ])
        .await
        .unwrap();

    let sums = reporting.select("by_pair", None).unwrap().sum("value").unwrap();
    assert_eq!(sums.count().await.unwrap(), 2);
    assert_eq!(sums.select(2, Order::Desc).await.unwrap(), vec![10.0, 1.0]);
}

#[tokio::test]
async fn test_custom_separator() {
    init_tracing();
    let options = Options {
        separator: "|".to_string(),
        ..Options::default()
    };
    let mut catalog = Catalog::with_options(options).unwrap();
    catalog.add_dimension("by_mode", ["mode"]).unwrap();
    catalog.add_metric("value", ["sum"]).unwrap();
    let reporting = Reporting::new(Arc::new(MemoryStore::new()), catalog);

    reporting
        .ingest(&[record(json!({"value": 3, "mode": "a"}))])
        .await
        .unwrap();

    let cells: Vec<String> = reporting
        .store()
        .snapshot()
        .await
        .keys()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        cells,
        vec![
            "by_mode/metrics/4:mode|1:a|/value|sum".to_string(),
            "default/metrics/default/value|sum".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_metrics_snapshot_per_partition() {
    let reporting = mode_scenario().await;
    let snapshot = reporting
        .select("by_mode", Some(&record(json!({"mode": 1}))))
        .unwrap()
        .metrics()
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&snapshot).unwrap(),
        json!({"value": {"max": 50.0, "min": 5.0, "sum": 55.0}})
    );
}

#[tokio::test]
async fn test_lookup_errors_fail_before_store_access() {
    let reporting = mode_scenario().await;
    let folds_before = reporting.store().fold_count();

    match reporting.select("by_region", None).unwrap_err() {
        RollupError::Lookup(LookupError::UnknownDimension { name }) => {
            assert_eq!(name, "by_region");
        }
        other => panic!("Expected UnknownDimension error, got {other:?}"),
    }
    match reporting.query().last("value").unwrap_err() {
        RollupError::Lookup(LookupError::UnknownMetric { property, reducer }) => {
            assert_eq!(property, "value");
            assert_eq!(reducer, "last");
        }
        other => panic!("Expected UnknownMetric error, got {other:?}"),
    }
    assert!(matches!(
        reporting.query().sum("value").unwrap().select(0, Order::Asc).await,
        Err(RollupError::Query(QueryError::InvalidLimit { limit: 0 }))
    ));

    assert_eq!(reporting.store().fold_count(), folds_before);
}
