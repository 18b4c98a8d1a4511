mod common;

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use common::{config, development, harness, production};
use o11y_core::Tags;
use o11y_telemetry::{MetricKind, MetricValue, TelemetryError};

fn tag_set(tags: &[String]) -> HashSet<&str> {
    tags.iter().map(String::as_str).collect()
}

// ---------------------------------------------------------------------------
// Enabled gate
// ---------------------------------------------------------------------------

#[test]
fn test_disabled_emits_nothing() {
    let h = harness(development());
    let m = h.telemetry.metrics();
    let tags = Tags::from([("queue", "default")]);

    m.count("jobs.enqueued", 1, &tags, None).unwrap();
    m.count("jobs.enqueued", 1, &tags, Some(1_700_000_000)).unwrap();
    m.gauge("queue.depth", 4.0, &tags, None).unwrap();
    m.gauge("queue.depth", 4.0, &tags, Some(1_700_000_000)).unwrap();
    m.distribution("payload.bytes", 512.0, &tags);
    m.set("users.active", "u_1", &tags);
    m.increment("jobs.enqueued", &tags);

    assert!(h.collector.is_empty());
    assert!(h.api.calls().is_empty());
}

#[test]
fn test_force_disable_in_production_emits_nothing() {
    let h = harness(config(&[
        ("O11Y_ENV", "production"),
        ("DISABLE_DEGICA_DATADOG", "true"),
    ]));
    h.telemetry.metrics().increment("hits", &Tags::new());
    assert!(h.collector.is_empty());
}

// ---------------------------------------------------------------------------
// Streaming path
// ---------------------------------------------------------------------------

#[test]
fn test_count_streams_with_identity_tags() {
    let h = harness(production());
    h.telemetry
        .metrics()
        .count("orders.created", 3, &Tags::from([("env", "x"), ("region", "jp")]), None)
        .unwrap();

    let points = h.collector.points();
    assert_eq!(points.len(), 1);
    let p = &points[0];
    assert_eq!(p.name, "orders.created");
    assert_eq!(p.kind, MetricKind::Count);
    assert_eq!(p.value, MetricValue::Int(3));
    assert_eq!(p.timestamp, None);

    let tags = tag_set(&p.tags);
    assert!(tags.contains("env:production"));
    assert!(!tags.contains("env:x"));
    assert!(tags.contains("region:jp"));
    assert!(tags.contains("service:checkout"));
    assert!(tags.contains("version:abc123"));
    assert!(tags.contains("git.commit.sha:abc123"));
    assert!(tags.contains("git.repository_url:github.com/degica/checkout"));
    assert!(h.api.calls().is_empty());
}

#[test]
fn test_gauge_distribution_and_set() {
    let h = harness(production());
    let m = h.telemetry.metrics();
    m.gauge("queue.depth", 12.0, &Tags::new(), None).unwrap();
    m.distribution("payload.bytes", 2048.0, &Tags::new());
    m.set("users.active", "u_1", &Tags::new());
    m.set("users.active", "u_1", &Tags::new());
    m.set("users.active", 42, &Tags::new());

    let kinds: Vec<MetricKind> = h.collector.points().iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MetricKind::Gauge,
            MetricKind::Distribution,
            MetricKind::Set,
            MetricKind::Set,
            MetricKind::Set,
        ]
    );

    let set_points = h.collector.points_named("users.active");
    let set_tags: Vec<&str> = set_points[0].tags.iter().map(String::as_str).collect();
    assert_eq!(h.collector.set_cardinality("users.active", &set_tags), 2);
}

#[test]
fn test_increment_is_count_of_one() {
    let h = harness(production());
    h.telemetry.metrics().increment("logins", &Tags::new());
    let points = h.collector.points_named("logins");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, MetricValue::Int(1));
}

// ---------------------------------------------------------------------------
// Historical path
// ---------------------------------------------------------------------------

#[test]
fn test_timestamped_count_goes_to_api() {
    let h = harness(production());
    h.telemetry
        .metrics()
        .count("settlements", 5, &Tags::from([("merchant", "m_1")]), Some(1_700_000_000))
        .unwrap();

    assert!(h.collector.is_empty());
    let calls = h.api.calls();
    assert_eq!(calls.len(), 1);
    let (key, payload) = &calls[0];
    assert_eq!(key, "test-key");
    assert_eq!(payload.series.len(), 1);

    let series = &payload.series[0];
    assert_eq!(series.metric, "settlements");
    assert_eq!(series.intake_type, 1);
    assert_eq!(series.points.len(), 1);
    assert_eq!(series.points[0].timestamp, 1_700_000_000);
    assert_eq!(series.points[0].value, 5.0);
    assert!(series
        .resources
        .iter()
        .any(|r| r.kind == "merchant" && r.name == "m_1"));
    assert!(series
        .resources
        .iter()
        .any(|r| r.kind == "env" && r.name == "production"));
}

#[test]
fn test_timestamped_gauge_submits_value() {
    let h = harness(production());
    h.telemetry
        .metrics()
        .gauge("balance", 99.5, &Tags::new(), Some(1_700_000_000))
        .unwrap();

    let calls = h.api.calls();
    assert_eq!(calls.len(), 1);
    let series = &calls[0].1.series[0];
    assert_eq!(series.intake_type, 3);
    assert_eq!(series.points[0].value, 99.5);
}

#[test]
fn test_missing_credential_before_network() {
    let h = harness(config(&[("O11Y_ENV", "production")]));
    let err = h
        .telemetry
        .metrics()
        .count("settlements", 1, &Tags::new(), Some(1_700_000_000))
        .unwrap_err();

    assert!(matches!(err, TelemetryError::MissingCredential("DD_API_KEY")));
    assert!(h.api.calls().is_empty());
    assert!(h.collector.is_empty());
}

#[test]
fn test_invalid_timestamp_rejected() {
    let h = harness(production());
    let err = h
        .telemetry
        .metrics()
        .gauge("balance", 1.0, &Tags::new(), Some(-5))
        .unwrap_err();
    assert!(matches!(err, TelemetryError::InvalidArgument(_)));
    assert!(h.api.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

#[test]
fn test_with_timing_emits_once() {
    let h = harness(production());
    let mut runs = 0;
    let out = h
        .telemetry
        .metrics()
        .with_timing("job.duration", &Tags::from([("job", "sync")]), || {
            runs += 1;
            std::thread::sleep(Duration::from_millis(5));
            "done"
        });

    assert_eq!(out, "done");
    assert_eq!(runs, 1);
    let points = h.collector.points_named("job.duration");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].kind, MetricKind::Timing);
    let ms = points[0].value.as_f64().unwrap();
    assert!(ms >= 5.0, "elapsed {ms}ms");
}

#[test]
fn test_with_timing_runs_block_when_disabled() {
    let h = harness(development());
    let mut runs = 0;
    h.telemetry
        .metrics()
        .with_timing("job.duration", &Tags::new(), || runs += 1);
    assert_eq!(runs, 1);
    assert!(h.collector.is_empty());
}

#[test]
fn test_with_timing_emits_and_propagates_panic() {
    let h = harness(production());
    let metrics = h.telemetry.metrics().clone();
    let mut runs = 0;

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        metrics.with_timing("job.duration", &Tags::new(), || {
            runs += 1;
            panic!("boom");
        })
    }));

    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    assert_eq!(runs, 1);
    let points = h.collector.points_named("job.duration");
    assert_eq!(points.len(), 1);
    assert!(points[0].value.as_f64().unwrap() >= 0.0);
}

#[test]
fn test_with_timing_panic_when_disabled() {
    let h = harness(development());
    let metrics = h.telemetry.metrics().clone();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        metrics.with_timing("job.duration", &Tags::new(), || {
            panic!("boom");
        })
    }));
    assert!(result.is_err());
    assert!(h.collector.is_empty());
}

#[test]
fn test_with_timing_passes_results_through() {
    let h = harness(production());
    let res: Result<u32, String> = h
        .telemetry
        .metrics()
        .with_timing("parse", &Tags::new(), || Err("bad input".to_string()));
    assert_eq!(res, Err("bad input".to_string()));
    assert_eq!(h.collector.points_named("parse").len(), 1);
}

#[tokio::test]
async fn test_time_async() {
    let h = harness(production());
    let value = h
        .telemetry
        .metrics()
        .time_async("fetch", &Tags::new(), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            7
        })
        .await;

    assert_eq!(value, 7);
    let points = h.collector.points_named("fetch");
    assert_eq!(points.len(), 1);
    assert!(points[0].value.as_f64().unwrap() >= 5.0);
}

#[test]
fn test_start_timer_emits_on_drop() {
    let h = harness(production());
    {
        let _timer = h.telemetry.metrics().start_timer("scope", &Tags::new());
        assert!(h.collector.is_empty());
    }
    assert_eq!(h.collector.points_named("scope").len(), 1);
}
