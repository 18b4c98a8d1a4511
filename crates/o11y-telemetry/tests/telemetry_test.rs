mod common;

use std::sync::Arc;

use common::{development, harness, production, CaptureExporter};
use o11y_core::{MapEnv, Overrides, Tags};
use o11y_telemetry::historical::DatadogSeriesApi;
use o11y_telemetry::pipeline::{HealthCheckFilter, SpanPipeline};
use o11y_telemetry::span::names;
use o11y_telemetry::transport::NullTransport;
use o11y_telemetry::{SpanOptions, Telemetry, TelemetryError, TracingOptions};

fn request_options(url: &str) -> SpanOptions {
    SpanOptions::default().with_tags(Tags::from([(names::HTTP_URL, url)]))
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[test]
fn test_init_with_overrides() {
    let telemetry = Telemetry::init(
        Overrides::default()
            .with_service_name("ledger")
            .with_environment("development"),
    )
    .unwrap();

    assert_eq!(telemetry.config().service_name(), "ledger");
    assert_eq!(telemetry.config().environment(), "development");
    // Counts without a timestamp never touch the network.
    telemetry
        .metrics()
        .count("boot", 1, &Tags::new(), None)
        .unwrap();
}

#[test]
fn test_init_survives_unresolvable_agent() {
    let env = MapEnv::from_pairs(&[
        ("SERVICE_NAME", "checkout"),
        ("DD_AGENT_URI", "http://no-such-agent-host.invalid:8126"),
    ]);
    let telemetry = Telemetry::init_with_env(Overrides::default(), Arc::new(env)).unwrap();

    assert!(telemetry.config().enabled());
    assert_eq!(telemetry.config().agent_host(), "no-such-agent-host.invalid");
    telemetry.metrics().increment("boot", &Tags::new());
    telemetry
        .metrics()
        .gauge("queue.depth", 3.0, &Tags::new(), None)
        .unwrap();
}

#[tokio::test]
async fn test_init_and_drop_inside_runtime() {
    let env = MapEnv::from_pairs(&[("SERVICE_NAME", "checkout"), ("O11Y_ENV", "staging")]);
    let telemetry = Telemetry::init_with_env(Overrides::default(), Arc::new(env)).unwrap();
    telemetry.metrics().increment("boot", &Tags::new());
    drop(telemetry);
}

#[tokio::test]
async fn test_historical_submission_inside_runtime() {
    // Nothing listens on the discard port, so the request fails fast.
    let api = DatadogSeriesApi::with_endpoint("http://127.0.0.1:9/api/v2/series").unwrap();
    let telemetry = Telemetry::with_parts(production(), Arc::new(NullTransport), Arc::new(api));

    let err = telemetry
        .metrics()
        .count("settlements", 1, &Tags::new(), Some(1_700_000_000))
        .unwrap_err();
    assert!(matches!(err, TelemetryError::Http(_)));

    drop(telemetry);
}

// ---------------------------------------------------------------------------
// init_tracing
// ---------------------------------------------------------------------------

#[test]
fn test_init_tracing_disabled() {
    let h = harness(development());
    assert!(!h.telemetry.init_tracing(TracingOptions::default()));
    assert!(!h.telemetry.tracer().is_installed());
}

#[test]
fn test_init_tracing_runs_once() {
    let h = harness(production());
    let first = TracingOptions::default().with_tasks(["billing:settle"]);
    let second = TracingOptions::default().with_tasks(["reports:daily"]);

    assert!(h.telemetry.init_tracing(first));
    assert!(h.telemetry.init_tracing(second));

    let tracer = h.telemetry.tracer();
    assert!(tracer.is_task_instrumented("billing:settle"));
    assert!(!tracer.is_task_instrumented("reports:daily"));
}

#[test]
fn test_first_disabled_result_sticks() {
    let h = harness(development());
    assert!(!h.telemetry.init_tracing(TracingOptions::default()));
    assert!(!h.telemetry.init_tracing(TracingOptions::default()));
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[test]
fn test_spans_flow_through_standard_pipeline() {
    let h = harness(production());
    let capture = Arc::new(CaptureExporter::default());
    assert!(h
        .telemetry
        .init_tracing(TracingOptions::default().with_exporter(capture.clone())));

    let spans = h.telemetry.spans();

    spans.span(names::INBOUND_REQUEST, request_options("/health_check"), |_| {});
    assert!(capture.spans().is_empty());

    spans.span(names::INBOUND_REQUEST, request_options("/orders/482"), |_| {
        let outbound = SpanOptions::default().with_tags(Tags::from([
            (names::COMPONENT, "net/http"),
            (names::HTTP_METHOD, "get"),
            (names::HTTP_URL, "https://shop.example.com/orders/482?expand=items"),
        ]));
        spans.span("http.request", outbound, |_| {});
    });

    let exported = capture.spans();
    assert_eq!(exported.len(), 2);
    let outbound = exported
        .iter()
        .find(|s| s.name == "http.request")
        .unwrap();
    assert_eq!(outbound.resource, "GET /orders/?");
    assert_eq!(outbound.service, "checkout");
    assert!(exported.iter().all(|s| s.duration.is_some()));
}

#[test]
fn test_custom_pipeline_replaces_standard() {
    let h = harness(production());
    let capture = Arc::new(CaptureExporter::default());
    let options = TracingOptions::default()
        .with_exporter(capture.clone())
        .with_pipeline(SpanPipeline::new().with_filter(HealthCheckFilter));
    assert!(h.telemetry.init_tracing(options));

    h.telemetry
        .spans()
        .span(names::INBOUND_REQUEST, request_options("/assets/app.css"), |_| {});

    let exported = capture.spans();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].tag(names::HTTP_URL), Some("/assets/app.css"));
}

#[test]
fn test_errored_trace_is_exported_with_error_tags() {
    let h = harness(production());
    let capture = Arc::new(CaptureExporter::default());
    h.telemetry
        .init_tracing(TracingOptions::default().with_exporter(capture.clone()));

    let spans = h.telemetry.spans();
    spans.span("settle", SpanOptions::default(), |_| {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "gateway timeout");
        spans.error(&err);
    });

    let exported = capture.spans();
    assert_eq!(exported.len(), 1);
    assert!(exported[0].is_error());
    assert_eq!(exported[0].tag(names::ERROR_MESSAGE), Some("gateway timeout"));
}
