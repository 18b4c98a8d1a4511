//! Metric emission and span processing for the o11y integration layer.
//!
//! Builds on `o11y-core`'s resolved configuration to decide what gets
//! recorded and how it is shaped before it reaches the agent.
//!
//! Key components:
//! - **Metrics**: count/gauge/distribution/set/timing over a statsd transport,
//!   with timestamped points routed to the historical series API
//! - **Spans**: current/root span tagging, error recording, enriched spans
//! - **Pipeline**: ordered filter and rewrite stages run before export
//! - **Tracer**: the tracing-SDK seam plus an in-process implementation
//! - **Logging**: pretty or JSON output via `tracing-subscriber`, with the
//!   service identity attached through a span

pub mod enrichment;
pub mod error;
pub mod historical;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod span;
pub mod telemetry;
pub mod tracer;
pub mod transport;

pub use enrichment::{flatten_for_span, Spans};
pub use error::{Result, TelemetryError};
pub use metrics::{MetricKind, MetricPoint, MetricValue, Metrics};
pub use pipeline::SpanPipeline;
pub use span::{Span, SpanHandle, SpanOptions};
pub use telemetry::{Telemetry, TracingOptions};
pub use tracer::{LocalTracer, SpanExporter, Tracer};
pub use transport::{MetricsCollector, MetricsTransport};
