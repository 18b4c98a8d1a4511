use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use o11y_core::{format_tags, Config, Tags};

use crate::error::{Result, TelemetryError};
use crate::historical::{HistoricalKind, HistoricalSubmitter};
use crate::transport::MetricsTransport;

// ---------------------------------------------------------------------------
// Metric points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Count,
    Gauge,
    Distribution,
    Set,
    /// Millisecond duration, aggregated by the agent as a histogram.
    Timing,
}

impl MetricKind {
    /// DogStatsD type code.
    pub fn statsd_code(self) -> &'static str {
        match self {
            MetricKind::Count => "c",
            MetricKind::Gauge => "g",
            MetricKind::Distribution => "d",
            MetricKind::Set => "s",
            MetricKind::Timing => "ms",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    /// Member of a set; the agent counts distinct items.
    Item(String),
}

impl MetricValue {
    /// Numeric value, or `None` for set members.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(i) => Some(*i as f64),
            MetricValue::Float(x) => Some(*x),
            MetricValue::Item(_) => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(i) => write!(f, "{i}"),
            MetricValue::Float(x) => write!(f, "{x}"),
            MetricValue::Item(s) => f.write_str(s),
        }
    }
}

/// A single metric observation, built per call and handed to a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub value: MetricValue,
    pub kind: MetricKind,
    pub tags: Vec<String>,
    pub timestamp: Option<i64>,
}

impl MetricPoint {
    /// Encode as a DogStatsD datagram: `name:value|type|#tag1,tag2`.
    ///
    /// Characters that would break the datagram framing are removed from set
    /// items and tags; `:`, `|` and `@` in the name become `_`.
    pub fn to_statsd(&self) -> String {
        let mut line = format!(
            "{}:{}|{}",
            escape_name(&self.name),
            strip(&self.value.to_string(), &['|', '\n', '\r']),
            self.kind.statsd_code()
        );
        if !self.tags.is_empty() {
            line.push_str("|#");
            let tags: Vec<String> = self
                .tags
                .iter()
                .map(|tag| strip(tag, &['|', ',', '\n', '\r']))
                .collect();
            line.push_str(&tags.join(","));
        }
        line
    }
}

fn escape_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(*c, '\n' | '\r'))
        .map(|c| if matches!(c, ':' | '|' | '@') { '_' } else { c })
        .collect()
}

fn strip(text: &str, reserved: &[char]) -> String {
    text.chars().filter(|c| !reserved.contains(c)).collect()
}

// ---------------------------------------------------------------------------
// Metrics emitter
// ---------------------------------------------------------------------------

/// Application-facing metric operations.
///
/// Every operation is a silent no-op while [`Config::enabled`] is false,
/// except that [`Metrics::with_timing`] still runs its block.
#[derive(Clone)]
pub struct Metrics {
    config: Arc<Config>,
    transport: Arc<dyn MetricsTransport>,
    historical: Arc<HistoricalSubmitter>,
}

impl Metrics {
    /// Emitter over `transport`, routing timestamped points to `historical`.
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn MetricsTransport>,
        historical: Arc<HistoricalSubmitter>,
    ) -> Self {
        Self {
            config,
            transport,
            historical,
        }
    }

    /// The configuration gating every operation.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `block`, then emit its wall-clock duration in milliseconds.
    ///
    /// The measurement is taken in a drop guard, so a panicking block still
    /// records its timing before the panic continues to unwind.
    pub fn with_timing<R>(&self, name: &str, tags: &Tags, block: impl FnOnce() -> R) -> R {
        let _timer = self.start_timer(name, tags);
        block()
    }

    /// Async counterpart of [`Metrics::with_timing`]. A future dropped before
    /// completion still records the time it ran.
    pub async fn time_async<F: Future>(&self, name: &str, tags: &Tags, future: F) -> F::Output {
        let _timer = self.start_timer(name, tags);
        future.await
    }

    /// Start a timer that emits when dropped.
    pub fn start_timer(&self, name: &str, tags: &Tags) -> TimingGuard {
        TimingGuard {
            metrics: self.clone(),
            name: name.to_string(),
            tags: tags.clone(),
            start: Instant::now(),
        }
    }

    /// Increment a counter by `amount`. With a `timestamp` (unix seconds) the
    /// point is submitted through the historical API instead of statsd.
    pub fn count(
        &self,
        name: &str,
        amount: i64,
        tags: &Tags,
        timestamp: Option<i64>,
    ) -> Result<()> {
        self.record(name, MetricValue::Int(amount), MetricKind::Count, tags, timestamp)
    }

    /// Shorthand for a streaming count of 1.
    pub fn increment(&self, name: &str, tags: &Tags) {
        if !self.config.enabled() {
            return;
        }
        let tags = format_tags(&self.config, tags);
        self.emit(name, MetricValue::Int(1), MetricKind::Count, tags);
    }

    /// Record a gauge. Same timestamp routing as [`Metrics::count`].
    pub fn gauge(&self, name: &str, value: f64, tags: &Tags, timestamp: Option<i64>) -> Result<()> {
        self.record(name, MetricValue::Float(value), MetricKind::Gauge, tags, timestamp)
    }

    /// Stream the point, or submit it through the historical API when it
    /// carries a timestamp.
    fn record(
        &self,
        name: &str,
        value: MetricValue,
        kind: MetricKind,
        tags: &Tags,
        timestamp: Option<i64>,
    ) -> Result<()> {
        if !self.config.enabled() {
            return Ok(());
        }
        let tags = format_tags(&self.config, tags);
        let Some(ts) = timestamp else {
            self.emit(name, value, kind, tags);
            return Ok(());
        };
        let historical = HistoricalKind::try_from(kind)?;
        let amount = value.as_f64().ok_or_else(|| {
            TelemetryError::InvalidArgument(format!("{name}: {value} is not numeric"))
        })?;
        self.historical.submit(name, historical, amount, ts, &tags)
    }

    /// Record a value in a distribution aggregated by the agent.
    pub fn distribution(&self, name: &str, value: f64, tags: &Tags) {
        if !self.config.enabled() {
            return;
        }
        let tags = format_tags(&self.config, tags);
        self.emit(name, MetricValue::Float(value), MetricKind::Distribution, tags);
    }

    /// Count distinct `item`s under `name`.
    pub fn set(&self, name: &str, item: impl fmt::Display, tags: &Tags) {
        if !self.config.enabled() {
            return;
        }
        let tags = format_tags(&self.config, tags);
        self.emit(name, MetricValue::Item(item.to_string()), MetricKind::Set, tags);
    }

    fn emit(&self, name: &str, value: MetricValue, kind: MetricKind, tags: Vec<String>) {
        let point = MetricPoint {
            name: name.to_string(),
            value,
            kind,
            tags,
            timestamp: None,
        };
        self.transport.send(&point);
    }
}

/// Emits a [`MetricKind::Timing`] point for the time between creation and
/// drop.
pub struct TimingGuard {
    metrics: Metrics,
    name: String,
    tags: Tags,
    start: Instant,
}

impl TimingGuard {
    /// Milliseconds since the guard was created.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.metrics.config.enabled() {
            return;
        }
        let elapsed = self.elapsed_ms();
        let tags = format_tags(&self.metrics.config, &self.tags);
        self.metrics
            .emit(&self.name, MetricValue::Float(elapsed), MetricKind::Timing, tags);
    }
}
