use std::sync::{Arc, OnceLock};

use o11y_core::{Config, EnvSource, Overrides};
use tracing::{info, warn};

use crate::enrichment::Spans;
use crate::error::Result;
use crate::historical::{DatadogSeriesApi, HistoricalSubmitter, SeriesApi};
use crate::logging;
use crate::metrics::Metrics;
use crate::pipeline::SpanPipeline;
use crate::tracer::{ExportHook, LocalTracer, LogExporter, SpanExporter};
use crate::transport::{MetricsTransport, NullTransport, UdpTransport};

/// UDP transport to the agent, or [`NullTransport`] while disabled or when
/// the agent address cannot be resolved.
fn statsd_transport(config: &Config) -> Arc<dyn MetricsTransport> {
    if !config.enabled() {
        return Arc::new(NullTransport);
    }
    match UdpTransport::new(config) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            warn!(
                error = %e,
                agent_host = config.agent_host(),
                statsd_port = config.statsd_port(),
                "statsd transport unavailable, metrics will be dropped"
            );
            Arc::new(NullTransport)
        }
    }
}

/// Options for [`Telemetry::init_tracing`].
#[derive(Default)]
pub struct TracingOptions {
    /// Background task names to instrument.
    pub tasks: Vec<String>,
    /// Where surviving spans go. Defaults to [`LogExporter`].
    pub exporter: Option<Arc<dyn SpanExporter>>,
    /// Defaults to [`SpanPipeline::standard`].
    pub pipeline: Option<SpanPipeline>,
}

impl TracingOptions {
    /// Task names to instrument.
    pub fn with_tasks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tasks = tasks.into_iter().map(Into::into).collect();
        self
    }

    /// Exporter receiving the spans that survive the pipeline.
    pub fn with_exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Pipeline to run instead of [`SpanPipeline::standard`].
    pub fn with_pipeline(mut self, pipeline: SpanPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }
}

/// Process-level handle bundling configuration, metrics and spans.
///
/// Build one at startup with [`Telemetry::init`] and pass clones of
/// [`Telemetry::metrics`] / [`Telemetry::spans`] to the code that needs them.
pub struct Telemetry {
    config: Arc<Config>,
    tracer: Arc<LocalTracer>,
    metrics: Metrics,
    spans: Spans,
    tracing_init: OnceLock<bool>,
}

impl Telemetry {
    /// Resolve configuration from the process environment and wire up the
    /// statsd transport and the historical API client.
    pub fn init(overrides: Overrides) -> Result<Self> {
        Self::from_config(Arc::new(Config::from_env(overrides)))
    }

    /// Like [`Telemetry::init`] but reading variables from `env`.
    pub fn init_with_env(overrides: Overrides, env: Arc<dyn EnvSource>) -> Result<Self> {
        Self::from_config(Arc::new(Config::with_env(overrides, env)))
    }

    fn from_config(config: Arc<Config>) -> Result<Self> {
        config.log_summary();
        let transport = statsd_transport(&config);
        let series_api = Arc::new(DatadogSeriesApi::from_config(&config)?);
        Ok(Self::with_parts(config, transport, series_api))
    }

    /// Assemble from explicit parts.
    pub fn with_parts(
        config: Arc<Config>,
        transport: Arc<dyn MetricsTransport>,
        series_api: Arc<dyn SeriesApi>,
    ) -> Self {
        let tracer = Arc::new(LocalTracer::new(config.service_name()));
        let historical = Arc::new(HistoricalSubmitter::new(Arc::clone(&config), series_api));
        let metrics = Metrics::new(Arc::clone(&config), transport, historical);
        let spans = Spans::new(Arc::clone(&config), tracer.clone());
        Self {
            config,
            tracer,
            metrics,
            spans,
            tracing_init: OnceLock::new(),
        }
    }

    /// The resolved configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Metric operations.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Span operations.
    pub fn spans(&self) -> &Spans {
        &self.spans
    }

    /// The in-process tracer spans are recorded on.
    pub fn tracer(&self) -> &Arc<LocalTracer> {
        &self.tracer
    }

    /// Install process logging for this configuration. See
    /// [`logging::init_logging`].
    pub fn init_logging(&self, default_level: &str) -> bool {
        logging::init_logging(&self.config, default_level)
    }

    /// Register the span pipeline with the tracer's pre-export hook.
    ///
    /// Only the first call does anything; later calls log a warning and
    /// return the first call's result. Returns whether export is active,
    /// which is never the case while instrumentation is disabled.
    pub fn init_tracing(&self, options: TracingOptions) -> bool {
        let mut first = false;
        let active = *self.tracing_init.get_or_init(|| {
            first = true;
            if !self.config.enabled() {
                info!("tracing disabled; spans will not be exported");
                return false;
            }
            let hook = ExportHook {
                pipeline: options.pipeline.unwrap_or_else(SpanPipeline::standard),
                exporter: options.exporter.unwrap_or_else(|| Arc::new(LogExporter)),
            };
            let tasks = options.tasks;
            info!(
                service = self.config.service_name(),
                agent_host = self.config.agent_host(),
                tracing_port = self.config.tracing_port(),
                tasks = ?tasks,
                "tracing initialised"
            );
            self.tracer.install(hook, tasks)
        });
        if !first {
            warn!("init_tracing called more than once; ignoring");
        }
        active
    }
}
