//! Process log output tagged with the service identity.
//!
//! Hosts call [`init_logging`] once at startup and enter [`identity_span`]
//! around their main loop; every event recorded inside it then carries the
//! same `service`/`env`/`version` values as the metric and span tags, so
//! logs can be joined to them.

use std::fmt;
use std::str::FromStr;

use o11y_core::Config;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as subscriber_fmt, EnvFilter};

use crate::error::TelemetryError;

/// Name of the span opened by [`identity_span`].
pub const IDENTITY_SPAN: &str = "o11y";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines for terminals.
    Pretty,
    /// One JSON object per line, with the identity span's fields under `span`.
    Json,
}

impl LogFormat {
    /// JSON wherever instrumentation is enabled (log shippers parse it),
    /// pretty everywhere else.
    pub fn for_config(config: &Config) -> Self {
        if config.enabled() {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(TelemetryError::InvalidArgument(format!(
                "unknown log format: {other}"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        })
    }
}

/// Span carrying the resolved service identity as fields.
pub fn identity_span(config: &Config) -> tracing::Span {
    tracing::info_span!(
        IDENTITY_SPAN,
        service = config.service_name(),
        env = config.environment(),
        version = config.version(),
    )
}

/// Install the global subscriber in the format [`LogFormat::for_config`]
/// picks. `RUST_LOG` wins over `default_level` when set.
///
/// Returns `false` if a global subscriber was already installed; the call is
/// then a no-op.
pub fn init_logging(config: &Config, default_level: &str) -> bool {
    init_logging_with(config, LogFormat::for_config(config), default_level)
}

/// [`init_logging`] with an explicit format.
pub fn init_logging_with(config: &Config, format: LogFormat, default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = match format {
        LogFormat::Pretty => subscriber_fmt()
            .with_env_filter(filter)
            .with_target(true)
            .finish()
            .try_init()
            .is_ok(),
        LogFormat::Json => json_subscriber(filter, std::io::stdout).try_init().is_ok(),
    };

    if installed {
        let _identity = identity_span(config).entered();
        tracing::info!(%format, "logging initialised");
    }
    installed
}

fn json_subscriber<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    subscriber_fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_writer(writer)
        .finish()
}
