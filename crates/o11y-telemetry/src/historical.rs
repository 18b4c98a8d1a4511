//! Direct API submission for metrics carrying an explicit timestamp.
//!
//! Statsd has no notion of "when", so timestamped counts and gauges bypass
//! the agent and go straight to the series intake endpoint. One point per
//! call; the payload type already holds a list of series so batching can be
//! added without changing the wire format.

use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use o11y_core::env::vars;
use o11y_core::Config;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, TelemetryError};
use crate::metrics::MetricKind;

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// Metric kinds the series intake accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoricalKind {
    Count,
    Rate,
    Gauge,
}

impl HistoricalKind {
    /// Intake type code (`0` is reserved for "unspecified").
    pub fn intake_type(self) -> u8 {
        match self {
            HistoricalKind::Count => 1,
            HistoricalKind::Rate => 2,
            HistoricalKind::Gauge => 3,
        }
    }
}

impl FromStr for HistoricalKind {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(HistoricalKind::Count),
            "rate" => Ok(HistoricalKind::Rate),
            "gauge" => Ok(HistoricalKind::Gauge),
            other => Err(TelemetryError::InvalidArgument(format!(
                "unsupported historical metric type: {other}"
            ))),
        }
    }
}

impl TryFrom<MetricKind> for HistoricalKind {
    type Error = TelemetryError;

    fn try_from(kind: MetricKind) -> Result<Self> {
        match kind {
            MetricKind::Count => Ok(HistoricalKind::Count),
            MetricKind::Gauge => Ok(HistoricalKind::Gauge),
            other => Err(TelemetryError::InvalidArgument(format!(
                "{other:?} metrics cannot be submitted with a timestamp"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPayload {
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub metric: String,
    #[serde(rename = "type")]
    pub intake_type: u8,
    pub points: Vec<SeriesPoint>,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// A tag expressed as an intake resource: `type` is the tag key, `name` the
/// value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Validate a unix-seconds timestamp.
pub fn validate_timestamp(timestamp: i64) -> Result<DateTime<Utc>> {
    if timestamp < 0 {
        return Err(TelemetryError::InvalidArgument(format!(
            "timestamp {timestamp} is before the unix epoch"
        )));
    }
    DateTime::<Utc>::from_timestamp(timestamp, 0).ok_or_else(|| {
        TelemetryError::InvalidArgument(format!("timestamp {timestamp} is out of range"))
    })
}

/// Split formatted `key:value` tags on their first colon.
pub fn resources_from_tags(tags: &[String]) -> Vec<Resource> {
    tags.iter()
        .filter_map(|tag| match tag.split_once(':') {
            Some((key, value)) => Some(Resource {
                name: value.to_string(),
                kind: key.to_string(),
            }),
            None => {
                debug!(tag = %tag, "skipping tag without a key");
                None
            }
        })
        .collect()
}

/// Build a single-point series payload.
pub fn build_payload(
    name: &str,
    kind: HistoricalKind,
    value: f64,
    timestamp: i64,
    tags: &[String],
) -> Result<SeriesPayload> {
    let at = validate_timestamp(timestamp)?;
    Ok(SeriesPayload {
        series: vec![Series {
            metric: name.to_string(),
            intake_type: kind.intake_type(),
            points: vec![SeriesPoint {
                timestamp: at.timestamp(),
                value,
            }],
            resources: resources_from_tags(tags),
        }],
    })
}

// ---------------------------------------------------------------------------
// API client
// ---------------------------------------------------------------------------

/// Client for the series intake endpoint.
pub trait SeriesApi: Send + Sync {
    fn submit(&self, api_key: &str, payload: &SeriesPayload) -> Result<()>;
}

/// HTTP client for `https://api.<site>/api/v2/series`.
///
/// The `reqwest::blocking` client lives on a dedicated worker thread and is
/// built and dropped there, so `submit` is safe to call from inside an async
/// runtime. The caller waits for the response; the request itself never runs
/// on a runtime thread.
#[derive(Debug, Clone)]
pub struct DatadogSeriesApi {
    endpoint: String,
    requests: flume::Sender<SeriesRequest>,
}

#[derive(Debug)]
struct SeriesRequest {
    api_key: String,
    payload: SeriesPayload,
    reply: flume::Sender<Result<()>>,
}

impl DatadogSeriesApi {
    /// Client for the intake of `site`, e.g. `datadoghq.com`.
    pub fn new(site: &str) -> Result<Self> {
        Self::with_endpoint(format!("https://api.{site}/api/v2/series"))
    }

    /// Client for the site resolved from `DD_SITE`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.site())
    }

    /// Client for an explicit series URL.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let (requests, inbox) = flume::unbounded::<SeriesRequest>();
        let (ready_tx, ready_rx) = flume::bounded::<Result<()>>(1);

        let worker_endpoint = endpoint.clone();
        thread::Builder::new()
            .name("o11y-series".to_string())
            .spawn(move || {
                let client = match reqwest::blocking::Client::builder()
                    .timeout(Duration::from_secs(10))
                    .build()
                {
                    Ok(client) => client,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Ends once every sender is dropped.
                for request in inbox.iter() {
                    let result = post_series(&client, &worker_endpoint, &request);
                    let _ = request.reply.send(result);
                }
                debug!("series worker stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| TelemetryError::WorkerStopped)??;
        Ok(Self { endpoint, requests })
    }

    /// Full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn post_series(
    client: &reqwest::blocking::Client,
    endpoint: &str,
    request: &SeriesRequest,
) -> Result<()> {
    let response = client
        .post(endpoint)
        .header("DD-API-KEY", &request.api_key)
        .json(&request.payload)
        .send()?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().unwrap_or_default();
    Err(TelemetryError::Api(format!("{status}: {body}")))
}

impl SeriesApi for DatadogSeriesApi {
    fn submit(&self, api_key: &str, payload: &SeriesPayload) -> Result<()> {
        let (reply, response) = flume::bounded(1);
        self.requests
            .send(SeriesRequest {
                api_key: api_key.to_string(),
                payload: payload.clone(),
                reply,
            })
            .map_err(|_| TelemetryError::WorkerStopped)?;
        response.recv().map_err(|_| TelemetryError::WorkerStopped)?
    }
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

/// Validates, builds and submits historical points.
pub struct HistoricalSubmitter {
    config: Arc<Config>,
    api: Arc<dyn SeriesApi>,
}

impl HistoricalSubmitter {
    /// Submitter using the API key from `config`.
    pub fn new(config: Arc<Config>, api: Arc<dyn SeriesApi>) -> Self {
        Self { config, api }
    }

    /// Submit one point. Arguments are checked first, then the API key; the
    /// API is only called once both pass.
    pub fn submit(
        &self,
        name: &str,
        kind: HistoricalKind,
        value: f64,
        timestamp: i64,
        tags: &[String],
    ) -> Result<()> {
        let payload = build_payload(name, kind, value, timestamp, tags)?;
        let api_key = self
            .config
            .api_key()
            .ok_or(TelemetryError::MissingCredential(vars::DD_API_KEY))?;
        debug!(metric = name, timestamp, "submitting historical metric");
        self.api.submit(api_key, &payload)
    }

    /// Like [`HistoricalSubmitter::submit`] but takes the kind by name.
    pub fn submit_named(
        &self,
        name: &str,
        kind: &str,
        value: f64,
        timestamp: i64,
        tags: &[String],
    ) -> Result<()> {
        self.submit(name, kind.parse()?, value, timestamp, tags)
    }
}
