#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use o11y_core::{Config, MapEnv, Overrides};
use o11y_telemetry::historical::{SeriesApi, SeriesPayload};
use o11y_telemetry::span::Span;
use o11y_telemetry::tracer::SpanExporter;
use o11y_telemetry::{MetricsCollector, Result, Telemetry};

pub fn config(pairs: &[(&str, &str)]) -> Arc<Config> {
    Arc::new(Config::with_env(
        Overrides::default(),
        Arc::new(MapEnv::from_pairs(pairs)),
    ))
}

pub fn production() -> Arc<Config> {
    config(&[
        ("SERVICE_NAME", "checkout"),
        ("O11Y_ENV", "production"),
        ("REVISION", "abc123"),
        ("DD_API_KEY", "test-key"),
    ])
}

pub fn development() -> Arc<Config> {
    config(&[
        ("SERVICE_NAME", "checkout"),
        ("O11Y_ENV", "development"),
        ("DD_API_KEY", "test-key"),
    ])
}

/// Records every payload instead of calling the network.
#[derive(Default)]
pub struct RecordingSeriesApi {
    pub calls: Mutex<Vec<(String, SeriesPayload)>>,
}

impl RecordingSeriesApi {
    pub fn calls(&self) -> Vec<(String, SeriesPayload)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SeriesApi for RecordingSeriesApi {
    fn submit(&self, api_key: &str, payload: &SeriesPayload) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((api_key.to_string(), payload.clone()));
        Ok(())
    }
}

/// Collects exported traces.
#[derive(Default)]
pub struct CaptureExporter {
    pub traces: Mutex<Vec<Vec<Span>>>,
}

impl CaptureExporter {
    pub fn spans(&self) -> Vec<Span> {
        self.traces.lock().unwrap().iter().flatten().cloned().collect()
    }
}

impl SpanExporter for CaptureExporter {
    fn export(&self, trace: Vec<Span>) {
        self.traces.lock().unwrap().push(trace);
    }
}

pub struct Harness {
    pub telemetry: Telemetry,
    pub collector: Arc<MetricsCollector>,
    pub api: Arc<RecordingSeriesApi>,
}

pub fn harness(config: Arc<Config>) -> Harness {
    let collector = Arc::new(MetricsCollector::new());
    let api = Arc::new(RecordingSeriesApi::default());
    let telemetry = Telemetry::with_parts(config, collector.clone(), api.clone());
    Harness {
        telemetry,
        collector,
        api,
    }
}
