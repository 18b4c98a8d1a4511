use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use ahash::{AHashMap, AHashSet};
use o11y_core::Config;
use tracing::debug;

use crate::metrics::{MetricKind, MetricPoint};

/// Hand-off point for streaming metrics.
///
/// Implementations are fire-and-forget: they never report delivery failures
/// back to the caller.
pub trait MetricsTransport: Send + Sync {
    fn send(&self, point: &MetricPoint);
}

// ---------------------------------------------------------------------------
// UDP (DogStatsD)
// ---------------------------------------------------------------------------

/// Sends DogStatsD datagrams to the agent's statsd port.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransport {
    /// Bind a local socket aimed at `agent_host:statsd_port`.
    pub fn new(config: &Config) -> std::io::Result<Self> {
        Self::connect(config.agent_host(), config.statsd_port())
    }

    /// Resolve `host:port` and bind a non-blocking local socket.
    pub fn connect(host: &str, port: u16) -> std::io::Result<Self> {
        let target = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address for {host}:{port}"),
            )
        })?;
        let bind = if target.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, target })
    }

    /// Address datagrams are sent to.
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl MetricsTransport for UdpTransport {
    fn send(&self, point: &MetricPoint) {
        let line = point.to_statsd();
        if let Err(e) = self.socket.send_to(line.as_bytes(), self.target) {
            debug!(error = %e, metric = %point.name, "statsd send failed");
        }
    }
}

/// Discards everything. Used while instrumentation is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl MetricsTransport for NullTransport {
    fn send(&self, _point: &MetricPoint) {}
}

// ---------------------------------------------------------------------------
// In-memory collector
// ---------------------------------------------------------------------------

/// Default timing buckets in milliseconds.
fn default_timing_buckets() -> Vec<f64> {
    vec![
        5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
    ]
}

/// A histogram over observed values.
#[derive(Debug)]
pub struct Histogram {
    pub buckets: Vec<f64>,
    pub counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Histogram with the given upper bucket bounds.
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    /// Record one observation.
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        // f64 sum stored as bits
        let mut current = self.sum.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self
                .sum
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        for (i, boundary) in self.buckets.iter().enumerate() {
            if value <= *boundary {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Metric name plus its sorted tag list.
type SeriesKey = (String, Vec<String>);

fn series_key(point: &MetricPoint) -> SeriesKey {
    let mut tags = point.tags.clone();
    tags.sort();
    (point.name.clone(), tags)
}

fn sorted_tags(tags: &[&str]) -> Vec<String> {
    let mut v: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    v.sort();
    v
}

/// Aggregates points in memory instead of shipping them.
///
/// Useful as a local development sink and for asserting on emitted metrics.
/// Every point is also kept verbatim, in arrival order.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    points: Mutex<Vec<MetricPoint>>,
    counters: RwLock<AHashMap<SeriesKey, i64>>,
    gauges: RwLock<AHashMap<SeriesKey, f64>>,
    histograms: RwLock<AHashMap<SeriesKey, Histogram>>,
    sets: RwLock<AHashMap<SeriesKey, AHashSet<String>>>,
}

impl MetricsCollector {
    /// An empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every point received so far.
    pub fn points(&self) -> Vec<MetricPoint> {
        self.points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every recorded point named `name`, in arrival order.
    pub fn points_named(&self, name: &str) -> Vec<MetricPoint> {
        self.points().into_iter().filter(|p| p.name == name).collect()
    }

    pub fn len(&self) -> usize {
        self.points.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Running total of a counter series.
    pub fn counter(&self, name: &str, tags: &[&str]) -> i64 {
        let key = (name.to_string(), sorted_tags(tags));
        let map = self.counters.read().unwrap_or_else(|e| e.into_inner());
        map.get(&key).copied().unwrap_or(0)
    }

    /// Last value of a gauge series.
    pub fn gauge(&self, name: &str, tags: &[&str]) -> Option<f64> {
        let key = (name.to_string(), sorted_tags(tags));
        let map = self.gauges.read().unwrap_or_else(|e| e.into_inner());
        map.get(&key).copied()
    }

    /// Number of observations recorded for a timing or distribution series.
    pub fn observations(&self, name: &str, tags: &[&str]) -> u64 {
        let key = (name.to_string(), sorted_tags(tags));
        let map = self.histograms.read().unwrap_or_else(|e| e.into_inner());
        map.get(&key).map(Histogram::count).unwrap_or(0)
    }

    /// Distinct members seen for a set series.
    pub fn set_cardinality(&self, name: &str, tags: &[&str]) -> usize {
        let key = (name.to_string(), sorted_tags(tags));
        let map = self.sets.read().unwrap_or_else(|e| e.into_inner());
        map.get(&key).map(|members| members.len()).unwrap_or(0)
    }

    /// Export aggregates as JSON, keyed by `name{tag,tag}`.
    pub fn export_json(&self) -> serde_json::Value {
        fn label((name, tags): &SeriesKey) -> String {
            if tags.is_empty() {
                name.clone()
            } else {
                format!("{}{{{}}}", name, tags.join(","))
            }
        }

        let mut counters = serde_json::Map::new();
        for (key, v) in self.counters.read().unwrap_or_else(|e| e.into_inner()).iter() {
            counters.insert(label(key), serde_json::json!(v));
        }

        let mut gauges = serde_json::Map::new();
        for (key, v) in self.gauges.read().unwrap_or_else(|e| e.into_inner()).iter() {
            gauges.insert(label(key), serde_json::json!(v));
        }

        let mut histograms = serde_json::Map::new();
        for (key, h) in self.histograms.read().unwrap_or_else(|e| e.into_inner()).iter() {
            histograms.insert(
                label(key),
                serde_json::json!({ "sum": h.sum(), "count": h.count() }),
            );
        }

        let mut sets = serde_json::Map::new();
        for (key, members) in self.sets.read().unwrap_or_else(|e| e.into_inner()).iter() {
            sets.insert(label(key), serde_json::json!(members.len()));
        }

        serde_json::json!({
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
            "sets": sets,
        })
    }
}

impl MetricsTransport for MetricsCollector {
    fn send(&self, point: &MetricPoint) {
        self.points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(point.clone());

        let key = series_key(point);
        match point.kind {
            MetricKind::Count => {
                let amount = point.value.as_f64().unwrap_or(0.0) as i64;
                let mut map = self.counters.write().unwrap_or_else(|e| e.into_inner());
                *map.entry(key).or_insert(0) += amount;
            }
            MetricKind::Gauge => {
                if let Some(v) = point.value.as_f64() {
                    let mut map = self.gauges.write().unwrap_or_else(|e| e.into_inner());
                    map.insert(key, v);
                }
            }
            MetricKind::Timing | MetricKind::Distribution => {
                if let Some(v) = point.value.as_f64() {
                    let mut map = self.histograms.write().unwrap_or_else(|e| e.into_inner());
                    map.entry(key)
                        .or_insert_with(|| Histogram::new(default_timing_buckets()))
                        .observe(v);
                }
            }
            MetricKind::Set => {
                let mut map = self.sets.write().unwrap_or_else(|e| e.into_inner());
                map.entry(key).or_default().insert(point.value.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;

    fn point(name: &str, value: MetricValue, kind: MetricKind, tags: &[&str]) -> MetricPoint {
        MetricPoint {
            name: name.into(),
            value,
            kind,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            timestamp: None,
        }
    }

    #[test]
    fn test_histogram_observe() {
        let h = Histogram::new(default_timing_buckets());
        h.observe(3.0);
        h.observe(40.0);
        h.observe(20000.0);
        assert_eq!(h.count(), 3);
        assert!((h.sum() - 20043.0).abs() < 0.001);
        assert_eq!(h.counts[0].load(Ordering::Relaxed), 1);
        assert_eq!(h.counts[3].load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_collector_aggregates_by_tag_set() {
        let c = MetricsCollector::new();
        c.send(&point("jobs", MetricValue::Int(2), MetricKind::Count, &["q:a", "env:x"]));
        c.send(&point("jobs", MetricValue::Int(3), MetricKind::Count, &["env:x", "q:a"]));
        c.send(&point("jobs", MetricValue::Int(1), MetricKind::Count, &["q:b"]));

        assert_eq!(c.counter("jobs", &["q:a", "env:x"]), 5);
        assert_eq!(c.counter("jobs", &["q:b"]), 1);
        assert_eq!(c.counter("jobs", &["q:c"]), 0);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_collector_gauges_sets_and_timings() {
        let c = MetricsCollector::new();
        c.send(&point("depth", MetricValue::Float(4.0), MetricKind::Gauge, &[]));
        c.send(&point("depth", MetricValue::Float(7.5), MetricKind::Gauge, &[]));
        c.send(&point("users", MetricValue::Item("u1".into()), MetricKind::Set, &[]));
        c.send(&point("users", MetricValue::Item("u1".into()), MetricKind::Set, &[]));
        c.send(&point("users", MetricValue::Item("u2".into()), MetricKind::Set, &[]));
        c.send(&point("latency", MetricValue::Float(12.0), MetricKind::Timing, &[]));

        assert_eq!(c.gauge("depth", &[]), Some(7.5));
        assert_eq!(c.set_cardinality("users", &[]), 2);
        assert_eq!(c.observations("latency", &[]), 1);

        let json = c.export_json();
        assert_eq!(json["gauges"]["depth"], 7.5);
        assert_eq!(json["sets"]["users"], 2);
        assert_eq!(json["histograms"]["latency"]["count"], 1);
    }

    #[test]
    fn test_udp_transport_delivers_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let transport = UdpTransport::connect("127.0.0.1", port).unwrap();
        transport.send(&point("hits", MetricValue::Int(1), MetricKind::Count, &["env:test"]));

        let mut buf = [0u8; 512];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(std::str::from_utf8(&buf[..n]).unwrap(), "hits:1|c|#env:test");
    }
}
