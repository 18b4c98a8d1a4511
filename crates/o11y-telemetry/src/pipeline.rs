//! Filters and rewrites applied to every span before it leaves the process.
//!
//! Stages run in a fixed order. A filter that drops a span ends processing
//! for that span; rewrites mutate in place and pass the span on. Stages only
//! touch the span they are handed, so the pipeline can run on whatever thread
//! the exporter flushes from.

use o11y_core::path_group;
use tracing::trace;

use crate::span::{names, Span};

/// Hostname of the error-monitoring vendor whose client calls are noise.
pub const MONITORING_COLLECTOR_HOST: &str = "sentry.io";

/// Multi-tenant domains whose per-tenant subdomains are collapsed.
pub const GROUPED_HOST_SUFFIXES: &[&str] = &["myshopify.com", "ecwid.com", "ngrok.io"];

/// `component` values of outbound HTTP client instrumentations.
pub const HTTP_CLIENT_COMPONENTS: &[&str] = &[
    "net/http",
    "faraday",
    "excon",
    "httpclient",
    "httprb",
    "ethon",
    "rest_client",
];

/// Cloud instance metadata paths polled by SDKs.
pub const INSTANCE_METADATA_PATHS: &[&str] = &[
    "/latest/api/token",
    "/latest/meta-data/iam/security-credentials/",
    "/latest/dynamic/instance-identity/document",
];

const HEALTH_CHECK_PREFIX: &str = "/health_check";
const ASSET_PREFIXES: &[&str] = &["/assets", "/packs"];

// ---------------------------------------------------------------------------
// Stage traits
// ---------------------------------------------------------------------------

/// Stage that decides whether a span is exported.
pub trait SpanFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// `true` removes the span from export.
    fn should_drop(&self, span: &Span) -> bool;
}

/// Stage that mutates a span in place.
pub trait SpanRewrite: Send + Sync {
    fn name(&self) -> &'static str;

    fn rewrite(&self, span: &mut Span);
}

/// One entry in a [`SpanPipeline`].
pub enum Stage {
    Filter(Box<dyn SpanFilter>),
    Rewrite(Box<dyn SpanRewrite>),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Filter(f) => f.name(),
            Stage::Rewrite(r) => r.name(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SpanPipeline {
    stages: Vec<Stage>,
}

impl SpanPipeline {
    /// An empty pipeline that passes everything through.
    pub fn new() -> Self {
        Self::default()
    }

    /// The production stage order.
    pub fn standard() -> Self {
        Self::new()
            .with_filter(HealthCheckFilter)
            .with_filter(StaticAssetFilter)
            .with_filter(HostnameFilter::new([MONITORING_COLLECTOR_HOST]))
            .with_rewrite(HostnameGrouping::new(GROUPED_HOST_SUFFIXES.iter().copied()))
            .with_rewrite(HttpResourceNaming::new(HTTP_CLIENT_COMPONENTS.iter().copied()))
            .with_filter(MetadataEndpointFilter::new(INSTANCE_METADATA_PATHS.iter().copied()))
    }

    /// Append a filter stage.
    pub fn with_filter(mut self, filter: impl SpanFilter + 'static) -> Self {
        self.stages.push(Stage::Filter(Box::new(filter)));
        self
    }

    /// Append a rewrite stage.
    pub fn with_rewrite(mut self, rewrite: impl SpanRewrite + 'static) -> Self {
        self.stages.push(Stage::Rewrite(Box::new(rewrite)));
        self
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Run every stage on one span. Returns `false` if the span was dropped.
    pub fn process_span(&self, span: &mut Span) -> bool {
        for stage in &self.stages {
            match stage {
                Stage::Filter(filter) => {
                    if filter.should_drop(span) {
                        trace!(stage = filter.name(), span = %span.name, "span dropped");
                        return false;
                    }
                }
                Stage::Rewrite(rewrite) => rewrite.rewrite(span),
            }
        }
        true
    }

    /// Run the pipeline over a finished trace, keeping the survivors.
    pub fn process(&self, trace: Vec<Span>) -> Vec<Span> {
        trace
            .into_iter()
            .filter_map(|mut span| self.process_span(&mut span).then_some(span))
            .collect()
    }
}

fn is_inbound_request_to(span: &Span, prefixes: &[&str]) -> bool {
    span.name == names::INBOUND_REQUEST
        && span
            .tag(names::HTTP_URL)
            .is_some_and(|url| prefixes.iter().any(|p| url.starts_with(p)))
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Drops inbound requests to the health check endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthCheckFilter;

impl SpanFilter for HealthCheckFilter {
    fn name(&self) -> &'static str {
        "health_check"
    }

    fn should_drop(&self, span: &Span) -> bool {
        is_inbound_request_to(span, &[HEALTH_CHECK_PREFIX])
    }
}

/// Drops inbound requests for compiled assets.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticAssetFilter;

impl SpanFilter for StaticAssetFilter {
    fn name(&self) -> &'static str {
        "static_assets"
    }

    fn should_drop(&self, span: &Span) -> bool {
        is_inbound_request_to(span, ASSET_PREFIXES)
    }
}

/// Drops spans whose peer hostname is exactly one of the listed hosts.
#[derive(Debug, Clone)]
pub struct HostnameFilter {
    hosts: Vec<String>,
}

impl HostnameFilter {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }
}

impl SpanFilter for HostnameFilter {
    fn name(&self) -> &'static str {
        "third_party_noise"
    }

    fn should_drop(&self, span: &Span) -> bool {
        span.tag(names::PEER_HOSTNAME)
            .is_some_and(|host| self.hosts.iter().any(|h| h == host))
    }
}

/// Replaces `tenant.example.com` with `example.com` for the listed suffixes.
#[derive(Debug, Clone)]
pub struct HostnameGrouping {
    suffixes: Vec<String>,
}

impl HostnameGrouping {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    fn group_for(&self, host: &str) -> Option<&str> {
        self.suffixes
            .iter()
            .find(|suffix| {
                host.strip_suffix(suffix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.ends_with('.'))
            })
            .map(String::as_str)
    }
}

impl SpanRewrite for HostnameGrouping {
    fn name(&self) -> &'static str {
        "hostname_grouping"
    }

    fn rewrite(&self, span: &mut Span) {
        let grouped = span
            .tag(names::PEER_HOSTNAME)
            .and_then(|host| self.group_for(host))
            .map(str::to_string);
        if let Some(suffix) = grouped {
            span.set_tag(names::PEER_HOSTNAME, suffix);
        }
    }
}

/// Names outbound HTTP spans `"<METHOD> <path group>"`.
#[derive(Debug, Clone)]
pub struct HttpResourceNaming {
    components: Vec<String>,
}

impl HttpResourceNaming {
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
        }
    }
}

impl SpanRewrite for HttpResourceNaming {
    fn name(&self) -> &'static str {
        "http_resource_naming"
    }

    fn rewrite(&self, span: &mut Span) {
        let is_http_client = span
            .tag(names::COMPONENT)
            .is_some_and(|c| self.components.iter().any(|known| known == c));
        if !is_http_client {
            return;
        }

        let (Some(method), Some(url)) = (span.tag(names::HTTP_METHOD), span.tag(names::HTTP_URL))
        else {
            return;
        };
        let group = path_group(url);
        if group.is_empty() {
            return;
        }
        let resource = format!("{} {}", method.to_ascii_uppercase(), group);
        span.resource = resource;
    }
}

/// Drops calls to cloud instance metadata endpoints.
#[derive(Debug, Clone)]
pub struct MetadataEndpointFilter {
    paths: Vec<String>,
}

impl MetadataEndpointFilter {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl SpanFilter for MetadataEndpointFilter {
    fn name(&self) -> &'static str {
        "instance_metadata"
    }

    fn should_drop(&self, span: &Span) -> bool {
        span.tag(names::HTTP_URL)
            .is_some_and(|url| self.paths.iter().any(|p| p == url))
    }
}
