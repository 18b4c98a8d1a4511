use std::path::Path;
use std::sync::{Arc, OnceLock};

use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::env::{vars, EnvSource, ProcessEnv};

/// Value used for any identity field that cannot be resolved.
pub const UNKNOWN: &str = "unknown";
/// Agent host when neither the metadata file nor `DD_AGENT_URI` names one.
pub const DEFAULT_AGENT_HOST: &str = "localhost";
/// Trace intake port on the agent; statsd listens one below it.
pub const DEFAULT_TRACING_PORT: u16 = 8126;
/// Port the agent sidecar listens on when discovered through ECS metadata.
pub const ECS_AGENT_PORT: u16 = 9126;
/// Intake site for direct API submission when `DD_SITE` is unset.
pub const DEFAULT_SITE: &str = "datadoghq.com";

/// Environments where instrumentation is on without an explicit agent URI.
const ENABLED_ENVIRONMENTS: &[&str] = &["production", "staging"];

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Values supplied explicitly at init time. Anything set here beats every
/// environment signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub service_name: Option<String>,
    pub version: Option<String>,
    pub environment: Option<String>,
    pub repository_url: Option<String>,
    pub aws_region: Option<String>,
}

impl Overrides {
    /// Service name, beating `SERVICE_NAME`.
    pub fn with_service_name(mut self, value: impl Into<String>) -> Self {
        self.service_name = Some(value.into());
        self
    }

    /// Version string, beating the revision/platform combination.
    pub fn with_version(mut self, value: impl Into<String>) -> Self {
        self.version = Some(value.into());
        self
    }

    /// Environment, beating `O11Y_ENV` and `RAILS_ENV`.
    pub fn with_environment(mut self, value: impl Into<String>) -> Self {
        self.environment = Some(value.into());
        self
    }

    /// Repository URL, beating the `github.com/degica/<service>` default.
    pub fn with_repository_url(mut self, value: impl Into<String>) -> Self {
        self.repository_url = Some(value.into());
        self
    }

    /// AWS region, beating `O11Y_AWS_REGION`.
    pub fn with_aws_region(mut self, value: impl Into<String>) -> Self {
        self.aws_region = Some(value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Agent endpoint
// ---------------------------------------------------------------------------

/// Where the local trace/statsd agent can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub host: String,
    pub tracing_port: u16,
}

impl Default for AgentEndpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_AGENT_HOST.to_string(),
            tracing_port: DEFAULT_TRACING_PORT,
        }
    }
}

impl AgentEndpoint {
    /// Parse an agent URI such as `http://10.0.0.5:8126`. A bare `host:port`
    /// is accepted and treated as http.
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let uri = uri.trim();
        let parsed = if uri.contains("://") {
            Url::parse(uri)
        } else {
            Url::parse(&format!("http://{uri}"))
        }
        .map_err(|e| ConfigError::AgentUri(format!("{uri}: {e}")))?;

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::AgentUri(format!("{uri}: missing host")))?;

        Ok(Self {
            host: host.to_string(),
            tracing_port: parsed.port().unwrap_or(DEFAULT_TRACING_PORT),
        })
    }

    /// The statsd port sits directly below the tracing port.
    pub fn statsd_port(&self) -> u16 {
        self.tracing_port.saturating_sub(1)
    }
}

#[derive(Debug, Deserialize)]
struct ContainerMetadata {
    #[serde(rename = "HostPrivateIPv4Address")]
    host_private_ipv4_address: Option<String>,
}

/// Read the ECS container metadata file and derive the agent URI from the
/// host's private IP.
pub fn agent_uri_from_metadata(path: impl AsRef<Path>) -> Result<Option<String>, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
    let metadata: ContainerMetadata =
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    Ok(metadata
        .host_private_ipv4_address
        .filter(|ip| !ip.is_empty())
        .map(|ip| format!("http://{ip}:{ECS_AGENT_PORT}")))
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Resolved operating configuration.
///
/// Every field is computed on first access and memoized. Concurrent first
/// reads may both compute, but resolution is deterministic over a fixed
/// environment so whichever value lands in the cell is the same.
pub struct Config {
    overrides: Overrides,
    env: Arc<dyn EnvSource>,
    service_name: OnceLock<String>,
    version: OnceLock<String>,
    environment: OnceLock<String>,
    repository_url: OnceLock<String>,
    aws_region: OnceLock<Option<String>>,
    enabled: OnceLock<bool>,
    agent: OnceLock<AgentEndpoint>,
    api_key: OnceLock<Option<String>>,
    site: OnceLock<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("overrides", &self.overrides)
            .field("service_name", &self.service_name.get())
            .field("version", &self.version.get())
            .field("environment", &self.environment.get())
            .field("repository_url", &self.repository_url.get())
            .field("aws_region", &self.aws_region.get())
            .field("enabled", &self.enabled.get())
            .field("agent", &self.agent.get())
            .field("api_key", &self.api_key.get().map(|k| k.as_ref().map(|_| "***")))
            .finish()
    }
}

impl Config {
    /// Resolve against the real process environment.
    pub fn from_env(overrides: Overrides) -> Self {
        Self::with_env(overrides, Arc::new(ProcessEnv))
    }

    /// Resolve against an explicit environment source.
    pub fn with_env(overrides: Overrides, env: Arc<dyn EnvSource>) -> Self {
        Self {
            overrides,
            env,
            service_name: OnceLock::new(),
            version: OnceLock::new(),
            environment: OnceLock::new(),
            repository_url: OnceLock::new(),
            aws_region: OnceLock::new(),
            enabled: OnceLock::new(),
            agent: OnceLock::new(),
            api_key: OnceLock::new(),
            site: OnceLock::new(),
        }
    }

    /// The overrides this config was built with.
    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    // -- Identity -----------------------------------------------------------

    /// Explicit override, then `SERVICE_NAME`, then `unknown`.
    pub fn service_name(&self) -> &str {
        self.service_name.get_or_init(|| {
            self.overrides
                .service_name
                .clone()
                .or_else(|| self.env.get_non_empty(vars::SERVICE_NAME))
                .unwrap_or_else(|| UNKNOWN.to_string())
        })
    }

    /// `<revision>-<platform>` when a platform is set, otherwise the revision.
    pub fn version(&self) -> &str {
        self.version.get_or_init(|| {
            if let Some(v) = self.overrides.version.clone() {
                return v;
            }
            let revision = self
                .env
                .get_non_empty(vars::REVISION)
                .unwrap_or_else(|| UNKNOWN.to_string());
            match self.env.get_non_empty(vars::PLATFORM) {
                Some(platform) => format!("{revision}-{platform}"),
                None => revision,
            }
        })
    }

    /// Explicit override, then `O11Y_ENV`, then `RAILS_ENV`, then `unknown`.
    pub fn environment(&self) -> &str {
        self.environment.get_or_init(|| {
            self.overrides
                .environment
                .clone()
                .or_else(|| self.env.get_non_empty(vars::O11Y_ENV))
                .or_else(|| self.env.get_non_empty(vars::RAILS_ENV))
                .unwrap_or_else(|| UNKNOWN.to_string())
        })
    }

    /// Explicit override, otherwise derived from the service name.
    pub fn repository_url(&self) -> &str {
        self.repository_url.get_or_init(|| {
            self.overrides
                .repository_url
                .clone()
                .unwrap_or_else(|| format!("github.com/degica/{}", self.service_name()))
        })
    }

    /// Explicit override, then `O11Y_AWS_REGION`.
    pub fn aws_region(&self) -> Option<&str> {
        self.aws_region
            .get_or_init(|| {
                self.overrides
                    .aws_region
                    .clone()
                    .or_else(|| self.env.get_non_empty(vars::O11Y_AWS_REGION))
            })
            .as_deref()
    }

    // -- Gate ---------------------------------------------------------------

    /// Whether instrumentation is active at all.
    ///
    /// The force-disable flag beats everything. Otherwise production and
    /// staging are on, and any environment can opt in by naming an agent.
    pub fn enabled(&self) -> bool {
        *self.enabled.get_or_init(|| {
            if self.force_disabled() {
                return false;
            }
            ENABLED_ENVIRONMENTS.contains(&self.environment())
                || self.env.get_non_empty(vars::DD_AGENT_URI).is_some()
        })
    }

    fn force_disabled(&self) -> bool {
        match self.env.get(vars::DISABLE_DEGICA_DATADOG) {
            Some(v) => {
                let v = v.trim();
                !(v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false"))
            }
            None => false,
        }
    }

    // -- Connectivity -------------------------------------------------------

    /// Resolved agent endpoint. Defaults when instrumentation is disabled.
    pub fn agent(&self) -> &AgentEndpoint {
        self.agent.get_or_init(|| self.resolve_agent())
    }

    /// Host of the resolved agent.
    pub fn agent_host(&self) -> &str {
        &self.agent().host
    }

    /// Trace port of the resolved agent.
    pub fn tracing_port(&self) -> u16 {
        self.agent().tracing_port
    }

    /// DogStatsD port, one below the trace port.
    pub fn statsd_port(&self) -> u16 {
        self.agent().statsd_port()
    }

    fn resolve_agent(&self) -> AgentEndpoint {
        if !self.enabled() {
            return AgentEndpoint::default();
        }

        let uri = self
            .metadata_agent_uri()
            .or_else(|| self.env.get_non_empty(vars::DD_AGENT_URI));

        match uri {
            Some(uri) => match AgentEndpoint::parse(&uri) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!(error = %e, "ignoring unparseable agent uri");
                    AgentEndpoint::default()
                }
            },
            None => AgentEndpoint::default(),
        }
    }

    fn metadata_agent_uri(&self) -> Option<String> {
        let path = self.env.get_non_empty(vars::ECS_CONTAINER_METADATA_FILE)?;
        match agent_uri_from_metadata(&path) {
            Ok(uri) => uri,
            Err(e) => {
                warn!(error = %e, path = %path, "could not read container metadata");
                None
            }
        }
    }

    // -- Credentials --------------------------------------------------------

    /// API key for direct API submission. Only needed for historical metrics.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .get_or_init(|| self.env.get_non_empty(vars::DD_API_KEY))
            .as_deref()
    }

    /// `DD_SITE`, or `datadoghq.com`.
    pub fn site(&self) -> &str {
        self.site.get_or_init(|| {
            self.env
                .get_non_empty(vars::DD_SITE)
                .unwrap_or_else(|| DEFAULT_SITE.to_string())
        })
    }

    /// Log the resolved configuration once at startup.
    pub fn log_summary(&self) {
        info!(
            service = self.service_name(),
            env = self.environment(),
            version = self.version(),
            enabled = self.enabled(),
            "o11y configuration resolved"
        );
        if self.enabled() {
            info!(
                agent_host = self.agent_host(),
                tracing_port = self.tracing_port(),
                statsd_port = self.statsd_port(),
                "agent connectivity"
            );
        }
        match self.api_key() {
            Some(key) => debug!(
                api_key = %format!("{}***", key.chars().take(4).collect::<String>()),
                "api key present"
            ),
            None => debug!("api key not set (historical metrics unavailable)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("agent uri: {0}")]
    AgentUri(String),
}
