use std::collections::HashMap;

/// Environment variable names read by the resolver.
pub mod vars {
    pub const RAILS_ENV: &str = "RAILS_ENV";
    pub const O11Y_ENV: &str = "O11Y_ENV";
    pub const SERVICE_NAME: &str = "SERVICE_NAME";
    pub const PLATFORM: &str = "PLATFORM";
    pub const REVISION: &str = "REVISION";
    pub const O11Y_AWS_REGION: &str = "O11Y_AWS_REGION";
    pub const DD_AGENT_URI: &str = "DD_AGENT_URI";
    pub const ECS_CONTAINER_METADATA_FILE: &str = "ECS_CONTAINER_METADATA_FILE";
    pub const DISABLE_DEGICA_DATADOG: &str = "DISABLE_DEGICA_DATADOG";
    pub const DD_API_KEY: &str = "DD_API_KEY";
    pub const DD_SITE: &str = "DD_SITE";
}

/// Source of environment variables for configuration resolution.
///
/// Production code uses [`ProcessEnv`]; tests build a [`MapEnv`] so each test
/// resolves against its own fixed environment.
pub trait EnvSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Like [`EnvSource::get`] but treats an empty value as unset.
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty())
    }
}

/// Reads from the real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// A fixed, in-memory environment.
#[derive(Debug, Default, Clone)]
pub struct MapEnv(HashMap<String, String>);

impl MapEnv {
    /// An empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one variable.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Build from `(name, value)` pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl EnvSource for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}
