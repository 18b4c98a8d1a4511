use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Identity tag keys that always carry the resolved configuration values.
pub const SERVICE: &str = "service";
pub const ENV: &str = "env";
pub const VERSION: &str = "version";
pub const GIT_COMMIT_SHA: &str = "git.commit.sha";
pub const GIT_REPOSITORY_URL: &str = "git.repository_url";

// ---------------------------------------------------------------------------
// TagValue
// ---------------------------------------------------------------------------

/// A tag value: either text or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Str(s) => f.write_str(s),
            TagValue::Int(i) => write!(f, "{i}"),
            TagValue::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Str(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Str(v)
    }
}

impl From<&String> for TagValue {
    fn from(v: &String) -> Self {
        TagValue::Str(v.clone())
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        TagValue::Int(v.into())
    }
}

impl From<u32> for TagValue {
    fn from(v: u32) -> Self {
        TagValue::Int(v.into())
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Str(v.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// A key/value tag set. Keys are unique; inserting an existing key replaces
/// its value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tags(BTreeMap<String, TagValue>);

impl Tags {
    /// An empty tag map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Tags::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a tag.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Value for `key`, if set.
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every tag from `other` into `self`; `other` wins on collision.
    pub fn overlay(&mut self, other: &Tags) {
        for (k, v) in other.iter() {
            self.0.insert(k.to_string(), v.clone());
        }
    }

    /// The identity tags for a resolved configuration.
    pub fn identity(config: &Config) -> Self {
        Tags::new()
            .with(SERVICE, config.service_name())
            .with(ENV, config.environment())
            .with(VERSION, config.version())
            .with(GIT_COMMIT_SHA, config.version())
            .with(GIT_REPOSITORY_URL, config.repository_url())
    }

    /// Serialize as `key:value` strings.
    pub fn to_wire(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{k}:{v}")).collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Tags
where
    K: Into<String>,
    V: Into<TagValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for (k, v) in iter {
            tags.insert(k, v);
        }
        tags
    }
}

impl From<&[(&str, &str)]> for Tags {
    fn from(pairs: &[(&str, &str)]) -> Self {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Tags {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Merge user tags with identity tags and serialize to `key:value` form.
///
/// Identity tags win on key collision so call sites can never relabel the
/// service, environment or version a metric belongs to.
pub fn format_tags(config: &Config, user: &Tags) -> Vec<String> {
    let mut merged = user.clone();
    merged.overlay(&Tags::identity(config));
    merged.to_wire()
}
