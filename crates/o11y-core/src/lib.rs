//! Configuration and shaping primitives for the o11y integration layer.
//!
//! Everything in this crate is pure or lazily memoized; nothing here talks to
//! the network. The telemetry crate builds emission and span processing on
//! top of these pieces.
//!
//! Key components:
//! - **Config**: precedence-ordered, memoized identity and agent connectivity,
//!   plus the `enabled` gate
//! - **Env**: the environment-variable source the resolver reads from
//! - **Tags**: user tag maps merged with identity tags into `key:value` form
//! - **Path groups**: low-cardinality generalization of request paths

pub mod config;
pub mod env;
pub mod path_group;
pub mod tags;

pub use config::{Config, ConfigError, Overrides};
pub use env::{EnvSource, MapEnv, ProcessEnv};
pub use path_group::path_group;
pub use tags::{format_tags, TagValue, Tags};
