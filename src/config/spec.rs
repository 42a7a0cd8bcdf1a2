//! Configuration specification types for the provisioning engine.
//!
//! This module defines all the structs that map to the `terrace.yaml` file.
//! These types describe the desired state declaratively; they are turned into a
//! [`ResourceGraph`](crate::graph::ResourceGraph) by the parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::graph::{AttrMap, Lifecycle};

/// The root configuration structure for a Terrace project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerraceConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Execution tuning.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Diff policies for custom types, or overrides of built-in ones.
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyConfig>,
    /// Declared resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Named run outputs, each a `${type.name.key}` expression.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Which provider implementation to use.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL of the provider plugin (http provider).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region passed to the provider.
    #[serde(default)]
    pub region: Option<String>,
    /// Persistence file of the simulated provider.
    #[serde(default)]
    pub path: Option<String>,
    /// Per-request timeout in seconds (http provider).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Provider implementations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process simulated cloud.
    #[default]
    Simulated,
    /// Remote provider plugin speaking JSON over HTTP.
    Http,
}

/// Execution tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Maximum number of provider calls in flight.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Attempts per operation, first call included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Diff policy of one resource type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Attributes whose change requires replacement.
    #[serde(default)]
    pub replace: Vec<String>,
    /// Attributes that can be updated in place.
    #[serde(default)]
    pub update: Vec<String>,
}

/// A declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Resource type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Name, unique within the type.
    pub name: String,
    /// Declared attributes; strings of the form `${type.name.key}` are references.
    #[serde(default)]
    pub attributes: AttrMap,
    /// Explicit dependencies as `type.name`.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Lifecycle options.
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ResourceConfig {
    /// Returns the `type.name` address of this resource.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }
}

// Default value functions

fn default_environment() -> String {
    String::from("dev")
}

const fn default_parallelism() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    4
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    8000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Value;

    #[test]
    fn test_defaults() {
        let yaml = r"
project:
  name: net
";
        let config: TerraceConfig = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.provider.kind, ProviderKind::Simulated);
        assert_eq!(config.execution, ExecutionConfig::default());
        assert_eq!(config.execution.parallelism, 4);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_resource_shape() {
        let yaml = r#"
type: subnet
name: subnet1
attributes:
  network_id: "${network.main.id}"
  cidr_block: 10.0.1.0/24
  map_public_ip_on_launch: true
depends_on: [internet_gateway.igw]
lifecycle:
  ignore_changes: [tags]
"#;
        let resource: ResourceConfig = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(resource.address(), "subnet.subnet1");
        assert_eq!(
            resource.attributes.get("map_public_ip_on_launch"),
            Some(&Value::Bool(true))
        );
        assert_eq!(resource.depends_on, vec!["internet_gateway.igw"]);
        assert_eq!(resource.lifecycle.ignore_changes, vec!["tags"]);
        assert!(!resource.lifecycle.protect);
    }
}
