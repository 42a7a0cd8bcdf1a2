//! Configuration parser for loading configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling, and turns a parsed
//! configuration into a resource graph.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::graph::{GraphBuilder, OutputRef, ResourceGraph, ResourceId, ResourceNode};

use super::spec::TerraceConfig;

/// Environment variable carrying the HTTP provider bearer token.
pub const PROVIDER_TOKEN_VAR: &str = "TERRACE_PROVIDER_TOKEN";

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["terrace.yaml", "terrace.yml"];

/// Configuration parser for loading project configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<TerraceConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<TerraceConfig> {
        debug!("Parsing YAML configuration");

        let config: TerraceConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })?;

        debug!(
            "Parsed configuration for project {} ({} resources)",
            config.project.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `TERRACE_<SECTION>_<KEY>` (e.g., `TERRACE_PROJECT_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<TerraceConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides looked up by environment variable name.
    pub fn apply_overrides<F>(config: &mut TerraceConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("TERRACE_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(env) = lookup("TERRACE_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Some(bucket) = lookup("TERRACE_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup("TERRACE_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(endpoint) = lookup("TERRACE_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the HTTP provider token from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn get_provider_token() -> Result<String> {
        std::env::var(PROVIDER_TOKEN_VAR).map_err(|_| {
            ConfigError::MissingEnvVar {
                name: String::from(PROVIDER_TOKEN_VAR),
            }
            .into()
        })
    }
}

/// Builds the resource graph declared by a configuration.
///
/// # Errors
///
/// Returns an error for malformed references or identities, duplicate
/// resources, dangling references and dependency cycles.
pub fn build_graph(config: &TerraceConfig) -> Result<ResourceGraph> {
    let mut builder = GraphBuilder::new();

    for resource in &config.resources {
        let id = ResourceId::new(&resource.kind, &resource.name);
        let mut node = ResourceNode::from_values(id, resource.attributes.clone())?
            .with_lifecycle(resource.lifecycle.clone());
        for dependency in &resource.depends_on {
            node = node.with_depends_on(ResourceId::parse(dependency)?);
        }
        builder.add(node)?;
    }

    let graph = builder.build()?;
    debug!("Built resource graph with {} nodes", graph.len());
    Ok(graph)
}

/// Parses the named outputs of a configuration.
///
/// # Errors
///
/// Returns an error if an output expression is malformed.
pub fn output_refs(config: &TerraceConfig) -> Result<BTreeMap<String, OutputRef>> {
    config
        .outputs
        .iter()
        .map(|(name, expression)| Ok((name.clone(), OutputRef::parse(expression)?)))
        .collect()
}

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}
