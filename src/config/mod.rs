//! Configuration module for the Terrace provisioning engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `terrace.yaml`
//! - Validation of configuration values
//! - Building the resource graph from declared resources
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, PROVIDER_TOKEN_VAR, build_graph, find_config_file,
    output_refs,
};
pub use spec::{
    ExecutionConfig, PolicyConfig, ProjectConfig, ProviderConfig, ProviderKind, ResourceConfig,
    StateBackend, StateConfig, TerraceConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
