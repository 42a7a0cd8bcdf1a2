//! Configuration validation for desired-state descriptions.
//!
//! This module checks a parsed configuration before any graph is built, so
//! that every problem is reported at once with the path of the offending field.

use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::graph::{OutputRef, ResourceId, Value};
use crate::planner::PolicyRegistry;

use super::spec::{
    ExecutionConfig, ProjectConfig, ProviderConfig, ProviderKind, ResourceConfig, StateBackend,
    StateConfig, TerraceConfig,
};

/// Upper bound on configured parallelism.
const MAX_PARALLELISM: usize = 64;

/// Validator for project configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &TerraceConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            Err(ConfigError::validation(&first_error.message, &first_error.field).into())
        } else {
            debug!("Configuration validation passed");
            Ok(result)
        }
    }

    /// Runs every check and returns all findings without failing.
    #[must_use]
    pub fn check(&self, config: &TerraceConfig) -> ValidationResult {
        let mut result = ValidationResult::default();
        let registry = PolicyRegistry::with_overrides(&config.policies);

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_execution(&config.execution, &mut result);
        let declared = Self::validate_resources(&config.resources, &registry, &mut result);
        Self::validate_outputs(config, &declared, &mut result);
        Self::warn_unassociated_route_tables(&config.resources, &mut result);

        result
    }

    /// Validates project configuration.
    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_deref().is_none_or(str::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {}
        }
    }

    /// Validates provider configuration.
    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        if provider.kind == ProviderKind::Http {
            match provider.endpoint.as_deref() {
                None | Some("") => {
                    result.error(
                        "provider.endpoint",
                        "An endpoint is required when using the http provider",
                    );
                }
                Some(endpoint) if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") => {
                    result.error(
                        "provider.endpoint",
                        format!("Endpoint '{endpoint}' must be an http(s) URL"),
                    );
                }
                Some(_) => {}
            }
        }

        if provider.timeout_secs == Some(0) {
            result.error("provider.timeout_secs", "Timeout must be at least 1 second");
        }
    }

    /// Validates execution bounds.
    fn validate_execution(execution: &ExecutionConfig, result: &mut ValidationResult) {
        if execution.parallelism == 0 || execution.parallelism > MAX_PARALLELISM {
            result.error(
                "execution.parallelism",
                format!("Parallelism must be between 1 and {MAX_PARALLELISM}"),
            );
        }

        if execution.max_attempts == 0 {
            result.error("execution.max_attempts", "At least one attempt is required");
        }

        if execution.base_delay_ms > execution.max_delay_ms {
            result.error(
                "execution.base_delay_ms",
                "Base delay cannot exceed the maximum delay",
            );
        }
    }

    /// Validates declared resources and returns the set of declared identities.
    fn validate_resources(
        resources: &[ResourceConfig],
        registry: &PolicyRegistry,
        result: &mut ValidationResult,
    ) -> BTreeSet<ResourceId> {
        if resources.is_empty() {
            result.warnings.push(String::from("No resources defined in configuration"));
        }

        let declared: BTreeSet<ResourceId> = resources
            .iter()
            .map(|r| ResourceId::new(&r.kind, &r.name))
            .collect();
        let mut seen = HashSet::new();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !registry.knows(&resource.kind) {
                result.error(
                    format!("{prefix}.type"),
                    format!(
                        "Unknown resource type '{}'. Declare a policy for it under 'policies'.",
                        resource.kind
                    ),
                );
            }

            if !is_valid_resource_name(&resource.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Use letters, digits, '-' and '_'.",
                        resource.name
                    ),
                );
            }

            if !seen.insert((resource.kind.as_str(), resource.name.as_str())) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate resource: {}", resource.address()),
                );
            }

            for (key, value) in &resource.attributes {
                let field = format!("{prefix}.attributes.{key}");
                let mut expressions = Vec::new();
                collect_expressions(value, &mut expressions);
                for expression in expressions {
                    Self::check_reference(expression, &field, &declared, result);
                }
            }

            for (j, dependency) in resource.depends_on.iter().enumerate() {
                let field = format!("{prefix}.depends_on[{j}]");
                match ResourceId::parse(dependency) {
                    Ok(id) if !declared.contains(&id) => {
                        result.error(field, format!("Depends on undeclared resource {id}"));
                    }
                    Ok(_) => {}
                    Err(e) => result.error(field, e.to_string()),
                }
            }

            for attr in &resource.lifecycle.ignore_changes {
                if !resource.attributes.contains_key(attr) {
                    result.warnings.push(format!(
                        "{prefix}.lifecycle.ignore_changes: '{attr}' is not a declared attribute"
                    ));
                }
            }
        }

        declared
    }

    /// Validates named outputs.
    fn validate_outputs(
        config: &TerraceConfig,
        declared: &BTreeSet<ResourceId>,
        result: &mut ValidationResult,
    ) {
        for (name, expression) in &config.outputs {
            let field = format!("outputs.{name}");
            if name.is_empty() {
                result.error("outputs", "Output names cannot be empty");
            }
            Self::check_reference(expression, &field, declared, result);
        }
    }

    /// Checks a single `${type.name.key}` expression.
    fn check_reference(
        expression: &str,
        field: &str,
        declared: &BTreeSet<ResourceId>,
        result: &mut ValidationResult,
    ) {
        match OutputRef::parse(expression) {
            Ok(r) if !declared.contains(&r.resource) => {
                result.error(field, format!("References undeclared resource {}", r.resource));
            }
            Ok(_) => {}
            Err(e) => result.error(field, e.to_string()),
        }
    }

    /// Warns about route tables that no association wires to a subnet.
    fn warn_unassociated_route_tables(resources: &[ResourceConfig], result: &mut ValidationResult) {
        let mut associated = BTreeSet::new();
        for resource in resources.iter().filter(|r| r.kind == "route_table_association") {
            let mut expressions = Vec::new();
            for value in resource.attributes.values() {
                collect_expressions(value, &mut expressions);
            }
            associated.extend(
                expressions
                    .into_iter()
                    .filter_map(|e| OutputRef::parse(e).ok())
                    .map(|r| r.resource),
            );
        }

        for resource in resources.iter().filter(|r| r.kind == "route_table") {
            let id = ResourceId::new(&resource.kind, &resource.name);
            if !associated.contains(&id) {
                result.warnings.push(format!(
                    "{id} is not associated with any subnet (no route_table_association references it)"
                ));
            }
        }
    }
}

/// Collects every string in `value` written in reference syntax.
fn collect_expressions<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) if s.starts_with("${") => out.push(s),
        Value::List(items) => items.iter().for_each(|v| collect_expressions(v, out)),
        Value::Map(entries) => entries.values().for_each(|v| collect_expressions(v, out)),
        _ => {}
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

/// Resource names: ASCII letters, digits, `-` and `_`, starting with a letter.
fn is_valid_resource_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> TerraceConfig {
        serde_yaml::from_str(yaml).expect("valid yaml")
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("network-stack"));
        assert!(is_valid_name("a"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Net")); // uppercase
        assert!(!is_valid_name("1net")); // starts with number
        assert!(!is_valid_name("net-")); // ends with hyphen
        assert!(!is_valid_name("net--stack")); // consecutive hyphens
    }

    #[test]
    fn test_valid_resource_name() {
        assert!(is_valid_resource_name("subnet1"));
        assert!(is_valid_resource_name("vpc-name"));
        assert!(is_valid_resource_name("route_table_2"));
        assert!(!is_valid_resource_name("a.b"));
        assert!(!is_valid_resource_name("-x"));
    }

    #[test]
    fn test_valid_config_passes() {
        let config = parse(
            r#"
project: { name: net }
resources:
  - type: network
    name: main
    attributes: { cidr_block: 10.0.0.0/16 }
  - type: subnet
    name: a
    attributes: { network_id: "${network.main.id}", cidr_block: 10.0.1.0/24 }
outputs:
  subnet_id: "${subnet.a.id}"
"#,
        );
        let result = ConfigValidator::new().validate(&config).expect("valid");
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_reports_every_problem() {
        let config = parse(
            r#"
project: { name: net }
execution: { parallelism: 0 }
resources:
  - type: network
    name: main
  - type: network
    name: main
  - type: database
    name: db
  - type: subnet
    name: a
    attributes: { network_id: "${network.missing.id}", cidr_block: "${broken}" }
    depends_on: [nowhere]
outputs:
  out: "${subnet.b.id}"
"#,
        );
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"execution.parallelism"));
        assert!(fields.contains(&"resources[1].name"));
        assert!(fields.contains(&"resources[2].type"));
        assert!(fields.contains(&"resources[3].attributes.network_id"));
        assert!(fields.contains(&"resources[3].attributes.cidr_block"));
        assert!(fields.contains(&"resources[3].depends_on[0]"));
        assert!(fields.contains(&"outputs.out"));
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_custom_type_needs_policy() {
        let config = parse(
            r"
project: { name: net }
policies:
  database: { replace: [engine], update: [size] }
resources:
  - type: database
    name: db
",
        );
        assert!(ConfigValidator::new().check(&config).is_valid());
    }

    #[test]
    fn test_s3_and_http_requirements() {
        let config = parse(
            r"
project: { name: net }
state: { backend: s3 }
provider: { kind: http }
",
        );
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["state.bucket", "provider.endpoint"]);
    }

    #[test]
    fn test_warns_on_unassociated_route_table() {
        let config = parse(
            r#"
project: { name: net }
resources:
  - type: network
    name: main
  - type: route_table
    name: public
    attributes: { network_id: "${network.main.id}" }
  - type: route_table
    name: second
    attributes: { network_id: "${network.main.id}" }
  - type: subnet
    name: a
    attributes: { network_id: "${network.main.id}" }
  - type: route_table_association
    name: a-public
    attributes: { subnet_id: "${subnet.a.id}", route_table_id: "${route_table.public.id}" }
"#,
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].starts_with("route_table.second"));
    }
}
