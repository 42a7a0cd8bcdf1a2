//! Per-type diff policies.
//!
//! A policy says, for each attribute of a resource type, whether a change can
//! be applied in place or requires the resource to be replaced. Attributes a
//! policy does not mention cannot be changed at all.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::PolicyConfig;

/// How a changed attribute is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeAction {
    /// Update the resource in place.
    Update,
    /// Delete and recreate the resource.
    Replace,
}

/// Diff policy of a single resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPolicy {
    replace: BTreeSet<String>,
    update: BTreeSet<String>,
}

/// Registry of diff policies by resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, DiffPolicy>,
}

/// Built-in resource types: `(type, replace attributes, update attributes)`.
const BUILTIN_POLICIES: &[(&str, &[&str], &[&str])] = &[
    (
        "network",
        &["cidr_block", "instance_tenancy"],
        &["tags", "enable_dns_hostnames", "enable_dns_support"],
    ),
    (
        "subnet",
        &["network_id", "cidr_block", "availability_zone"],
        &["tags", "map_public_ip_on_launch"],
    ),
    ("internet_gateway", &[], &["network_id", "tags"]),
    ("default_route_table", &["default_route_table_id"], &["routes", "tags"]),
    ("route_table", &["network_id"], &["routes", "tags"]),
    ("route_table_association", &["subnet_id", "route_table_id"], &[]),
    (
        "security_group",
        &["network_id", "name", "description"],
        &["ingress", "egress", "tags"],
    ),
    (
        "instance",
        &[
            "ami",
            "subnet_id",
            "key_name",
            "associate_public_ip_address",
            "security_groups",
        ],
        &["instance_type", "tags", "vpc_security_group_ids"],
    ),
    (
        "target_group",
        &["port", "protocol", "target_type", "network_id"],
        &["tags", "health_check"],
    ),
    (
        "target_group_attachment",
        &["target_group_arn", "target_id", "port"],
        &[],
    ),
    (
        "load_balancer",
        &["load_balancer_type", "internal", "name"],
        &["subnets", "security_groups", "tags"],
    ),
    (
        "listener",
        &["load_balancer_arn"],
        &["port", "protocol", "default_actions"],
    ),
    (
        "container_registry",
        &["name"],
        &["image_scanning_configuration", "image_tag_mutability", "tags"],
    ),
];

impl DiffPolicy {
    /// Creates a policy from attribute lists.
    #[must_use]
    pub fn new<R, U>(replace: R, update: U) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        U: IntoIterator,
        U::Item: Into<String>,
    {
        let replace: BTreeSet<String> = replace.into_iter().map(Into::into).collect();
        let update = update
            .into_iter()
            .map(Into::into)
            .filter(|a| !replace.contains(a))
            .collect();
        Self { replace, update }
    }

    /// Classifies a changed attribute, or `None` if the policy has no entry.
    #[must_use]
    pub fn classify(&self, attribute: &str) -> Option<ChangeAction> {
        if self.replace.contains(attribute) {
            Some(ChangeAction::Replace)
        } else if self.update.contains(attribute) {
            Some(ChangeAction::Update)
        } else {
            None
        }
    }

    /// Moves the listed attributes into this policy, overriding existing entries.
    fn merge(&mut self, config: &PolicyConfig) {
        for attr in &config.replace {
            self.update.remove(attr);
            self.replace.insert(attr.clone());
        }
        for attr in &config.update {
            self.replace.remove(attr);
            self.update.insert(attr.clone());
        }
    }
}

impl PolicyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            policies: BTreeMap::new(),
        }
    }

    /// Creates a registry with the built-in resource types.
    #[must_use]
    pub fn builtin() -> Self {
        let policies = BUILTIN_POLICIES
            .iter()
            .map(|(kind, replace, update)| {
                (
                    (*kind).to_string(),
                    DiffPolicy::new(replace.iter().copied(), update.iter().copied()),
                )
            })
            .collect();
        Self { policies }
    }

    /// Creates the built-in registry extended by configured policies.
    ///
    /// A configured type that is also built in keeps its built-in entries for
    /// attributes the configuration does not mention.
    #[must_use]
    pub fn with_overrides(overrides: &BTreeMap<String, PolicyConfig>) -> Self {
        let mut registry = Self::builtin();
        for (kind, config) in overrides {
            registry
                .policies
                .entry(kind.clone())
                .or_default()
                .merge(config);
        }
        registry
    }

    /// Registers or replaces the policy of a type.
    pub fn insert(&mut self, kind: impl Into<String>, policy: DiffPolicy) {
        self.policies.insert(kind.into(), policy);
    }

    /// Builder-style variant of [`Self::insert`].
    #[must_use]
    pub fn with(mut self, kind: impl Into<String>, policy: DiffPolicy) -> Self {
        self.insert(kind, policy);
        self
    }

    /// Returns true if the type has a policy.
    #[must_use]
    pub fn knows(&self, kind: &str) -> bool {
        self.policies.contains_key(kind)
    }

    /// Returns the known types.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Classifies a changed attribute of a type.
    #[must_use]
    pub fn classify(&self, kind: &str, attribute: &str) -> Option<ChangeAction> {
        self.policies.get(kind)?.classify(attribute)
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_classification() {
        let registry = PolicyRegistry::builtin();
        assert_eq!(
            registry.classify("subnet", "cidr_block"),
            Some(ChangeAction::Replace)
        );
        assert_eq!(registry.classify("subnet", "tags"), Some(ChangeAction::Update));
        assert_eq!(registry.classify("subnet", "colour"), None);
        assert_eq!(registry.classify("database", "engine"), None);
        assert!(registry.knows("container_registry"));
        assert_eq!(registry.kinds().count(), BUILTIN_POLICIES.len());
    }

    #[test]
    fn test_overrides_merge_with_builtin() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            String::from("listener"),
            PolicyConfig {
                replace: vec![String::from("port")],
                update: vec![],
            },
        );
        overrides.insert(
            String::from("database"),
            PolicyConfig {
                replace: vec![String::from("engine")],
                update: vec![String::from("size")],
            },
        );

        let registry = PolicyRegistry::with_overrides(&overrides);
        assert_eq!(registry.classify("listener", "port"), Some(ChangeAction::Replace));
        assert_eq!(
            registry.classify("listener", "protocol"),
            Some(ChangeAction::Update)
        );
        assert_eq!(registry.classify("database", "size"), Some(ChangeAction::Update));
    }

    #[test]
    fn test_replace_wins_within_one_policy() {
        let policy = DiffPolicy::new(["port"], ["port", "tags"]);
        assert_eq!(policy.classify("port"), Some(ChangeAction::Replace));
        assert_eq!(policy.classify("tags"), Some(ChangeAction::Update));
    }
}
