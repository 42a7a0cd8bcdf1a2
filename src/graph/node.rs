//! Resource identities and nodes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ConfigError;

use super::value::{AttrMap, Attribute, OutputRef};

/// Identity of a resource: its type plus a name unique within that type.
///
/// Rendered and serialized as `type.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Resource type (e.g. `subnet`).
    pub kind: String,
    /// Resource name, unique within the type.
    pub name: String,
}

/// Per-resource lifecycle options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Attributes whose changes never trigger an update or replacement.
    #[serde(default)]
    pub ignore_changes: Vec<String>,
    /// Refuse to delete or replace this resource.
    #[serde(default)]
    pub protect: bool,
    /// On replacement, create the new resource before deleting the old one.
    #[serde(default)]
    pub create_before_destroy: bool,
}

/// A typed, addressable unit of desired state.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    /// Identity.
    pub id: ResourceId,
    /// Declared attributes, possibly containing pending references.
    pub attributes: BTreeMap<String, Attribute>,
    /// Explicit dependencies in addition to those implied by references.
    pub depends_on: BTreeSet<ResourceId>,
    /// Lifecycle options.
    pub lifecycle: Lifecycle,
}

impl ResourceId {
    /// Creates a new resource identity.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parses a `type.name` identity.
    ///
    /// # Errors
    ///
    /// Returns an error unless the value has exactly two non-empty segments.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.split_once('.') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() && !name.contains('.') => {
                Ok(Self::new(kind, name))
            }
            _ => Err(ConfigError::InvalidResourceId {
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl ResourceNode {
    /// Creates a node with no attributes.
    #[must_use]
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    /// Creates a node from declared values, detecting references.
    ///
    /// # Errors
    ///
    /// Returns an error if any reference expression is malformed.
    pub fn from_values(id: ResourceId, attributes: AttrMap) -> Result<Self, ConfigError> {
        let attributes = attributes
            .into_iter()
            .map(|(k, v)| Ok((k, Attribute::from_value(v)?)))
            .collect::<Result<_, ConfigError>>()?;

        Ok(Self {
            attributes,
            ..Self::new(id)
        })
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Attribute>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn with_depends_on(mut self, id: ResourceId) -> Self {
        self.depends_on.insert(id);
        self
    }

    /// Sets lifecycle options.
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Returns the resource type.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.id.kind
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Returns every output reference in the node's attributes.
    #[must_use]
    pub fn references(&self) -> Vec<&OutputRef> {
        let mut refs = Vec::new();
        for attr in self.attributes.values() {
            attr.collect_references(&mut refs);
        }
        refs
    }

    /// Returns every resource this node depends on, through references or
    /// explicitly.
    #[must_use]
    pub fn required_resources(&self) -> BTreeSet<&ResourceId> {
        self.references()
            .into_iter()
            .map(|r| &r.resource)
            .chain(self.depends_on.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::value::Value;

    #[test]
    fn test_resource_id_roundtrip() {
        let id = ResourceId::parse("security_group.sg-name").expect("valid id");
        assert_eq!(id.kind, "security_group");
        assert_eq!(id.name, "sg-name");
        assert_eq!(String::from(id), "security_group.sg-name");
    }

    #[test]
    fn test_resource_id_invalid() {
        assert!(ResourceId::parse("subnet").is_err());
        assert!(ResourceId::parse(".a").is_err());
        assert!(ResourceId::parse("a.b.c").is_err());
    }

    #[test]
    fn test_required_resources_merges_explicit_and_references() {
        let mut attrs = AttrMap::new();
        attrs.insert(String::from("vpc_id"), Value::from("${network.vpc.id}"));
        attrs.insert(String::from("cidr_block"), Value::from("10.0.1.0/24"));

        let node = ResourceNode::from_values(ResourceId::new("subnet", "a"), attrs)
            .expect("valid node")
            .with_depends_on(ResourceId::new("internet_gateway", "igw"));

        let required: Vec<String> = node
            .required_resources()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(required, vec!["internet_gateway.igw", "network.vpc"]);
    }
}
