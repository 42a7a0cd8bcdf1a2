//! Attribute values and unresolved output references.
//!
//! Declared attributes are trees of [`Attribute`]s. Leaves are either a
//! resolved [`Value`] or a [`Attribute::Pending`] reference to another
//! resource's output, which only becomes known once that resource has been
//! applied.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

use super::node::ResourceId;

/// Map of attribute name to resolved value.
pub type AttrMap = BTreeMap<String, Value>;

/// A fully resolved attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// String.
    String(String),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
}

/// A reference to an output of another resource, written `${type.name.key}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    /// Referenced resource.
    pub resource: ResourceId,
    /// Output key on that resource.
    pub key: String,
}

/// A declared attribute: resolved data, a pending reference, or a
/// container of further attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// A scalar or null value known at declaration time.
    Literal(Value),
    /// A value only known after the referenced resource is applied.
    Pending(OutputRef),
    /// A list whose elements may contain references.
    List(Vec<Attribute>),
    /// A map whose values may contain references.
    Map(BTreeMap<String, Attribute>),
}

impl Value {
    /// Returns the string slice if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(_) | Self::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                write!(f, "{json}")
            }
        }
    }
}

impl OutputRef {
    /// Creates a new output reference.
    #[must_use]
    pub fn new(resource: ResourceId, key: impl Into<String>) -> Self {
        Self {
            resource,
            key: key.into(),
        }
    }

    /// Returns true if the string is written in reference syntax.
    #[must_use]
    pub fn is_expression(s: &str) -> bool {
        s.starts_with("${") && s.ends_with('}')
    }

    /// Parses a `${type.name.key}` expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is not exactly three non-empty,
    /// dot-separated segments wrapped in `${...}`.
    pub fn parse(expression: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidReference {
            expression: expression.to_string(),
        };

        let inner = expression
            .strip_prefix("${")
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(invalid)?;

        let mut parts = inner.split('.');
        let (Some(kind), Some(name), Some(key), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        if kind.is_empty() || name.is_empty() || key.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(ResourceId::new(kind, name), key))
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.key)
    }
}

impl Attribute {
    /// Converts a declared value into an attribute tree, turning every
    /// string written in reference syntax into a pending reference.
    ///
    /// # Errors
    ///
    /// Returns an error if a string looks like a reference but is malformed.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        Ok(match value {
            Value::String(s) if OutputRef::is_expression(&s) => Self::Pending(OutputRef::parse(&s)?),
            Value::List(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_value)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k, Self::from_value(v)?)))
                    .collect::<Result<_, ConfigError>>()?,
            ),
            scalar => Self::Literal(scalar),
        })
    }

    /// Collects every reference contained in this attribute.
    pub fn collect_references<'a>(&'a self, out: &mut Vec<&'a OutputRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Pending(r) => out.push(r),
            Self::List(items) => items.iter().for_each(|a| a.collect_references(out)),
            Self::Map(entries) => entries.values().for_each(|a| a.collect_references(out)),
        }
    }

    /// Returns true if any leaf is still a pending reference.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        match self {
            Self::Literal(_) => false,
            Self::Pending(_) => true,
            Self::List(items) => items.iter().any(Self::is_pending),
            Self::Map(entries) => entries.values().any(Self::is_pending),
        }
    }

    /// Resolves the attribute through `lookup`.
    ///
    /// `lookup` returns `Ok(None)` when the referenced output is not known yet;
    /// the whole attribute is then unknown and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `lookup`.
    pub fn try_resolve<E, F>(&self, lookup: &mut F) -> Result<Option<Value>, E>
    where
        F: FnMut(&OutputRef) -> Result<Option<Value>, E>,
    {
        match self {
            Self::Literal(v) => Ok(Some(v.clone())),
            Self::Pending(r) => lookup(r),
            Self::List(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    match item.try_resolve(lookup)? {
                        Some(v) => resolved.push(v),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::List(resolved)))
            }
            Self::Map(entries) => {
                let mut resolved = BTreeMap::new();
                for (k, item) in entries {
                    match item.try_resolve(lookup)? {
                        Some(v) => {
                            resolved.insert(k.clone(), v);
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::Map(resolved)))
            }
        }
    }
}

impl From<Value> for Attribute {
    fn from(value: Value) -> Self {
        match value {
            Value::List(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Map(entries) => {
                Self::Map(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
            scalar => Self::Literal(scalar),
        }
    }
}

impl From<OutputRef> for Attribute {
    fn from(r: OutputRef) -> Self {
        Self::Pending(r)
    }
}
