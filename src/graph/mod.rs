//! Resource graph module.
//!
//! This module turns declared resources into an immutable, acyclic
//! dependency graph:
//! - Resource identities, nodes and lifecycle options
//! - Attribute values with pending output references
//! - The graph builder and lazy topological ordering

mod builder;
mod node;
mod order;
mod value;

pub use builder::{GraphBuilder, ResourceGraph};
pub use node::{Lifecycle, ResourceId, ResourceNode};
pub use order::TopologicalOrder;
pub use value::{AttrMap, Attribute, OutputRef, Value};
