//! Graph builder and the immutable resource graph it produces.
//!
//! Nodes are accumulated in declaration order by a [`GraphBuilder`] and
//! finalized once by [`GraphBuilder::build`], which resolves every reference
//! into an edge and rejects dangling references and cycles.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::GraphError;

use super::node::{ResourceId, ResourceNode};
use super::order::{TopologicalOrder, cycle_members};

/// Accumulates resource declarations before they are frozen into a graph.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    /// Nodes in declaration order.
    nodes: Vec<ResourceNode>,
    /// Identity to position in `nodes`.
    index: HashMap<ResourceId, usize>,
}

/// Immutable, acyclic graph of resource nodes.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// Nodes in declaration order.
    nodes: Vec<ResourceNode>,
    /// Identity to position in `nodes`.
    index: HashMap<ResourceId, usize>,
    /// For each node, the nodes it depends on (sorted).
    dependencies: Vec<Vec<usize>>,
    /// For each node, the nodes depending on it (sorted).
    dependents: Vec<Vec<usize>>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a node.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with the same identity was already declared.
    pub fn add(&mut self, node: ResourceNode) -> Result<(), GraphError> {
        if self.index.contains_key(&node.id) {
            return Err(GraphError::DuplicateResource {
                id: node.id.to_string(),
            });
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Declares a node, builder style.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with the same identity was already declared.
    pub fn with(mut self, node: ResourceNode) -> Result<Self, GraphError> {
        self.add(node)?;
        Ok(self)
    }

    /// Returns the number of declared nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing has been declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Finalizes the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Reference`] for a reference to an undeclared
    /// resource and [`GraphError::Cycle`] if the dependencies are cyclic.
    pub fn build(self) -> Result<ResourceGraph, GraphError> {
        let Self { nodes, index } = self;

        let mut dependencies = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let mut deps = BTreeSet::new();
            for target in node.required_resources() {
                let Some(&dep) = index.get(target) else {
                    return Err(GraphError::Reference {
                        from: node.id.to_string(),
                        target: target.to_string(),
                    });
                };
                deps.insert(dep);
            }
            dependencies.push(deps.into_iter().collect::<Vec<_>>());
        }

        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, deps) in dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(i);
            }
        }

        let members = cycle_members(&dependencies);
        if !members.is_empty() {
            let mut members: Vec<String> = members.into_iter().map(|i| nodes[i].id.to_string()).collect();
            members.sort();
            return Err(GraphError::Cycle { members });
        }

        debug!("Built resource graph with {} nodes", nodes.len());

        Ok(ResourceGraph {
            nodes,
            index,
            dependencies,
            dependents,
        })
    }
}

impl ResourceGraph {
    /// Returns an empty graph (the desired state of a destroy run).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the identity is declared.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Looks up a node by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter()
    }

    /// Returns identities in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.nodes.iter().map(|n| &n.id)
    }

    /// Returns the direct dependencies of a node.
    #[must_use]
    pub fn dependencies(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.dependencies[i].iter().map(|&d| &self.nodes[d].id).collect()
        })
    }

    /// Returns the direct dependents of a node.
    #[must_use]
    pub fn dependents(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.dependents[i].iter().map(|&d| &self.nodes[d].id).collect()
        })
    }

    /// Returns a lazy iterator visiting every node after all of its
    /// dependencies. Ties break by declaration order.
    #[must_use]
    pub fn topological_order(&self) -> TopologicalOrder<'_> {
        TopologicalOrder::new(&self.nodes, &self.dependencies, &self.dependents)
    }
}
