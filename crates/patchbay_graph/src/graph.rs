// SPDX-License-Identifier: MIT OR Apache-2.0
//! The graph model: an arena of node entities plus graph-wide flags.
//!
//! The model owns no view state and emits no events; command objects in
//! the editor crate mutate it and report what changed.

use indexmap::{IndexMap, IndexSet};
use std::path::PathBuf;
use thiserror::Error;

use crate::connection;
use crate::node::{LayoutDirection, NodeEntity, NodeId, TypeKey};
use crate::port::{Port, PortRef};
use crate::property::PropertyMeta;
use crate::registry::NodeRegistry;

/// Errors raised while creating nodes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeCreationError {
    /// Type key not present in the graph's registry
    #[error("unknown node type: {0}")]
    UnknownType(TypeKey),
}

/// Errors raised while deleting nodes or ports.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeDeletionError {
    /// Node id not present in the graph
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    /// Boundary proxies live and die with their group port
    #[error("node {0} is a subgraph boundary proxy; remove the group port instead")]
    BoundProxy(NodeId),
    /// Port reference not present in the graph
    #[error("unknown port: {0}")]
    UnknownPort(PortRef),
    /// The node does not allow removing ports
    #[error("node {0} does not allow port removal")]
    PortRemovalForbidden(NodeId),
}

/// An editable node graph: entity arena, injected type registry, and
/// behavior flags.
#[derive(Debug, Clone)]
pub struct GraphModel {
    nodes: IndexMap<NodeId, NodeEntity>,
    registry: NodeRegistry,
    /// Reject connections that would close a directed cycle
    pub acyclic: bool,
    /// Dropping a node onto a pipe splices the node into it
    pub pipe_collision: bool,
    /// Default port layout for nodes in this graph
    pub layout: LayoutDirection,
    /// File the session was loaded from or last saved to
    pub session_path: Option<PathBuf>,
    common_properties: IndexMap<TypeKey, IndexMap<String, PropertyMeta>>,
}

impl GraphModel {
    /// Create an empty graph backed by the given type registry.
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            nodes: IndexMap::new(),
            registry,
            acyclic: true,
            pipe_collision: false,
            layout: LayoutDirection::default(),
            session_path: None,
            common_properties: IndexMap::new(),
        }
    }

    /// The graph's type registry.
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Mutable access to the type registry.
    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    /// Get a node by id
    pub fn node(&self, id: NodeId) -> Option<&NodeEntity> {
        self.nodes.get(&id)
    }

    /// Get a mutable node by id
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeEntity> {
        self.nodes.get_mut(&id)
    }

    /// Whether a node exists
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All nodes, in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeEntity> {
        self.nodes.values()
    }

    /// All node ids, in insertion order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Instantiate a registered type and add it to the graph.
    pub fn create_node(&mut self, key: &TypeKey) -> Result<NodeId, NodeCreationError> {
        let node = self
            .registry
            .create(key)
            .ok_or_else(|| NodeCreationError::UnknownType(key.clone()))?;
        Ok(self.insert_node(node))
    }

    /// Add a prepared entity to the graph, keyed by its own id.
    pub fn insert_node(&mut self, node: NodeEntity) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node, severing its connections first.
    ///
    /// Boundary proxies are refused; they are removed through the owning
    /// group port's removal path.
    pub fn remove_node(&mut self, id: NodeId) -> Result<NodeEntity, NodeDeletionError> {
        let node = self.nodes.get(&id).ok_or(NodeDeletionError::UnknownNode(id))?;
        if node.is_proxy() {
            return Err(NodeDeletionError::BoundProxy(id));
        }
        connection::sever_node(self, id);
        Ok(self.nodes.shift_remove(&id).expect("checked above"))
    }

    /// Remove a node bypassing the proxy guard, severing any remaining
    /// connections first. Command replay and the group-port removal path
    /// go through here after capturing what they sever.
    pub fn extract_node(&mut self, id: NodeId) -> Result<NodeEntity, NodeDeletionError> {
        if !self.nodes.contains_key(&id) {
            return Err(NodeDeletionError::UnknownNode(id));
        }
        connection::sever_node(self, id);
        Ok(self.nodes.shift_remove(&id).expect("checked above"))
    }

    /// Resolve a port reference
    pub fn port(&self, port: &PortRef) -> Option<&Port> {
        self.nodes.get(&port.node)?.port(port.direction, &port.name)
    }

    /// Resolve a port reference mutably
    pub fn port_mut(&mut self, port: &PortRef) -> Option<&mut Port> {
        self.nodes
            .get_mut(&port.node)?
            .port_mut(port.direction, &port.name)
    }

    /// Remove a port from its node, severing its connections first.
    /// Honors the node's `port_removal_allowed` flag.
    pub fn remove_port(&mut self, port: &PortRef) -> Result<Port, NodeDeletionError> {
        let node = self
            .nodes
            .get(&port.node)
            .ok_or(NodeDeletionError::UnknownNode(port.node))?;
        if node.port(port.direction, &port.name).is_none() {
            return Err(NodeDeletionError::UnknownPort(port.clone()));
        }
        if !node.port_removal_allowed {
            return Err(NodeDeletionError::PortRemovalForbidden(port.node));
        }
        connection::sever_port(self, port);
        let node = self.nodes.get_mut(&port.node).expect("checked above");
        Ok(node
            .take_port(port.direction, &port.name)
            .expect("checked above"))
    }

    /// Visible nodes inside a rectangle. With `fully_contained` only
    /// nodes whose whole rect lies inside count; otherwise any overlap
    /// counts.
    pub fn nodes_in_rect(&self, min: [f32; 2], max: [f32; 2], fully_contained: bool) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.visible)
            .filter(|node| {
                let (nmin, nmax) = node.rect();
                if fully_contained {
                    nmin[0] >= min[0] && nmin[1] >= min[1] && nmax[0] <= max[0] && nmax[1] <= max[1]
                } else {
                    nmax[0] >= min[0] && nmin[0] <= max[0] && nmax[1] >= min[1] && nmin[1] <= max[1]
                }
            })
            .map(|node| node.id)
            .collect()
    }

    /// Ids of all selected nodes, in insertion order
    pub fn selected_ids(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.selected)
            .map(|node| node.id)
            .collect()
    }

    /// Make `target` the exact selection. Returns the ids that became
    /// selected and the ids that became deselected.
    pub fn set_selection(&mut self, target: &IndexSet<NodeId>) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut selected = Vec::new();
        let mut deselected = Vec::new();
        for node in self.nodes.values_mut() {
            let wanted = target.contains(&node.id);
            if wanted && !node.selected {
                node.selected = true;
                selected.push(node.id);
            } else if !wanted && node.selected {
                node.selected = false;
                deselected.push(node.id);
            }
        }
        (selected, deselected)
    }

    /// Register display metadata shared by every node of a type.
    pub fn set_common_property(
        &mut self,
        key: &TypeKey,
        name: impl Into<String>,
        meta: PropertyMeta,
    ) {
        self.common_properties
            .entry(key.clone())
            .or_default()
            .insert(name.into(), meta);
    }

    /// Shared display metadata for a type, if any was registered.
    pub fn common_properties(&self, key: &TypeKey) -> Option<&IndexMap<String, PropertyMeta>> {
        self.common_properties.get(key)
    }

    /// Drop all nodes. Flags, registry and common properties survive.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
