// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions and per-port connection adjacency.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::node::NodeId;

/// Direction a port faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Receives connections
    In,
    /// Emits connections
    Out,
}

impl PortDirection {
    /// The facing of the other end of a typical connection.
    pub fn opposite(self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out => Self::In,
        }
    }
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "input"),
            Self::Out => write!(f, "output"),
        }
    }
}

/// Stable address of a port: owning node, direction, port name.
///
/// Names are unique per direction on a node, so the triple is unambiguous
/// even when an input and an output share a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    /// Owning node
    pub node: NodeId,
    /// Port direction
    pub direction: PortDirection,
    /// Port name
    pub name: String,
}

impl PortRef {
    /// Create a port reference.
    pub fn new(node: NodeId, direction: PortDirection, name: impl Into<String>) -> Self {
        Self {
            node,
            direction,
            name: name.into(),
        }
    }

    /// Reference to an input port.
    pub fn input(node: NodeId, name: impl Into<String>) -> Self {
        Self::new(node, PortDirection::In, name)
    }

    /// Reference to an output port.
    pub fn output(node: NodeId, name: impl Into<String>) -> Self {
        Self::new(node, PortDirection::Out, name)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' of node {}", self.direction, self.name, self.node)
    }
}

/// A connection endpoint on a node.
///
/// Adjacency is stored on both endpoints: each port keeps a map from peer
/// node id to the ordered set of peer port names. The two sides mirror
/// each other at all times; only the connection protocol may mutate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Port direction
    pub direction: PortDirection,
    /// Port name, unique per direction on the owning node
    pub name: String,
    /// Whether the port is shown by views
    pub visible: bool,
    /// Whether the port accepts more than one connection
    pub multi_connection: bool,
    /// Locked ports reject new connections and disconnections
    pub locked: bool,
    /// Peer node id -> ordered set of peer port names
    connections: IndexMap<NodeId, IndexSet<String>>,
}

impl Port {
    /// Create a visible, unlocked, single-connection port.
    pub fn new(direction: PortDirection, name: impl Into<String>) -> Self {
        Self {
            direction,
            name: name.into(),
            visible: true,
            multi_connection: false,
            locked: false,
            connections: IndexMap::new(),
        }
    }

    /// Allow or forbid multiple simultaneous connections.
    pub fn with_multi_connection(mut self, multi: bool) -> Self {
        self.multi_connection = multi;
        self
    }

    /// Set initial visibility.
    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Number of live connections on this port.
    pub fn connected_count(&self) -> usize {
        self.connections.values().map(IndexSet::len).sum()
    }

    /// Whether the port has any live connection.
    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Whether this port is connected to the named port on `node`.
    pub fn is_connected_to(&self, node: NodeId, name: &str) -> bool {
        self.connections
            .get(&node)
            .is_some_and(|names| names.contains(name))
    }

    /// Read-only view of the adjacency map.
    pub fn connections(&self) -> &IndexMap<NodeId, IndexSet<String>> {
        &self.connections
    }

    /// All peers as (node id, port name) pairs, in insertion order.
    pub fn peer_list(&self) -> Vec<(NodeId, String)> {
        self.connections
            .iter()
            .flat_map(|(node, names)| names.iter().map(|n| (*node, n.clone())))
            .collect()
    }

    /// Record a peer in the adjacency map. Protocol use only.
    pub(crate) fn attach_peer(&mut self, node: NodeId, name: &str) {
        self.connections
            .entry(node)
            .or_default()
            .insert(name.to_string());
    }

    /// Remove a peer from the adjacency map, dropping empty entries.
    /// Protocol use only.
    pub(crate) fn detach_peer(&mut self, node: NodeId, name: &str) -> bool {
        let Some(names) = self.connections.get_mut(&node) else {
            return false;
        };
        let removed = names.shift_remove(name);
        if names.is_empty() {
            self.connections.shift_remove(&node);
        }
        removed
    }
}
