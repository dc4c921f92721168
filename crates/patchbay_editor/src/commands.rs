// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undoable command objects.
//!
//! Every history-worthy mutation is a [`GraphCommand`]: `apply` performs
//! it, `revert` undoes it exactly. Each command captures the prior state
//! it needs at construction time (old value, old position, severed
//! pairs), so a revert never reads the live model to guess. Commands emit
//! events from both directions, which keeps views in sync during undo and
//! redo replay.

use indexmap::IndexMap;

use patchbay_graph::node::RESERVED_PROPERTIES;
use patchbay_graph::{
    connection, ConnectionDelta, GraphModel, NodeDeletionError, NodeEntity, NodeId, PortRef,
    PropertyValue,
};

use crate::events::{EventBus, GraphEvent};

/// An undoable unit of work against the graph model.
///
/// Replay discipline: `apply` and `revert` run only against the exact
/// model state they were planned for (history guarantees the order).
/// A command that finds its captured state stale panics; that is a core
/// invariant violation, not a user-correctable condition.
pub trait GraphCommand {
    /// Human-readable label for undo/redo menus and logs.
    fn label(&self) -> &str;

    /// Perform the mutation and emit what changed.
    fn apply(&self, graph: &mut GraphModel, events: &EventBus);

    /// Undo the mutation exactly and emit what changed.
    fn revert(&self, graph: &mut GraphModel, events: &EventBus);
}

/// Attach a pair of ports, carrying any single-connection evictions.
pub struct ConnectCmd {
    delta: ConnectionDelta,
}

impl ConnectCmd {
    /// Wrap a delta produced by `connection::plan_connect`.
    pub fn new(delta: ConnectionDelta) -> Self {
        Self { delta }
    }
}

impl GraphCommand for ConnectCmd {
    fn label(&self) -> &str {
        "Connect"
    }

    fn apply(&self, graph: &mut GraphModel, events: &EventBus) {
        connection::apply(graph, &self.delta);
        events.emit(&GraphEvent::ConnectionsChanged {
            disconnected: self.delta.disconnected.clone(),
            connected: self.delta.connected.clone(),
        });
    }

    fn revert(&self, graph: &mut GraphModel, events: &EventBus) {
        connection::revert(graph, &self.delta);
        events.emit(&GraphEvent::ConnectionsChanged {
            disconnected: self.delta.connected.clone(),
            connected: self.delta.disconnected.clone(),
        });
    }
}

/// Sever one or more connected pairs.
pub struct DisconnectCmd {
    delta: ConnectionDelta,
}

impl DisconnectCmd {
    /// Wrap a delta produced by `plan_disconnect` or `plan_clear`.
    pub fn new(delta: ConnectionDelta) -> Self {
        Self { delta }
    }
}

impl GraphCommand for DisconnectCmd {
    fn label(&self) -> &str {
        "Disconnect"
    }

    fn apply(&self, graph: &mut GraphModel, events: &EventBus) {
        connection::apply(graph, &self.delta);
        events.emit(&GraphEvent::ConnectionsChanged {
            disconnected: self.delta.disconnected.clone(),
            connected: self.delta.connected.clone(),
        });
    }

    fn revert(&self, graph: &mut GraphModel, events: &EventBus) {
        connection::revert(graph, &self.delta);
        events.emit(&GraphEvent::ConnectionsChanged {
            disconnected: self.delta.connected.clone(),
            connected: self.delta.disconnected.clone(),
        });
    }
}

/// Insert a prepared node entity into the graph.
pub struct AddNodeCmd {
    node: NodeEntity,
}

impl AddNodeCmd {
    /// Take the entity to insert. Its id is kept across undo/redo.
    pub fn new(node: NodeEntity) -> Self {
        Self { node }
    }

    /// Id of the node this command inserts.
    pub fn node_id(&self) -> NodeId {
        self.node.id
    }
}

impl GraphCommand for AddNodeCmd {
    fn label(&self) -> &str {
        "Add node"
    }

    fn apply(&self, graph: &mut GraphModel, _events: &EventBus) {
        if graph.contains(self.node.id) {
            panic!("stale command: node {} already present", self.node.id);
        }
        graph.insert_node(self.node.clone());
    }

    fn revert(&self, graph: &mut GraphModel, _events: &EventBus) {
        if graph.extract_node(self.node.id).is_err() {
            panic!("stale command: node {} vanished before revert", self.node.id);
        }
    }
}

/// Remove a node, severing its connections first.
pub struct RemoveNodeCmd {
    node: NodeEntity,
    severed: ConnectionDelta,
}

impl RemoveNodeCmd {
    /// Capture the node's full state and the pairs removal will sever.
    /// Refuses boundary proxies; those go through the group port's own
    /// removal path.
    pub fn capture(graph: &GraphModel, id: NodeId) -> Result<Self, NodeDeletionError> {
        let node = graph.node(id).ok_or(NodeDeletionError::UnknownNode(id))?;
        if node.is_proxy() {
            return Err(NodeDeletionError::BoundProxy(id));
        }
        Ok(Self {
            node: node.clone(),
            severed: ConnectionDelta {
                disconnected: connection::incident_pairs(graph, id),
                connected: Vec::new(),
            },
        })
    }
}

impl GraphCommand for RemoveNodeCmd {
    fn label(&self) -> &str {
        "Remove node"
    }

    fn apply(&self, graph: &mut GraphModel, events: &EventBus) {
        connection::apply(graph, &self.severed);
        if graph.extract_node(self.node.id).is_err() {
            panic!("stale command: node {} already removed", self.node.id);
        }
        if !self.severed.is_empty() {
            events.emit(&GraphEvent::ConnectionsChanged {
                disconnected: self.severed.disconnected.clone(),
                connected: Vec::new(),
            });
        }
    }

    fn revert(&self, graph: &mut GraphModel, events: &EventBus) {
        // The snapshot's own ports still list their peers; re-attachment
        // is idempotent on that side and restores the peers' side.
        graph.insert_node(self.node.clone());
        connection::revert(graph, &self.severed);
        if !self.severed.is_empty() {
            events.emit(&GraphEvent::ConnectionsChanged {
                disconnected: Vec::new(),
                connected: self.severed.disconnected.clone(),
            });
        }
    }
}

/// Move one node between two positions.
pub struct MoveNodeCmd {
    node: NodeId,
    from: [f32; 2],
    to: [f32; 2],
}

impl MoveNodeCmd {
    /// Record a move from `from` to `to`.
    pub fn new(node: NodeId, from: [f32; 2], to: [f32; 2]) -> Self {
        Self { node, from, to }
    }
}

impl GraphCommand for MoveNodeCmd {
    fn label(&self) -> &str {
        "Move node"
    }

    fn apply(&self, graph: &mut GraphModel, events: &EventBus) {
        let Some(node) = graph.node_mut(self.node) else {
            panic!("stale command: node {} no longer exists", self.node);
        };
        node.position = self.to;
        events.emit(&GraphEvent::NodesMoved {
            previous: IndexMap::from([(self.node, self.from)]),
        });
    }

    fn revert(&self, graph: &mut GraphModel, events: &EventBus) {
        let Some(node) = graph.node_mut(self.node) else {
            panic!("stale command: node {} no longer exists", self.node);
        };
        node.position = self.from;
        events.emit(&GraphEvent::NodesMoved {
            previous: IndexMap::from([(self.node, self.to)]),
        });
    }
}

/// Resize a node, capturing position and size on both sides since sizer
/// handles may shift the anchor corner.
pub struct ResizeNodeCmd {
    node: NodeId,
    from: ([f32; 2], [f32; 2]),
    to: ([f32; 2], [f32; 2]),
}

impl ResizeNodeCmd {
    /// Record a resize between two (position, size) pairs.
    pub fn new(node: NodeId, from: ([f32; 2], [f32; 2]), to: ([f32; 2], [f32; 2])) -> Self {
        Self { node, from, to }
    }
}

impl GraphCommand for ResizeNodeCmd {
    fn label(&self) -> &str {
        "Resize node"
    }

    fn apply(&self, graph: &mut GraphModel, _events: &EventBus) {
        let Some(node) = graph.node_mut(self.node) else {
            panic!("stale command: node {} no longer exists", self.node);
        };
        node.position = self.to.0;
        node.size = self.to.1;
    }

    fn revert(&self, graph: &mut GraphModel, _events: &EventBus) {
        let Some(node) = graph.node_mut(self.node) else {
            panic!("stale command: node {} no longer exists", self.node);
        };
        node.position = self.from.0;
        node.size = self.from.1;
    }
}

/// Change one reserved or custom property.
pub struct SetPropertyCmd {
    node: NodeId,
    name: String,
    old: PropertyValue,
    new: PropertyValue,
}

impl SetPropertyCmd {
    /// Capture the current value as the revert target. Returns `None`
    /// when the node or property is unknown, or the value kind does not
    /// fit a reserved field.
    pub fn capture(
        graph: &GraphModel,
        node: NodeId,
        name: impl Into<String>,
        new: PropertyValue,
    ) -> Option<Self> {
        let name = name.into();
        let entity = graph.node(node)?;
        let old = entity.property_value(&name)?;
        // Reserved fields are typed; a kind mismatch would be rejected at
        // apply time, so refuse it here where the caller can still react.
        if RESERVED_PROPERTIES.contains(&name.as_str())
            && std::mem::discriminant(&old) != std::mem::discriminant(&new)
        {
            return None;
        }
        Some(Self {
            node,
            name,
            old,
            new,
        })
    }

    /// Whether the change is a no-op.
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

impl GraphCommand for SetPropertyCmd {
    fn label(&self) -> &str {
        "Set property"
    }

    fn apply(&self, graph: &mut GraphModel, events: &EventBus) {
        let Some(node) = graph.node_mut(self.node) else {
            panic!("stale command: node {} no longer exists", self.node);
        };
        if node.set_property_value(&self.name, self.new.clone()).is_none() {
            panic!(
                "stale command: property '{}' rejected on node {}",
                self.name, self.node
            );
        }
        events.emit(&GraphEvent::PropertyChanged {
            node: self.node,
            name: self.name.clone(),
            old: self.old.clone(),
            new: self.new.clone(),
        });
    }

    fn revert(&self, graph: &mut GraphModel, events: &EventBus) {
        let Some(node) = graph.node_mut(self.node) else {
            panic!("stale command: node {} no longer exists", self.node);
        };
        if node.set_property_value(&self.name, self.old.clone()).is_none() {
            panic!(
                "stale command: property '{}' rejected on node {}",
                self.name, self.node
            );
        }
        events.emit(&GraphEvent::PropertyChanged {
            node: self.node,
            name: self.name.clone(),
            old: self.new.clone(),
            new: self.old.clone(),
        });
    }
}

/// Set the lock flag on a port, optionally cascading to its direct peers.
pub struct LockPortCmd {
    state: bool,
    targets: Vec<(PortRef, bool)>,
}

impl LockPortCmd {
    /// Capture the prior lock flag of every affected port. With
    /// `cascade`, direct peers are included (one level, non-recursive).
    pub fn capture(graph: &GraphModel, port: &PortRef, state: bool, cascade: bool) -> Self {
        Self {
            state,
            targets: connection::lock_targets(graph, port, cascade),
        }
    }

    /// Whether every target already holds the requested state.
    pub fn is_noop(&self) -> bool {
        self.targets.iter().all(|(_, prior)| *prior == self.state)
    }
}

impl GraphCommand for LockPortCmd {
    fn label(&self) -> &str {
        if self.state {
            "Lock port"
        } else {
            "Unlock port"
        }
    }

    fn apply(&self, graph: &mut GraphModel, _events: &EventBus) {
        connection::set_lock_state(graph, &self.targets, self.state);
    }

    fn revert(&self, graph: &mut GraphModel, _events: &EventBus) {
        connection::restore_lock_state(graph, &self.targets);
    }
}

/// Show or hide a port.
pub struct PortVisibilityCmd {
    port: PortRef,
    old: bool,
    new: bool,
}

impl PortVisibilityCmd {
    /// Capture the current visibility as the revert target. Returns
    /// `None` when the port is unknown.
    pub fn capture(graph: &GraphModel, port: &PortRef, visible: bool) -> Option<Self> {
        let old = graph.port(port)?.visible;
        Some(Self {
            port: port.clone(),
            old,
            new: visible,
        })
    }

    /// Whether the change is a no-op.
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

impl GraphCommand for PortVisibilityCmd {
    fn label(&self) -> &str {
        if self.new {
            "Show port"
        } else {
            "Hide port"
        }
    }

    fn apply(&self, graph: &mut GraphModel, _events: &EventBus) {
        let Some(port) = graph.port_mut(&self.port) else {
            panic!("stale command: port {} no longer exists", self.port);
        };
        port.visible = self.new;
    }

    fn revert(&self, graph: &mut GraphModel, _events: &EventBus) {
        let Some(port) = graph.port_mut(&self.port) else {
            panic!("stale command: port {} no longer exists", self.port);
        };
        port.visible = self.old;
    }
}
