// SPDX-License-Identifier: MIT OR Apache-2.0
//! Session schema: the serializable snapshot of a graph.
//!
//! A [`SessionData`] captures everything a graph needs to come back:
//! graph-wide flags, the node map keyed by stable id, per-direction
//! connection lists, and one nested session blob per group node. File IO
//! lives with the editor; this module only defines the schema and the
//! capture/restore passes.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::{self, ConnectionDelta, PortError};
use crate::graph::GraphModel;
use crate::node::{LayoutDirection, NodeEntity, NodeId, NodeKind, TypeKey};
use crate::port::{Port, PortDirection, PortRef};
use crate::property::Property;

/// Errors raised while capturing or restoring sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session names a type the graph's registry does not know
    #[error("session references unknown node type: {0}")]
    UnknownType(TypeKey),
    /// A node entry declares ports its kind cannot hold
    #[error("session entry for node {node} is invalid: {source}")]
    InvalidNode {
        /// Offending node id
        node: NodeId,
        /// Underlying port conflict
        source: PortError,
    },
    /// Reading or writing the session file failed
    #[error("session io failed: {0}")]
    Io(#[from] std::io::Error),
    /// The session text is not valid JSON for this schema
    #[error("session parse failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Graph-wide flags stored at the top of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphHeader {
    /// Reject connections that would close a directed cycle
    pub acyclic: bool,
    /// Dropping a node onto a pipe splices the node into it
    pub pipe_collision: bool,
    /// Default port layout direction
    pub layout: LayoutDirection,
}

/// Serialized state of one port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortData {
    /// Whether the port accepts multiple connections
    pub multi_connection: bool,
    /// Whether the port is shown by views
    pub visible: bool,
    /// Whether the port rejects connection changes
    pub locked: bool,
    /// Peer node id -> ordered set of peer port names
    pub connections: IndexMap<NodeId, IndexSet<String>>,
}

impl PortData {
    fn from_port(port: &Port) -> Self {
        Self {
            multi_connection: port.multi_connection,
            visible: port.visible,
            locked: port.locked,
            connections: port.connections().clone(),
        }
    }

    fn build_port(&self, direction: PortDirection, name: &str) -> Port {
        let mut port = Port::new(direction, name)
            .with_multi_connection(self.multi_connection)
            .with_visible(self.visible);
        port.locked = self.locked;
        port
    }
}

/// Serialized state of one node, without its connections applied.
///
/// Connections are stored per port and re-attached in a second pass so
/// that the mirror invariant holds no matter the order entries appear in
/// the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Registered type the node was created from
    pub type_key: TypeKey,
    /// Behavioral role
    pub kind: NodeKind,
    /// Display label
    pub label: String,
    /// Scene position
    pub position: [f32; 2],
    /// Scene size
    pub size: [f32; 2],
    /// Disabled flag
    pub disabled: bool,
    /// Visibility flag
    pub visible: bool,
    /// Port layout orientation
    pub layout: LayoutDirection,
    /// Whether ports may be removed from the node
    #[serde(default)]
    pub port_removal_allowed: bool,
    /// Input ports by name, in declaration order
    pub inputs: IndexMap<String, PortData>,
    /// Output ports by name, in declaration order
    pub outputs: IndexMap<String, PortData>,
    /// Custom properties by name
    pub custom: IndexMap<String, Property>,
}

impl NodeData {
    /// Snapshot an entity. Selection state is transient and not captured.
    pub fn from_entity(node: &NodeEntity) -> Self {
        Self {
            type_key: node.type_key.clone(),
            kind: node.kind.clone(),
            label: node.label.clone(),
            position: node.position,
            size: node.size,
            disabled: node.disabled,
            visible: node.visible,
            layout: node.layout,
            port_removal_allowed: node.port_removal_allowed,
            inputs: node
                .inputs()
                .map(|p| (p.name.clone(), PortData::from_port(p)))
                .collect(),
            outputs: node
                .outputs()
                .map(|p| (p.name.clone(), PortData::from_port(p)))
                .collect(),
            custom: node
                .properties()
                .map(|(name, prop)| (name.to_string(), prop.clone()))
                .collect(),
        }
    }

    /// Rebuild an entity under the given id, ports present but not yet
    /// wired. Fails when the entry declares ports its kind cannot hold.
    pub fn build_entity(&self, id: NodeId) -> Result<NodeEntity, PortError> {
        let mut node = NodeEntity::new(self.type_key.clone(), self.kind.clone(), &self.label);
        node.id = id;
        node.position = self.position;
        node.size = self.size;
        node.disabled = self.disabled;
        node.visible = self.visible;
        node.layout = self.layout;
        node.port_removal_allowed = self.port_removal_allowed;
        for (name, data) in &self.inputs {
            node.add_port(data.build_port(PortDirection::In, name))?;
        }
        for (name, data) in &self.outputs {
            node.add_port(data.build_port(PortDirection::Out, name))?;
        }
        for (name, property) in &self.custom {
            node.declare_property(name, property.clone());
        }
        Ok(node)
    }

    fn rename_peer(&mut self, from: NodeId, to: NodeId) {
        for data in self.inputs.values_mut().chain(self.outputs.values_mut()) {
            if let Some(names) = data.connections.shift_remove(&from) {
                data.connections.entry(to).or_default().extend(names);
            }
        }
    }
}

/// A complete serializable snapshot of one graph, recursive over group
/// nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionData {
    /// Graph-wide flags
    pub graph: GraphHeader,
    /// Node entries keyed by stable node id
    pub nodes: IndexMap<NodeId, NodeData>,
    /// Nested session blobs keyed by group node id
    pub subgraphs: IndexMap<NodeId, SessionData>,
}

impl SessionData {
    /// Snapshot the given graph. Group-node blobs are lifted into the
    /// top-level `subgraphs` map; selection state is not captured.
    pub fn capture(graph: &GraphModel) -> Self {
        let mut nodes = IndexMap::new();
        let mut subgraphs = IndexMap::new();
        for node in graph.nodes() {
            nodes.insert(node.id, NodeData::from_entity(node));
            if let Some(blob) = &node.subgraph {
                subgraphs.insert(node.id, blob.clone());
            }
        }
        Self {
            graph: GraphHeader {
                acyclic: graph.acyclic,
                pipe_collision: graph.pipe_collision,
                layout: graph.layout,
            },
            nodes,
            subgraphs,
        }
    }

    /// Restore this session into a graph.
    ///
    /// Entries whose id is not yet present are rebuilt with their stable
    /// id; entries that already exist (the live boundary proxies during a
    /// subgraph expand) only take over display attributes and keep their
    /// ports. Adjacency is re-attached in a second pass and is
    /// idempotent, so each pair appearing under both endpoints is fine.
    /// Pairs naming a missing endpoint are skipped.
    pub fn restore_into(&self, graph: &mut GraphModel) -> Result<(), SessionError> {
        graph.acyclic = self.graph.acyclic;
        graph.pipe_collision = self.graph.pipe_collision;
        graph.layout = self.graph.layout;

        for (id, data) in &self.nodes {
            if !graph.registry().contains(&data.type_key) {
                return Err(SessionError::UnknownType(data.type_key.clone()));
            }
            if let Some(existing) = graph.node_mut(*id) {
                existing.label = data.label.clone();
                existing.position = data.position;
                existing.size = data.size;
                existing.disabled = data.disabled;
                existing.visible = data.visible;
                existing.layout = data.layout;
            } else {
                let node = data
                    .build_entity(*id)
                    .map_err(|source| SessionError::InvalidNode { node: *id, source })?;
                graph.insert_node(node);
            }
        }

        let mut delta = ConnectionDelta::default();
        for (id, data) in &self.nodes {
            for (name, port, direction) in data
                .inputs
                .iter()
                .map(|(n, p)| (n, p, PortDirection::In))
                .chain(data.outputs.iter().map(|(n, p)| (n, p, PortDirection::Out)))
            {
                let port_ref = PortRef::new(*id, direction, name);
                if graph.port(&port_ref).is_none() {
                    continue;
                }
                for (peer_node, peer_names) in &port.connections {
                    for peer_name in peer_names {
                        let Some(peer) =
                            connection::resolve_peer(graph, &port_ref, *peer_node, peer_name)
                        else {
                            continue;
                        };
                        delta.connected.push((port_ref.clone(), peer));
                    }
                }
            }
        }
        connection::apply(graph, &delta);

        for (id, blob) in &self.subgraphs {
            if let Some(node) = graph.node_mut(*id) {
                node.subgraph = Some(blob.clone());
            }
        }
        Ok(())
    }

    /// Rewrite every reference to a node id: the node entry itself, the
    /// subgraph key, and all adjacency entries pointing at it. Used when
    /// a serialized boundary proxy is replaced by a freshly materialized
    /// one.
    pub fn remap_node(&mut self, from: NodeId, to: NodeId) {
        if let Some(data) = self.nodes.shift_remove(&from) {
            self.nodes.insert(to, data);
        }
        if let Some(blob) = self.subgraphs.shift_remove(&from) {
            self.subgraphs.insert(to, blob);
        }
        for data in self.nodes.values_mut() {
            data.rename_peer(from, to);
        }
    }

    /// Drop a node entry and every adjacency reference to it.
    pub fn strip_node(&mut self, id: NodeId) {
        self.nodes.shift_remove(&id);
        self.subgraphs.shift_remove(&id);
        for data in self.nodes.values_mut() {
            for port in data.inputs.values_mut().chain(data.outputs.values_mut()) {
                port.connections.shift_remove(&id);
            }
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeRegistry, NodeTemplate, PortSpec};

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::builtin();
        registry
            .register(
                NodeTemplate::new("test.nodes", "Pass")
                    .with_input(PortSpec::new("in", false))
                    .with_output(PortSpec::new("out", true))
                    .with_property("gain", Property::number(1.0)),
            )
            .unwrap();
        registry
    }

    fn pass_key() -> TypeKey {
        TypeKey::new("test.nodes", "Pass")
    }

    fn sample_graph() -> GraphModel {
        let mut graph = GraphModel::new(registry());
        graph.pipe_collision = true;
        let a = graph.create_node(&pass_key()).unwrap();
        let b = graph.create_node(&pass_key()).unwrap();
        graph.node_mut(a).unwrap().position = [10.0, 20.0];
        graph.node_mut(b).unwrap().label = "sink".into();
        graph
            .node_mut(b)
            .unwrap()
            .set_property_value("gain", crate::property::PropertyValue::Number(0.5))
            .unwrap();
        let delta = connection::plan_connect(
            &graph,
            &PortRef::output(a, "out"),
            &PortRef::input(b, "in"),
        )
        .unwrap();
        connection::apply(&mut graph, &delta);
        graph
    }

    #[test]
    fn test_capture_restore_round_trip() {
        let graph = sample_graph();
        let session = SessionData::capture(&graph);

        let mut restored = GraphModel::new(registry());
        session.restore_into(&mut restored).unwrap();

        assert_eq!(SessionData::capture(&restored), session);
        assert!(restored.pipe_collision);
        // Adjacency mirrored on both sides after restore.
        let ids: Vec<NodeId> = restored.node_ids().collect();
        let out = PortRef::output(ids[0], "out");
        let inp = PortRef::input(ids[1], "in");
        assert!(restored.port(&out).unwrap().is_connected_to(ids[1], "in"));
        assert!(restored.port(&inp).unwrap().is_connected_to(ids[0], "out"));
    }

    #[test]
    fn test_json_round_trip() {
        let session = SessionData::capture(&sample_graph());
        let text = session.to_json().unwrap();
        let parsed = SessionData::from_json(&text).unwrap();
        assert_eq!(parsed, session);
    }

    #[test]
    fn test_restore_unknown_type_fails() {
        let graph = sample_graph();
        let session = SessionData::capture(&graph);

        let mut bare = GraphModel::new(NodeRegistry::builtin());
        let err = session.restore_into(&mut bare).unwrap_err();
        assert!(matches!(err, SessionError::UnknownType(key) if key == pass_key()));
    }

    #[test]
    fn test_restore_merges_existing_nodes() {
        let graph = sample_graph();
        let session = SessionData::capture(&graph);
        let id = graph.node_ids().next().unwrap();

        // Restoring over a graph that already holds the node keeps its
        // ports and only takes display attributes from the entry.
        let mut target = GraphModel::new(registry());
        let mut live = graph.node(id).unwrap().clone();
        live.position = [999.0, 999.0];
        target.insert_node(live);

        session.restore_into(&mut target).unwrap();
        assert_eq!(target.node(id).unwrap().position, [10.0, 20.0]);
        assert_eq!(target.node_count(), 2);
    }

    #[test]
    fn test_dangling_connection_skipped() {
        let graph = sample_graph();
        let mut session = SessionData::capture(&graph);
        let ids: Vec<NodeId> = session.nodes.keys().copied().collect();
        // Drop the sink node entry but keep the source's adjacency to it.
        session.nodes.shift_remove(&ids[1]);

        let mut restored = GraphModel::new(registry());
        session.restore_into(&mut restored).unwrap();
        assert_eq!(restored.node_count(), 1);
        assert!(!restored.port(&PortRef::output(ids[0], "out")).unwrap().is_connected());
    }

    #[test]
    fn test_remap_node_rewrites_adjacency() {
        let graph = sample_graph();
        let mut session = SessionData::capture(&graph);
        let ids: Vec<NodeId> = session.nodes.keys().copied().collect();
        let fresh = NodeId::new();

        session.remap_node(ids[1], fresh);
        assert!(session.nodes.contains_key(&fresh));
        assert!(!session.nodes.contains_key(&ids[1]));
        let source = &session.nodes[&ids[0]];
        assert!(source.outputs["out"].connections.contains_key(&fresh));
        assert!(!source.outputs["out"].connections.contains_key(&ids[1]));
    }

    #[test]
    fn test_strip_node_drops_references() {
        let graph = sample_graph();
        let mut session = SessionData::capture(&graph);
        let ids: Vec<NodeId> = session.nodes.keys().copied().collect();

        session.strip_node(ids[1]);
        assert_eq!(session.nodes.len(), 1);
        assert!(session.nodes[&ids[0]].outputs["out"].connections.is_empty());
    }

    #[test]
    fn test_group_blob_round_trips() {
        let mut graph = sample_graph();
        let group = graph
            .create_node(&TypeKey::new("patchbay.graph", "Group"))
            .unwrap();
        let nested = SessionData::capture(&sample_graph());
        graph.node_mut(group).unwrap().subgraph = Some(nested.clone());

        let session = SessionData::capture(&graph);
        assert_eq!(session.subgraphs.get(&group), Some(&nested));

        let mut restored = GraphModel::new(registry());
        session.restore_into(&mut restored).unwrap();
        assert_eq!(restored.node(group).unwrap().subgraph, Some(nested));
    }

    #[test]
    fn test_locked_and_multi_flags_survive() {
        let mut graph = sample_graph();
        let id = graph.node_ids().next().unwrap();
        graph.port_mut(&PortRef::output(id, "out")).unwrap().locked = true;

        let session = SessionData::capture(&graph);
        let mut restored = GraphModel::new(registry());
        session.restore_into(&mut restored).unwrap();

        let port = restored.port(&PortRef::output(id, "out")).unwrap();
        assert!(port.locked);
        assert!(port.multi_connection);
    }
}
