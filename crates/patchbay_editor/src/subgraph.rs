// SPDX-License-Identifier: MIT OR Apache-2.0
//! Expanded-subgraph sessions for group nodes.
//!
//! A collapsed group carries its contents as a serialized blob on the
//! entity. Expanding materializes a live [`GraphModel`] from that blob,
//! with one boundary proxy node per group port and its own history and
//! event bus; collapsing serializes the model back onto the entity.
//! Sessions nest: a group inside an expanded group gets its own child
//! session, and collapse drains them depth-first.

use indexmap::IndexMap;
use thiserror::Error;

use patchbay_graph::registry::PORTS_NAMESPACE;
use patchbay_graph::{
    GraphModel, NodeDeletionError, NodeId, NodeKind, Port, PortDirection, PortError, PortRef,
    SessionData, SessionError, TypeKey,
};

use crate::events::EventBus;
use crate::history::CommandStack;

/// Scene column where input-side boundary proxies are laid out.
const PROXY_INPUT_COLUMN: f32 = -420.0;
/// Scene column where output-side boundary proxies are laid out.
const PROXY_OUTPUT_COLUMN: f32 = 420.0;
/// Vertical spacing between stacked boundary proxies.
const PROXY_ROW_SPACING: f32 = 120.0;

/// Errors raised by subgraph expand/collapse and group-port edits.
#[derive(Debug, Error)]
pub enum SubgraphError {
    /// The group node is missing from the parent graph
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    /// The operation requires a group node
    #[error("node {0} is not a group")]
    NotAGroup(NodeId),
    /// Collapse was called on a group with no live session
    #[error("group {0} is not expanded")]
    NotExpanded(NodeId),
    /// The registry lacks the boundary proxy type
    #[error("boundary proxy type {0} is not registered")]
    MissingProxyType(TypeKey),
    /// Adding a port to the group or its proxy failed
    #[error("cannot add port on node {node}: {source}")]
    Port {
        /// Node the port was added to
        node: NodeId,
        /// Underlying port conflict
        source: PortError,
    },
    /// The stored subgraph contents failed to restore
    #[error("cannot restore subgraph contents: {0}")]
    Session(#[from] SessionError),
    /// A structural removal inside the operation failed
    #[error(transparent)]
    Deletion(#[from] NodeDeletionError),
}

/// One expanded group: a live nested graph with its own undo history,
/// event bus, and child sessions for groups expanded inside it.
pub struct SubgraphSession {
    /// The nested graph being edited
    pub graph: GraphModel,
    /// Undo history scoped to this subgraph
    pub history: CommandStack,
    /// Event bus scoped to this subgraph
    pub events: EventBus,
    /// Sessions of groups expanded inside this one
    pub children: SubgraphManager,
}

impl SubgraphSession {
    fn new(graph: GraphModel) -> Self {
        Self {
            graph,
            history: CommandStack::new(),
            events: EventBus::new(),
            children: SubgraphManager::new(),
        }
    }

    /// Id of the boundary proxy mirroring the group port with the given
    /// direction and name, if it exists.
    pub fn proxy_id(&self, direction: PortDirection, port: &str) -> Option<NodeId> {
        self.graph
            .nodes()
            .find(|node| proxy_matches(&node.kind, direction, port))
            .map(|node| node.id)
    }
}

/// Tracks which group nodes are expanded and owns their sessions.
#[derive(Default)]
pub struct SubgraphManager {
    sessions: IndexMap<NodeId, SubgraphSession>,
}

impl SubgraphManager {
    /// Manager with no expanded groups.
    pub fn new() -> Self {
        Self {
            sessions: IndexMap::new(),
        }
    }

    /// Whether the group currently has a live session.
    pub fn is_expanded(&self, group: NodeId) -> bool {
        self.sessions.contains_key(&group)
    }

    /// Live session of an expanded group.
    pub fn session(&self, group: NodeId) -> Option<&SubgraphSession> {
        self.sessions.get(&group)
    }

    /// Mutable live session of an expanded group.
    pub fn session_mut(&mut self, group: NodeId) -> Option<&mut SubgraphSession> {
        self.sessions.get_mut(&group)
    }

    /// Ids of all expanded groups, in expansion order.
    pub fn expanded_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.sessions.keys().copied()
    }

    /// Expand a group node into a live session.
    ///
    /// Idempotent: an already expanded group returns its existing
    /// session untouched. Otherwise a fresh graph is built against a
    /// copy of the parent's registry, one boundary proxy is materialized
    /// per group port, and the stored blob (if any) is restored into it
    /// with its serialized proxy entries remapped onto the fresh ones by
    /// mirrored port name. Serialized proxies whose group port no longer
    /// exists are dropped.
    pub fn expand(
        &mut self,
        graph: &GraphModel,
        group: NodeId,
    ) -> Result<&mut SubgraphSession, SubgraphError> {
        if self.sessions.contains_key(&group) {
            return Ok(self.sessions.get_mut(&group).expect("checked above"));
        }
        let entity = graph.node(group).ok_or(SubgraphError::UnknownNode(group))?;
        if !entity.kind.is_group() {
            return Err(SubgraphError::NotAGroup(group));
        }

        let mut nested = GraphModel::new(graph.registry().clone());
        nested.acyclic = graph.acyclic;
        nested.pipe_collision = graph.pipe_collision;
        nested.layout = graph.layout;

        let mut input_proxies: IndexMap<String, NodeId> = IndexMap::new();
        let mut output_proxies: IndexMap<String, NodeId> = IndexMap::new();
        for (row, port) in entity.inputs().enumerate() {
            let id = materialize_proxy(&mut nested, PortDirection::In, &port.name, row)?;
            input_proxies.insert(port.name.clone(), id);
        }
        for (row, port) in entity.outputs().enumerate() {
            let id = materialize_proxy(&mut nested, PortDirection::Out, &port.name, row)?;
            output_proxies.insert(port.name.clone(), id);
        }

        if let Some(blob) = &entity.subgraph {
            let mut blob = blob.clone();
            let stored: Vec<(NodeId, NodeKind)> = blob
                .nodes
                .iter()
                .filter(|(_, data)| data.kind.is_proxy())
                .map(|(id, data)| (*id, data.kind.clone()))
                .collect();
            for (id, kind) in stored {
                let live = match &kind {
                    NodeKind::PortInput { port } => input_proxies.get(port),
                    NodeKind::PortOutput { port } => output_proxies.get(port),
                    _ => None,
                };
                match live {
                    Some(live) => blob.remap_node(id, *live),
                    None => blob.strip_node(id),
                }
            }
            blob.restore_into(&mut nested)?;
        }

        self.sessions.insert(group, SubgraphSession::new(nested));
        Ok(self.sessions.get_mut(&group).expect("just inserted"))
    }

    /// Collapse an expanded group: drain its child sessions depth-first,
    /// serialize the nested graph onto the group entity, and discard the
    /// session. Returns the stored blob.
    pub fn collapse(
        &mut self,
        graph: &mut GraphModel,
        group: NodeId,
    ) -> Result<SessionData, SubgraphError> {
        let mut session = self
            .sessions
            .shift_remove(&group)
            .ok_or(SubgraphError::NotExpanded(group))?;
        session.children.collapse_all(&mut session.graph);
        let blob = SessionData::capture(&session.graph);
        let Some(entity) = graph.node_mut(group) else {
            return Err(SubgraphError::UnknownNode(group));
        };
        entity.subgraph = Some(blob.clone());
        Ok(blob)
    }

    /// Collapse every expanded group. Sessions whose group node has
    /// disappeared are dropped.
    pub fn collapse_all(&mut self, graph: &mut GraphModel) {
        let ids: Vec<NodeId> = self.sessions.keys().copied().collect();
        for id in ids {
            let _ = self.collapse(graph, id);
        }
    }

    /// Refresh the stored blob of every expanded group without
    /// collapsing it, depth-first. Saving with groups still open goes
    /// through here so the file carries their current contents.
    pub fn snapshot(&mut self, graph: &mut GraphModel) {
        for (id, session) in self.sessions.iter_mut() {
            session.children.snapshot(&mut session.graph);
            if let Some(entity) = graph.node_mut(*id) {
                entity.subgraph = Some(SessionData::capture(&session.graph));
            }
        }
    }

    /// Drop the live session of a group without writing anything back.
    /// Used when the group node itself is removed from the parent graph.
    pub fn discard(&mut self, group: NodeId) -> bool {
        self.sessions.shift_remove(&group).is_some()
    }

    /// Add a port to a group node, materializing its boundary proxy in
    /// the live session when the group is expanded.
    pub fn add_group_port(
        &mut self,
        graph: &mut GraphModel,
        group: NodeId,
        direction: PortDirection,
        name: &str,
        multi: bool,
    ) -> Result<(), SubgraphError> {
        let entity = graph
            .node_mut(group)
            .ok_or(SubgraphError::UnknownNode(group))?;
        if !entity.kind.is_group() {
            return Err(SubgraphError::NotAGroup(group));
        }
        let row = match direction {
            PortDirection::In => entity.inputs().count(),
            PortDirection::Out => entity.outputs().count(),
        };
        entity
            .add_port(Port::new(direction, name).with_multi_connection(multi))
            .map_err(|source| SubgraphError::Port {
                node: group,
                source,
            })?;
        if let Some(session) = self.sessions.get_mut(&group) {
            materialize_proxy(&mut session.graph, direction, name, row)?;
        }
        Ok(())
    }

    /// Remove a group port through its owning path: the bound proxy is
    /// extracted from the live session (or stripped from the stored
    /// blob), then the port itself is removed, severing its parent-side
    /// connections.
    pub fn remove_group_port(
        &mut self,
        graph: &mut GraphModel,
        port: &PortRef,
    ) -> Result<(), SubgraphError> {
        let entity = graph
            .node(port.node)
            .ok_or(SubgraphError::UnknownNode(port.node))?;
        if !entity.kind.is_group() {
            return Err(SubgraphError::NotAGroup(port.node));
        }
        if graph.port(port).is_none() {
            return Err(SubgraphError::Deletion(NodeDeletionError::UnknownPort(
                port.clone(),
            )));
        }
        if let Some(session) = self.sessions.get_mut(&port.node) {
            if let Some(proxy) = session.proxy_id(port.direction, &port.name) {
                session.graph.extract_node(proxy)?;
                // Commands that captured the extracted proxy must never
                // replay.
                session.history.clear();
            }
        } else if let Some(entity) = graph.node_mut(port.node) {
            if let Some(blob) = &mut entity.subgraph {
                let stored: Vec<NodeId> = blob
                    .nodes
                    .iter()
                    .filter(|(_, data)| proxy_matches(&data.kind, port.direction, &port.name))
                    .map(|(id, _)| *id)
                    .collect();
                for id in stored {
                    blob.strip_node(id);
                }
            }
        }
        graph.remove_port(port)?;
        Ok(())
    }
}

/// Build and insert one boundary proxy. The subgraph-facing port flips
/// direction relative to the group port it mirrors: a group input feeds
/// the subgraph through a multi output, a group output drains it through
/// a single-connection input.
fn materialize_proxy(
    nested: &mut GraphModel,
    direction: PortDirection,
    name: &str,
    row: usize,
) -> Result<NodeId, SubgraphError> {
    let (key, kind, column) = match direction {
        PortDirection::In => (
            TypeKey::new(PORTS_NAMESPACE, "PortInput"),
            NodeKind::PortInput {
                port: name.to_string(),
            },
            PROXY_INPUT_COLUMN,
        ),
        PortDirection::Out => (
            TypeKey::new(PORTS_NAMESPACE, "PortOutput"),
            NodeKind::PortOutput {
                port: name.to_string(),
            },
            PROXY_OUTPUT_COLUMN,
        ),
    };
    let mut proxy = nested
        .registry()
        .create(&key)
        .ok_or(SubgraphError::MissingProxyType(key))?;
    proxy.kind = kind;
    proxy.label = name.to_string();
    proxy.position = [column, row as f32 * PROXY_ROW_SPACING];
    let port = match direction {
        PortDirection::In => Port::new(PortDirection::Out, name).with_multi_connection(true),
        PortDirection::Out => Port::new(PortDirection::In, name).with_multi_connection(false),
    };
    let id = proxy.id;
    proxy
        .add_port(port)
        .map_err(|source| SubgraphError::Port { node: id, source })?;
    Ok(nested.insert_node(proxy))
}

fn proxy_matches(kind: &NodeKind, direction: PortDirection, name: &str) -> bool {
    match (kind, direction) {
        (NodeKind::PortInput { port }, PortDirection::In) => port == name,
        (NodeKind::PortOutput { port }, PortDirection::Out) => port == name,
        _ => false,
    }
}
