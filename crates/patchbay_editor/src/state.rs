// SPDX-License-Identifier: MIT OR Apache-2.0
//! The assembled editor: graph, history, events, interaction and
//! subgraph sessions behind one facade.
//!
//! [`EditorState`] methods are the blessed mutation paths: everything
//! that touches adjacency or node existence goes through the command
//! stack so undo stays exact. Views talk to the state through these
//! methods plus the event bus; direct field access is for reading and
//! for transient bookkeeping only.

use indexmap::{IndexMap, IndexSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

use patchbay_graph::{
    connection, GraphModel, LayoutDirection, NodeCreationError, NodeData, NodeDeletionError,
    NodeEntity, NodeId, NodeRegistry, PortDirection, PortError, PortRef, PropertyValue,
    SessionData, SessionError, TypeKey,
};

use crate::commands::{
    AddNodeCmd, ConnectCmd, DisconnectCmd, LockPortCmd, MoveNodeCmd, PortVisibilityCmd,
    RemoveNodeCmd, SetPropertyCmd,
};
use crate::events::{EventBus, GraphEvent};
use crate::history::{CommandStack, HistoryError};
use crate::hit_test::{HitTest, NullHitTest};
use crate::interaction::{InteractionController, Modifiers, PointerButton};
use crate::subgraph::{SubgraphError, SubgraphManager, SubgraphSession};

/// Scene offset applied to duplicated nodes.
const DUPLICATE_OFFSET: f32 = 20.0;

/// Union of everything an editor operation can fail with.
#[derive(Debug, Error)]
pub enum EditorError {
    /// Node creation failed
    #[error(transparent)]
    Creation(#[from] NodeCreationError),
    /// Node or port removal failed
    #[error(transparent)]
    Deletion(#[from] NodeDeletionError),
    /// Connection validation failed
    #[error(transparent)]
    Connection(#[from] PortError),
    /// History operation failed
    #[error(transparent)]
    History(#[from] HistoryError),
    /// Subgraph operation failed
    #[error(transparent)]
    Subgraph(#[from] SubgraphError),
    /// Session capture, restore or file IO failed
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Root editor state for one open document.
pub struct EditorState {
    /// The live graph
    pub graph: GraphModel,
    /// Undo history for the root graph
    pub history: CommandStack,
    /// Event bus views subscribe to
    pub events: EventBus,
    /// Pointer gesture machine and viewport
    pub interaction: InteractionController,
    /// Live sessions of expanded group nodes
    pub subgraphs: SubgraphManager,
    hit: Box<dyn HitTest>,
    dirty: bool,
}

impl EditorState {
    /// Empty editor over the given type registry, with no hit-testing
    /// surface attached.
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            graph: GraphModel::new(registry),
            history: CommandStack::new(),
            events: EventBus::new(),
            interaction: InteractionController::new(),
            subgraphs: SubgraphManager::new(),
            hit: Box::new(NullHitTest),
            dirty: false,
        }
    }

    /// Attach the hit-testing surface pointer gestures consult.
    pub fn with_hit_test(mut self, hit: impl HitTest + 'static) -> Self {
        self.hit = Box::new(hit);
        self
    }

    /// Whether unsaved changes exist.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ---- nodes ---------------------------------------------------------

    /// Create a node of a registered type at the origin.
    pub fn create_node(&mut self, key: &TypeKey) -> Result<NodeId, EditorError> {
        self.create_node_at(key, [0.0, 0.0])
    }

    /// Create a node of a registered type at a scene position.
    pub fn create_node_at(
        &mut self,
        key: &TypeKey,
        position: [f32; 2],
    ) -> Result<NodeId, EditorError> {
        let mut node = self
            .graph
            .registry()
            .create(key)
            .ok_or_else(|| NodeCreationError::UnknownType(key.clone()))?;
        node.position = position;
        let command = AddNodeCmd::new(node);
        let id = command.node_id();
        self.history.push(&mut self.graph, &self.events, command);
        self.dirty = true;
        tracing::debug!("Created node {id} ({key})");
        Ok(id)
    }

    /// Remove nodes as one undo unit, severed connections included.
    ///
    /// Fails before touching anything if any id is unknown or names a
    /// boundary proxy. Expanded groups among the targets are snapshotted
    /// first so undo restores their current contents.
    pub fn remove_nodes(&mut self, ids: &[NodeId]) -> Result<(), EditorError> {
        let ids: IndexSet<NodeId> = ids.iter().copied().collect();
        for id in &ids {
            let node = self
                .graph
                .node(*id)
                .ok_or(NodeDeletionError::UnknownNode(*id))?;
            if node.is_proxy() {
                return Err(NodeDeletionError::BoundProxy(*id).into());
            }
        }
        if ids.is_empty() {
            return Ok(());
        }
        let label = if ids.len() == 1 {
            "Delete node"
        } else {
            "Delete nodes"
        };
        self.history.begin_macro(label)?;

        self.subgraphs.snapshot(&mut self.graph);
        for id in &ids {
            self.subgraphs.discard(*id);
        }
        let keep: IndexSet<NodeId> = self
            .graph
            .selected_ids()
            .into_iter()
            .filter(|id| !ids.contains(id))
            .collect();
        self.emit_selection(&keep);

        // Capture each removal against the current model: an earlier
        // removal in the unit already severed any pair shared with a
        // later one, so replay never references a missing node.
        for id in &ids {
            let command =
                RemoveNodeCmd::capture(&self.graph, *id).expect("validated above");
            self.history.push(&mut self.graph, &self.events, command);
        }
        self.history.end_macro()?;
        self.dirty = true;
        tracing::debug!("Removed {} node(s)", ids.len());
        Ok(())
    }

    /// Delete the selected nodes, skipping boundary proxies. Returns how
    /// many nodes were removed.
    pub fn delete_selected(&mut self) -> Result<usize, EditorError> {
        let targets: Vec<NodeId> = self
            .graph
            .selected_ids()
            .into_iter()
            .filter(|id| self.graph.node(*id).is_some_and(|n| !n.is_proxy()))
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }
        self.remove_nodes(&targets)?;
        Ok(targets.len())
    }

    /// Duplicate nodes as one undo unit, preserving wiring between the
    /// duplicated nodes. Unknown ids and boundary proxies are skipped.
    /// The clones are selected afterwards; returns their ids.
    pub fn duplicate_nodes(&mut self, ids: &[NodeId]) -> Result<Vec<NodeId>, EditorError> {
        let sources: Vec<NodeId> = ids
            .iter()
            .copied()
            .filter(|id| self.graph.node(*id).is_some_and(|n| !n.is_proxy()))
            .collect();
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        // Groups copy their latest contents, not a stale blob.
        self.subgraphs.snapshot(&mut self.graph);

        let mut mapping: IndexMap<NodeId, NodeId> = IndexMap::new();
        let mut clones: Vec<NodeEntity> = Vec::new();
        for id in &sources {
            let entity = self.graph.node(*id).expect("filtered above");
            let mut data = NodeData::from_entity(entity);
            data.label = format!("{} (Copy)", data.label);
            data.position = [
                data.position[0] + DUPLICATE_OFFSET,
                data.position[1] + DUPLICATE_OFFSET,
            ];
            let clone_id = NodeId::new();
            let mut clone = data
                .build_entity(clone_id)
                .expect("source entity holds valid ports");
            clone.subgraph = entity.subgraph.clone();
            mapping.insert(*id, clone_id);
            clones.push(clone);
        }

        // Wiring between duplicated nodes, walked from the output side so
        // each internal pair appears once.
        let mut pairs: Vec<(PortRef, PortRef)> = Vec::new();
        for id in &sources {
            let entity = self.graph.node(*id).expect("filtered above");
            for port in entity.outputs() {
                let port_ref = PortRef::output(*id, &port.name);
                for peer in connection::peers(&self.graph, &port_ref) {
                    if let Some(peer_clone) = mapping.get(&peer.node) {
                        pairs.push((
                            PortRef::output(mapping[id], &port.name),
                            PortRef::new(*peer_clone, peer.direction, &peer.name),
                        ));
                    }
                }
            }
        }

        self.history.begin_macro("Duplicate nodes")?;
        for clone in clones {
            self.history
                .push(&mut self.graph, &self.events, AddNodeCmd::new(clone));
        }
        for (a, b) in &pairs {
            if let Ok(delta) = connection::plan_connect(&self.graph, a, b) {
                self.history
                    .push(&mut self.graph, &self.events, ConnectCmd::new(delta));
            }
        }
        self.history.end_macro()?;

        let new_ids: Vec<NodeId> = mapping.values().copied().collect();
        let target: IndexSet<NodeId> = new_ids.iter().copied().collect();
        self.emit_selection(&target);
        self.dirty = true;
        tracing::debug!("Duplicated {} node(s)", new_ids.len());
        Ok(new_ids)
    }

    /// Move a node to a new position as an undoable step. Returns false
    /// when the node is unknown or already there.
    pub fn move_node(&mut self, node: NodeId, to: [f32; 2]) -> bool {
        let Some(entity) = self.graph.node(node) else {
            return false;
        };
        let from = entity.position;
        if from == to {
            return false;
        }
        self.history
            .push(&mut self.graph, &self.events, MoveNodeCmd::new(node, from, to));
        self.dirty = true;
        true
    }

    /// Make `ids` the exact selection, emitting the diff. Selection is
    /// transient state and never enters history.
    pub fn set_selection(&mut self, ids: &[NodeId]) {
        let target: IndexSet<NodeId> = ids.iter().copied().collect();
        self.emit_selection(&target);
    }

    fn emit_selection(&mut self, target: &IndexSet<NodeId>) {
        let (selected, deselected) = self.graph.set_selection(target);
        if !selected.is_empty() || !deselected.is_empty() {
            self.events.emit(&GraphEvent::SelectionChanged {
                selected,
                deselected,
            });
        }
    }

    // ---- connections and ports ----------------------------------------

    /// Connect two ports, evicting existing peers on single-connection
    /// endpoints as part of the same undo unit.
    pub fn connect(&mut self, a: &PortRef, b: &PortRef) -> Result<(), EditorError> {
        let delta = connection::plan_connect(&self.graph, a, b)?;
        self.history
            .push(&mut self.graph, &self.events, ConnectCmd::new(delta));
        self.dirty = true;
        Ok(())
    }

    /// Disconnect two ports. Severing a pair that is not connected is a
    /// no-op and pushes nothing.
    pub fn disconnect(&mut self, a: &PortRef, b: &PortRef) -> Result<(), EditorError> {
        let delta = connection::plan_disconnect(&self.graph, a, b)?;
        if delta.is_empty() {
            return Ok(());
        }
        self.history
            .push(&mut self.graph, &self.events, DisconnectCmd::new(delta));
        self.dirty = true;
        Ok(())
    }

    /// Sever every connection on a port as one undo unit.
    pub fn clear_connections(&mut self, port: &PortRef) -> Result<(), EditorError> {
        let delta = connection::plan_clear(&self.graph, port)?;
        if delta.is_empty() {
            return Ok(());
        }
        self.history
            .push(&mut self.graph, &self.events, DisconnectCmd::new(delta));
        self.dirty = true;
        Ok(())
    }

    /// Change a reserved or custom property. Returns true when a command
    /// was pushed; unknown names, kind mismatches and no-op writes push
    /// nothing.
    pub fn set_property(&mut self, node: NodeId, name: &str, value: PropertyValue) -> bool {
        let Some(command) = SetPropertyCmd::capture(&self.graph, node, name, value) else {
            return false;
        };
        if command.is_noop() {
            return false;
        }
        self.history.push(&mut self.graph, &self.events, command);
        self.dirty = true;
        true
    }

    /// Lock or unlock a port, optionally cascading to its direct peers.
    /// Returns true when a command was pushed.
    pub fn set_port_locked(&mut self, port: &PortRef, locked: bool, cascade: bool) -> bool {
        let command = LockPortCmd::capture(&self.graph, port, locked, cascade);
        if command.is_noop() {
            return false;
        }
        self.history.push(&mut self.graph, &self.events, command);
        self.dirty = true;
        true
    }

    /// Show or hide a port. Returns true when a command was pushed.
    pub fn set_port_visible(&mut self, port: &PortRef, visible: bool) -> bool {
        let Some(command) = PortVisibilityCmd::capture(&self.graph, port, visible) else {
            return false;
        };
        if command.is_noop() {
            return false;
        }
        self.history.push(&mut self.graph, &self.events, command);
        self.dirty = true;
        true
    }

    // ---- history --------------------------------------------------------

    /// Undo the most recent unit. Returns its label.
    pub fn undo(&mut self) -> Result<String, EditorError> {
        let label = self.history.undo(&mut self.graph, &self.events)?;
        self.dirty = true;
        tracing::debug!("Undo: {label}");
        Ok(label)
    }

    /// Redo the most recently undone unit. Returns its label.
    pub fn redo(&mut self) -> Result<String, EditorError> {
        let label = self.history.redo(&mut self.graph, &self.events)?;
        self.dirty = true;
        tracing::debug!("Redo: {label}");
        Ok(label)
    }

    // ---- pointer input --------------------------------------------------

    /// Route a pointer press to the interaction controller.
    pub fn pointer_down(&mut self, pos: [f32; 2], button: PointerButton, mods: Modifiers) {
        self.interaction.pointer_down(
            &mut self.graph,
            &self.events,
            self.hit.as_ref(),
            pos,
            button,
            mods,
        );
    }

    /// Route pointer travel to the interaction controller.
    pub fn pointer_move(&mut self, pos: [f32; 2]) {
        self.interaction.pointer_move(&mut self.graph, pos);
    }

    /// Route a pointer release to the interaction controller; committed
    /// gestures mark the session dirty.
    pub fn pointer_up(&mut self, pos: [f32; 2], mods: Modifiers) {
        let before = self.history.undo_depth();
        self.interaction.pointer_up(
            &mut self.graph,
            &mut self.history,
            &self.events,
            self.hit.as_ref(),
            pos,
            mods,
        );
        if self.history.undo_depth() != before {
            self.dirty = true;
        }
    }

    /// Zoom the viewport around a scene position.
    pub fn wheel(&mut self, notches: f32, pos: [f32; 2]) {
        self.interaction.wheel(notches, pos);
    }

    /// Abort the active gesture, rolling back any previewed changes.
    pub fn cancel_gesture(&mut self) {
        self.interaction.cancel(&mut self.graph);
    }

    // ---- subgraphs --------------------------------------------------------

    /// Expand a group node into a live session.
    pub fn expand_group(&mut self, group: NodeId) -> Result<&mut SubgraphSession, EditorError> {
        Ok(self.subgraphs.expand(&self.graph, group)?)
    }

    /// Collapse an expanded group back onto its node.
    pub fn collapse_group(&mut self, group: NodeId) -> Result<(), EditorError> {
        self.subgraphs.collapse(&mut self.graph, group)?;
        self.dirty = true;
        Ok(())
    }

    /// Live session of an expanded group.
    pub fn group_session(&mut self, group: NodeId) -> Option<&mut SubgraphSession> {
        self.subgraphs.session_mut(group)
    }

    /// Add a port to a group node, materializing its boundary proxy when
    /// the group is expanded. Not undoable.
    pub fn add_group_port(
        &mut self,
        group: NodeId,
        direction: PortDirection,
        name: &str,
        multi: bool,
    ) -> Result<(), EditorError> {
        self.subgraphs
            .add_group_port(&mut self.graph, group, direction, name, multi)?;
        self.dirty = true;
        Ok(())
    }

    /// Remove a group port through its owning path. Not undoable; the
    /// history is cleared because stored commands may reference pairs on
    /// the removed port.
    pub fn remove_group_port(&mut self, port: &PortRef) -> Result<(), EditorError> {
        self.subgraphs.remove_group_port(&mut self.graph, port)?;
        self.history.clear();
        self.dirty = true;
        Ok(())
    }

    // ---- sessions -------------------------------------------------------

    /// Write the session to a file as pretty JSON, refreshing the blobs
    /// of any groups still expanded.
    pub fn save_session(&mut self, path: impl AsRef<Path>) -> Result<(), EditorError> {
        let path = path.as_ref();
        self.subgraphs.snapshot(&mut self.graph);
        let data = SessionData::capture(&self.graph);
        let text = data.to_json()?;
        fs::write(path, text).map_err(SessionError::Io)?;
        self.graph.session_path = Some(path.to_path_buf());
        self.dirty = false;
        tracing::info!("Saved session: {} node(s) to {:?}", data.nodes.len(), path);
        Ok(())
    }

    /// Replace the current document with a session file.
    ///
    /// The file is restored against a scratch model first, so a file
    /// that fails to parse or references unknown types leaves the
    /// current session untouched.
    pub fn load_session(&mut self, path: impl AsRef<Path>) -> Result<(), EditorError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(SessionError::Io)?;
        let data = SessionData::from_json(&text)?;
        let mut scratch = GraphModel::new(self.graph.registry().clone());
        data.restore_into(&mut scratch)?;

        self.interaction.cancel(&mut self.graph);
        self.graph.clear();
        self.subgraphs = SubgraphManager::new();
        self.history.clear();
        data.restore_into(&mut self.graph)?;
        self.graph.session_path = Some(path.to_path_buf());
        self.dirty = false;
        tracing::info!(
            "Loaded session: {} node(s) from {:?}",
            self.graph.node_count(),
            path
        );
        Ok(())
    }

    /// Discard the current document and start empty. Behavior flags
    /// return to their defaults, the same way a loaded file replaces
    /// them from its header.
    pub fn new_session(&mut self) {
        self.interaction.cancel(&mut self.graph);
        self.graph.clear();
        self.graph.acyclic = true;
        self.graph.pipe_collision = false;
        self.graph.layout = LayoutDirection::default();
        self.graph.session_path = None;
        self.subgraphs = SubgraphManager::new();
        self.history.clear();
        self.dirty = false;
        tracing::info!("New session");
    }
}
