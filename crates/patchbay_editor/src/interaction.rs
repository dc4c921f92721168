// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pointer-driven interaction state machine.
//!
//! The controller consumes pointer events in scene coordinates (the view
//! converts from pixels), classifies gestures against the hit-testing
//! surface, and drives the connection protocol and command stack. Every
//! committed mutation goes through history; a gesture that fails
//! validation or is cancelled leaves the model untouched.
//!
//! Gesture map, checked in order on pointer-down:
//! - `Alt+Shift` + left  -> slice connections along the dragged path
//! - `Alt` + right       -> zoom drag around the press point
//! - middle, or `Alt`    -> pan
//! - on a port           -> drag a connection (locked ports fall through
//!   to node selection)
//! - on a backdrop sizer -> resize the backdrop
//! - on a node           -> select per modifiers, then move the selection
//! - otherwise           -> box select

use indexmap::{IndexMap, IndexSet};
use std::mem;

use patchbay_graph::{
    connection, ConnectionDelta, GraphModel, NodeId, PortRef,
};

use crate::commands::{ConnectCmd, DisconnectCmd, MoveNodeCmd, ResizeNodeCmd};
use crate::events::{EventBus, GraphEvent};
use crate::hit_test::{HitTest, SceneItem, SceneItemKind};
use crate::history::CommandStack;

/// Pointer travel below this is a click, not a drag.
pub const DRAG_THRESHOLD: f32 = 4.0;
/// Minimum spacing between recorded slice-path samples.
const SLICE_SAMPLE_SPACING: f32 = 8.0;
/// Probe extent used when testing slice samples against pipes.
const SLICE_PROBE: f32 = 4.0;
/// Probe extent used to resolve what sits under a pointer-down.
const HIT_PROBE: f32 = 4.0;
/// Smallest size a backdrop can be dragged to.
const MIN_BACKDROP_SIZE: [f32; 2] = [80.0, 60.0];
/// Zoom factor bounds.
pub const MIN_ZOOM: f32 = 0.1;
/// Upper zoom factor bound.
pub const MAX_ZOOM: f32 = 4.0;
/// Zoom factor change per wheel notch.
const WHEEL_ZOOM_STEP: f32 = 0.1;
/// Zoom factor change per scene unit of vertical zoom-drag travel.
const ZOOM_DRAG_RATE: f32 = 0.01;

/// Modifier keys held during a pointer event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Shift key
    pub shift: bool,
    /// Control key
    pub ctrl: bool,
    /// Alt key
    pub alt: bool,
}

/// Pointer button of a press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    /// Primary button
    Left,
    /// Middle button or wheel press
    Middle,
    /// Secondary button
    Right,
}

/// How a selection gesture combines with the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Replace the selection
    Replace,
    /// Add to the selection
    Add,
    /// Remove from the selection
    Remove,
}

impl SelectMode {
    /// Resolve the mode from held modifiers: `Ctrl` removes, `Shift`
    /// adds, plain replaces.
    pub fn from_modifiers(mods: Modifiers) -> Self {
        if mods.ctrl {
            Self::Remove
        } else if mods.shift {
            Self::Add
        } else {
            Self::Replace
        }
    }
}

/// Pan/zoom bookkeeping for the canvas.
///
/// Mapping: `scene = screen / zoom + pan`. The controller only ever
/// speaks scene coordinates; views use the helpers to convert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Scene-space translation
    pub pan: [f32; 2],
    /// Zoom factor, clamped to [`MIN_ZOOM`]..[`MAX_ZOOM`]
    pub zoom: f32,
}

impl Viewport {
    /// Identity viewport.
    pub fn new() -> Self {
        Self {
            pan: [0.0, 0.0],
            zoom: 1.0,
        }
    }

    /// Convert a screen position to scene coordinates.
    pub fn screen_to_scene(&self, screen: [f32; 2]) -> [f32; 2] {
        [
            screen[0] / self.zoom + self.pan[0],
            screen[1] / self.zoom + self.pan[1],
        ]
    }

    /// Convert a scene position to screen coordinates.
    pub fn scene_to_screen(&self, scene: [f32; 2]) -> [f32; 2] {
        [
            (scene[0] - self.pan[0]) * self.zoom,
            (scene[1] - self.pan[1]) * self.zoom,
        ]
    }

    /// Scale the zoom by `factor`, keeping `anchor` (scene) under the
    /// same screen position. The result is clamped.
    pub fn zoom_by(&mut self, factor: f32, anchor: [f32; 2]) {
        let old = self.zoom;
        let new = (old * factor.max(0.01)).clamp(MIN_ZOOM, MAX_ZOOM);
        if (new - old).abs() <= f32::EPSILON {
            return;
        }
        for axis in 0..2 {
            self.pan[axis] = anchor[axis] - (anchor[axis] - self.pan[axis]) * old / new;
        }
        self.zoom = new;
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive gesture states of the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionState {
    /// No gesture in progress
    Idle,
    /// Dragging the canvas
    Panning {
        /// Scene point grabbed at pointer-down
        grab: [f32; 2],
    },
    /// Zoom drag around a fixed anchor
    Zooming {
        /// Scene point zoomed around
        anchor: [f32; 2],
        /// Vertical position of the previous event
        last_y: f32,
    },
    /// Rubber-band selection
    BoxSelecting {
        /// Pointer-down corner
        origin: [f32; 2],
        /// Current opposite corner
        current: [f32; 2],
    },
    /// Dragging a transient connection end
    DraggingConnection {
        /// Fixed endpoint of the transient pipe
        source: PortRef,
        /// Port provisionally freed by grabbing its existing pipe
        detached: Option<PortRef>,
        /// Pointer-down position
        origin: [f32; 2],
        /// Current pointer position
        current: [f32; 2],
    },
    /// Dragging a path that severs the pipes it crosses
    SlicingConnections {
        /// Sampled path points
        path: Vec<[f32; 2]>,
    },
    /// Dragging the selected nodes
    MovingSelection {
        /// Node the gesture started on
        pressed: NodeId,
        /// Pointer-down position
        origin: [f32; 2],
        /// Positions of the selection at pointer-down
        start_positions: IndexMap<NodeId, [f32; 2]>,
        /// Whether travel exceeded the click threshold
        moved: bool,
    },
    /// Dragging a backdrop's resize handle
    ResizingBackdrop {
        /// Backdrop being resized
        node: NodeId,
        /// Position at pointer-down
        start_position: [f32; 2],
        /// Size at pointer-down
        start_size: [f32; 2],
        /// Pointer-down position
        origin: [f32; 2],
    },
}

/// Turns raw pointer input into selection, movement, connection and
/// viewport operations.
#[derive(Debug)]
pub struct InteractionController {
    state: InteractionState,
    /// Canvas pan/zoom state
    pub viewport: Viewport,
}

impl InteractionController {
    /// Controller at rest with an identity viewport.
    pub fn new() -> Self {
        Self {
            state: InteractionState::Idle,
            viewport: Viewport::new(),
        }
    }

    /// Current gesture state.
    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    /// Classify a pointer press. Selection changes triggered by node
    /// presses are applied immediately; everything else waits for the
    /// release.
    pub fn pointer_down(
        &mut self,
        graph: &mut GraphModel,
        events: &EventBus,
        hit: &dyn HitTest,
        pos: [f32; 2],
        button: PointerButton,
        mods: Modifiers,
    ) {
        if !matches!(self.state, InteractionState::Idle) {
            return;
        }
        if mods.alt && mods.shift && button == PointerButton::Left {
            self.state = InteractionState::SlicingConnections { path: vec![pos] };
            return;
        }
        if mods.alt && button == PointerButton::Right {
            self.state = InteractionState::Zooming {
                anchor: pos,
                last_y: pos[1],
            };
            return;
        }
        if button == PointerButton::Middle || (mods.alt && button == PointerButton::Left) {
            self.state = InteractionState::Panning { grab: pos };
            return;
        }
        if button != PointerButton::Left {
            return;
        }

        if let Some(port_ref) = hit.port_at(pos) {
            if let Some(port) = graph.port(&port_ref) {
                if port.locked {
                    // Locked ports do not start drags; the press selects
                    // the owning node instead.
                    self.press_node(graph, events, port_ref.node, pos, mods);
                    return;
                }
                let detached = if !port.multi_connection && port.is_connected() {
                    connection::peers(graph, &port_ref).into_iter().next()
                } else {
                    None
                };
                self.state = match detached {
                    // Grabbing an occupied single-connection port picks up
                    // the existing pipe: the far peer stays fixed and the
                    // grabbed port is provisionally freed.
                    Some(peer) => InteractionState::DraggingConnection {
                        source: peer,
                        detached: Some(port_ref),
                        origin: pos,
                        current: pos,
                    },
                    None => InteractionState::DraggingConnection {
                        source: port_ref,
                        detached: None,
                        origin: pos,
                        current: pos,
                    },
                };
                return;
            }
        }

        for item in hit.items_near(pos, None, HIT_PROBE, HIT_PROBE) {
            match item {
                SceneItem::BackdropSizer(id) => {
                    if let Some(node) = graph.node(id) {
                        self.state = InteractionState::ResizingBackdrop {
                            node: id,
                            start_position: node.position,
                            start_size: node.size,
                            origin: pos,
                        };
                        return;
                    }
                }
                SceneItem::Node(id) => {
                    self.press_node(graph, events, id, pos, mods);
                    return;
                }
                // Pipes and ports in the item list do not start gestures
                // here; ports are resolved through port_at above.
                SceneItem::Pipe { .. } | SceneItem::Port(_) => {}
            }
        }

        self.state = InteractionState::BoxSelecting {
            origin: pos,
            current: pos,
        };
    }

    fn press_node(
        &mut self,
        graph: &mut GraphModel,
        events: &EventBus,
        id: NodeId,
        pos: [f32; 2],
        mods: Modifiers,
    ) {
        if !graph.contains(id) {
            return;
        }
        let mode = SelectMode::from_modifiers(mods);
        let current: IndexSet<NodeId> = graph.selected_ids().into_iter().collect();
        let target: IndexSet<NodeId> = match mode {
            // A plain press on an already selected node keeps the group
            // so it can be dragged; the release collapses it if the
            // pointer never moved.
            SelectMode::Replace if !current.contains(&id) => [id].into_iter().collect(),
            SelectMode::Replace => current,
            SelectMode::Add => {
                let mut target = current;
                target.insert(id);
                target
            }
            SelectMode::Remove => {
                let mut target = current;
                target.shift_remove(&id);
                target
            }
        };
        emit_selection(graph, events, &target);
        if mode == SelectMode::Remove {
            return;
        }
        let start_positions: IndexMap<NodeId, [f32; 2]> = graph
            .selected_ids()
            .into_iter()
            .filter_map(|node| graph.node(node).map(|n| (node, n.position)))
            .collect();
        self.state = InteractionState::MovingSelection {
            pressed: id,
            origin: pos,
            start_positions,
            moved: false,
        };
    }

    /// Track pointer travel for the active gesture. Selection moves and
    /// backdrop resizes are previewed directly on the model; they become
    /// commands on release and are rolled back on cancel.
    pub fn pointer_move(&mut self, graph: &mut GraphModel, pos: [f32; 2]) {
        match &mut self.state {
            InteractionState::Idle => {}
            InteractionState::Panning { grab } => {
                let grab = *grab;
                self.viewport.pan[0] += grab[0] - pos[0];
                self.viewport.pan[1] += grab[1] - pos[1];
            }
            InteractionState::Zooming { anchor, last_y } => {
                let factor = 1.0 + (*last_y - pos[1]) * ZOOM_DRAG_RATE;
                let anchor = *anchor;
                *last_y = pos[1];
                self.viewport.zoom_by(factor, anchor);
            }
            InteractionState::BoxSelecting { current, .. } => *current = pos,
            InteractionState::DraggingConnection { current, .. } => *current = pos,
            InteractionState::SlicingConnections { path } => {
                if path
                    .last()
                    .map_or(true, |last| distance(*last, pos) >= SLICE_SAMPLE_SPACING)
                {
                    path.push(pos);
                }
            }
            InteractionState::MovingSelection {
                origin,
                start_positions,
                moved,
                ..
            } => {
                if !*moved && distance(*origin, pos) < DRAG_THRESHOLD {
                    return;
                }
                *moved = true;
                let delta = [pos[0] - origin[0], pos[1] - origin[1]];
                for (id, start) in start_positions.iter() {
                    if let Some(node) = graph.node_mut(*id) {
                        node.position = [start[0] + delta[0], start[1] + delta[1]];
                    }
                }
            }
            InteractionState::ResizingBackdrop {
                node,
                start_size,
                origin,
                ..
            } => {
                let size = [
                    (start_size[0] + pos[0] - origin[0]).max(MIN_BACKDROP_SIZE[0]),
                    (start_size[1] + pos[1] - origin[1]).max(MIN_BACKDROP_SIZE[1]),
                ];
                if let Some(entity) = graph.node_mut(*node) {
                    entity.size = size;
                }
            }
        }
    }

    /// Resolve the active gesture. This is the only place interaction
    /// commits commands.
    pub fn pointer_up(
        &mut self,
        graph: &mut GraphModel,
        history: &mut CommandStack,
        events: &EventBus,
        hit: &dyn HitTest,
        pos: [f32; 2],
        mods: Modifiers,
    ) {
        let state = mem::replace(&mut self.state, InteractionState::Idle);
        match state {
            InteractionState::Idle
            | InteractionState::Panning { .. }
            | InteractionState::Zooming { .. } => {}

            InteractionState::BoxSelecting { origin, .. } => {
                // Rightward drags select fully contained nodes; leftward
                // drags also take anything the box touches.
                let fully_contained = pos[0] >= origin[0];
                let min = [origin[0].min(pos[0]), origin[1].min(pos[1])];
                let max = [origin[0].max(pos[0]), origin[1].max(pos[1])];
                let boxed: IndexSet<NodeId> = graph
                    .nodes_in_rect(min, max, fully_contained)
                    .into_iter()
                    .collect();
                let current: IndexSet<NodeId> = graph.selected_ids().into_iter().collect();
                let target: IndexSet<NodeId> = match SelectMode::from_modifiers(mods) {
                    SelectMode::Replace => boxed,
                    SelectMode::Add => current.union(&boxed).copied().collect(),
                    SelectMode::Remove => current.difference(&boxed).copied().collect(),
                };
                emit_selection(graph, events, &target);
            }

            InteractionState::DraggingConnection {
                source,
                detached,
                origin,
                ..
            } => {
                self.finish_connection_drag(graph, history, events, hit, pos, source, detached, origin);
            }

            InteractionState::SlicingConnections { mut path } => {
                if path
                    .last()
                    .map_or(true, |last| distance(*last, pos) > f32::EPSILON)
                {
                    path.push(pos);
                }
                slice_pipes(graph, history, events, hit, &path);
            }

            InteractionState::MovingSelection {
                pressed,
                start_positions,
                moved,
                ..
            } => {
                if !moved {
                    // A click without a drag collapses a multi-selection
                    // down to the pressed node.
                    if !mods.shift && !mods.ctrl {
                        let target: IndexSet<NodeId> = [pressed].into_iter().collect();
                        emit_selection(graph, events, &target);
                    }
                    return;
                }
                if graph.pipe_collision && start_positions.len() == 1 {
                    let (node, from) = start_positions
                        .iter()
                        .map(|(id, start)| (*id, *start))
                        .next()
                        .unwrap_or((pressed, [0.0, 0.0]));
                    if insert_into_pipe(graph, history, events, hit, node, from) {
                        return;
                    }
                }
                commit_moves(graph, history, events, &start_positions);
            }

            InteractionState::ResizingBackdrop {
                node,
                start_position,
                start_size,
                ..
            } => {
                let Some(entity) = graph.node(node) else {
                    return;
                };
                let from = (start_position, start_size);
                let to = (entity.position, entity.size);
                if from != to {
                    history.push(graph, events, ResizeNodeCmd::new(node, from, to));
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_connection_drag(
        &mut self,
        graph: &mut GraphModel,
        history: &mut CommandStack,
        events: &EventBus,
        hit: &dyn HitTest,
        pos: [f32; 2],
        source: PortRef,
        detached: Option<PortRef>,
        origin: [f32; 2],
    ) {
        match (hit.port_at(pos), detached) {
            // Dropped back on the port it was grabbed from: nothing was
            // committed, so restoring is a no-op.
            (Some(target), Some(original)) if target == original => {}

            (Some(target), detached) => {
                let mut delta = ConnectionDelta::default();
                if let Some(original) = &detached {
                    // The grabbed pipe moves: severing it is part of the
                    // same undo unit as the new attachment.
                    match connection::plan_disconnect(graph, &source, original) {
                        Ok(part) => delta.merge(part),
                        Err(_) => return,
                    }
                }
                match connection::plan_connect(graph, &source, &target) {
                    Ok(part) => {
                        delta.merge(part);
                        history.push(graph, events, ConnectCmd::new(delta));
                    }
                    // Cycle, lock, self-connection: a failed drop reverts
                    // silently to the pre-drag state.
                    Err(_) => {}
                }
            }

            (None, Some(original)) => {
                if distance(origin, pos) < DRAG_THRESHOLD {
                    // Barely moved: treat as a click and keep the pipe.
                    return;
                }
                if let Ok(delta) = connection::plan_disconnect(graph, &source, &original) {
                    if !delta.is_empty() {
                        history.push(graph, events, DisconnectCmd::new(delta));
                    }
                }
            }

            (None, None) => {}
        }
    }

    /// Zoom around `pos` by wheel notches (positive zooms in).
    pub fn wheel(&mut self, notches: f32, pos: [f32; 2]) {
        self.viewport.zoom_by(1.0 + notches * WHEEL_ZOOM_STEP, pos);
    }

    /// Abort the active gesture, rolling back previewed moves and
    /// resizes. Nothing is committed to history.
    pub fn cancel(&mut self, graph: &mut GraphModel) {
        match mem::replace(&mut self.state, InteractionState::Idle) {
            InteractionState::MovingSelection {
                start_positions,
                moved,
                ..
            } => {
                if moved {
                    for (id, start) in start_positions {
                        if let Some(node) = graph.node_mut(id) {
                            node.position = start;
                        }
                    }
                }
            }
            InteractionState::ResizingBackdrop {
                node,
                start_position,
                start_size,
                ..
            } => {
                if let Some(entity) = graph.node_mut(node) {
                    entity.position = start_position;
                    entity.size = start_size;
                }
            }
            _ => {}
        }
    }
}

impl Default for InteractionController {
    fn default() -> Self {
        Self::new()
    }
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Apply a selection target and emit the diff when anything changed.
fn emit_selection(graph: &mut GraphModel, events: &EventBus, target: &IndexSet<NodeId>) {
    let (selected, deselected) = graph.set_selection(target);
    if !selected.is_empty() || !deselected.is_empty() {
        events.emit(&GraphEvent::SelectionChanged {
            selected,
            deselected,
        });
    }
}

/// Disconnect every pipe crossed by the slice path whose endpoints are
/// both unlocked, as one macro.
fn slice_pipes(
    graph: &mut GraphModel,
    history: &mut CommandStack,
    events: &EventBus,
    hit: &dyn HitTest,
    path: &[[f32; 2]],
) {
    let mut pipes: Vec<(PortRef, PortRef)> = Vec::new();
    for sample in path {
        for item in hit.items_near(*sample, Some(SceneItemKind::Pipe), SLICE_PROBE, SLICE_PROBE) {
            if let SceneItem::Pipe { source, target } = item {
                let pair = (source, target);
                if !pipes.contains(&pair) {
                    pipes.push(pair);
                }
            }
        }
    }
    pipes.retain(|(a, b)| {
        graph.port(a).is_some_and(|p| !p.locked) && graph.port(b).is_some_and(|p| !p.locked)
    });
    if pipes.is_empty() || history.begin_macro("Slice connections").is_err() {
        return;
    }
    for (a, b) in &pipes {
        if let Ok(delta) = connection::plan_disconnect(graph, a, b) {
            if !delta.is_empty() {
                history.push(graph, events, DisconnectCmd::new(delta));
            }
        }
    }
    let _ = history.end_macro();
}

/// Commit previewed node moves as one macro, one command per node that
/// actually ended somewhere new.
fn commit_moves(
    graph: &mut GraphModel,
    history: &mut CommandStack,
    events: &EventBus,
    start_positions: &IndexMap<NodeId, [f32; 2]>,
) {
    let moves: Vec<MoveNodeCmd> = start_positions
        .iter()
        .filter_map(|(id, start)| {
            let node = graph.node(*id)?;
            (node.position != *start).then(|| MoveNodeCmd::new(*id, *start, node.position))
        })
        .collect();
    if moves.is_empty() || history.begin_macro("Move nodes").is_err() {
        return;
    }
    for command in moves {
        history.push(graph, events, command);
    }
    let _ = history.end_macro();
}

/// Splice a dropped node into the pipe under it: sever the pipe and
/// rewire it through the node's first visible ports, together with the
/// move, as one macro. Returns false when no eligible pipe is under the
/// node or the rewiring would be invalid, in which case the caller falls
/// back to a plain move.
fn insert_into_pipe(
    graph: &mut GraphModel,
    history: &mut CommandStack,
    events: &EventBus,
    hit: &dyn HitTest,
    node: NodeId,
    from: [f32; 2],
) -> bool {
    let Some(entity) = graph.node(node) else {
        return false;
    };
    let (Some(input), Some(output)) = (entity.first_visible_input(), entity.first_visible_output())
    else {
        return false;
    };
    let node_in = PortRef::input(node, &input.name);
    let node_out = PortRef::output(node, &output.name);
    let to = entity.position;
    let center = [
        entity.position[0] + entity.size[0] / 2.0,
        entity.position[1] + entity.size[1] / 2.0,
    ];
    let probe = hit.items_near(
        center,
        Some(SceneItemKind::Pipe),
        entity.size[0],
        entity.size[1],
    );
    let Some((src, dst)) = probe.into_iter().find_map(|item| match item {
        SceneItem::Pipe { source, target } if source.node != node && target.node != node => {
            Some((source, target))
        }
        _ => None,
    }) else {
        return false;
    };

    // Feasibility gate before anything is pushed, so a refused splice
    // leaves history untouched and the plain move can proceed.
    let live = connection::plan_disconnect(graph, &src, &dst);
    if !live.is_ok_and(|delta| !delta.is_empty()) {
        return false;
    }
    if connection::plan_connect(graph, &src, &node_in).is_err()
        || connection::plan_connect(graph, &node_out, &dst).is_err()
    {
        return false;
    }
    if history.begin_macro("Insert node into pipe").is_err() {
        return false;
    }
    history.push(graph, events, MoveNodeCmd::new(node, from, to));
    if let Ok(delta) = connection::plan_disconnect(graph, &src, &dst) {
        history.push(graph, events, DisconnectCmd::new(delta));
    }
    if let Ok(delta) = connection::plan_connect(graph, &src, &node_in) {
        history.push(graph, events, ConnectCmd::new(delta));
    }
    if let Ok(delta) = connection::plan_connect(graph, &node_out, &dst) {
        history.push(graph, events, ConnectCmd::new(delta));
    }
    let _ = history.end_macro();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchbay_graph::{NodeRegistry, NodeTemplate, PortSpec, TypeKey};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::builtin();
        registry
            .register(
                NodeTemplate::new("test.nodes", "Pass")
                    .with_input(PortSpec::new("in", false))
                    .with_output(PortSpec::new("out", true)),
            )
            .unwrap();
        registry
    }

    fn pass_key() -> TypeKey {
        TypeKey::new("test.nodes", "Pass")
    }

    struct StubHitTest {
        ports: Vec<([f32; 2], PortRef)>,
        items: Vec<([f32; 2], SceneItem)>,
        port_radius: f32,
    }

    impl StubHitTest {
        fn new() -> Self {
            Self {
                ports: Vec::new(),
                items: Vec::new(),
                port_radius: 3.0,
            }
        }

        fn with_port(mut self, pos: [f32; 2], port: PortRef) -> Self {
            self.ports.push((pos, port));
            self
        }

        fn with_item(mut self, pos: [f32; 2], item: SceneItem) -> Self {
            self.items.push((pos, item));
            self
        }
    }

    impl HitTest for StubHitTest {
        fn items_near(
            &self,
            pos: [f32; 2],
            filter: Option<SceneItemKind>,
            width: f32,
            height: f32,
        ) -> Vec<SceneItem> {
            self.items
                .iter()
                .filter(|(at, item)| {
                    (at[0] - pos[0]).abs() <= width / 2.0 + 2.0
                        && (at[1] - pos[1]).abs() <= height / 2.0 + 2.0
                        && filter.map_or(true, |kind| item.kind() == kind)
                })
                .map(|(_, item)| item.clone())
                .collect()
        }

        fn port_at(&self, pos: [f32; 2]) -> Option<PortRef> {
            self.ports
                .iter()
                .find(|(at, _)| distance(*at, pos) <= self.port_radius)
                .map(|(_, port)| port.clone())
        }
    }

    struct Rig {
        graph: GraphModel,
        history: CommandStack,
        events: EventBus,
        controller: InteractionController,
        seen: Rc<RefCell<Vec<GraphEvent>>>,
    }

    impl Rig {
        fn new() -> Self {
            let events = EventBus::new();
            let seen: Rc<RefCell<Vec<GraphEvent>>> = Rc::default();
            let sink = seen.clone();
            events.subscribe(move |event| sink.borrow_mut().push(event.clone()));
            Self {
                graph: GraphModel::new(registry()),
                history: CommandStack::new(),
                events,
                controller: InteractionController::new(),
                seen,
            }
        }

        fn down(&mut self, hit: &dyn HitTest, pos: [f32; 2], button: PointerButton, mods: Modifiers) {
            self.controller
                .pointer_down(&mut self.graph, &self.events, hit, pos, button, mods);
        }

        fn drag(&mut self, pos: [f32; 2]) {
            self.controller.pointer_move(&mut self.graph, pos);
        }

        fn up(&mut self, hit: &dyn HitTest, pos: [f32; 2], mods: Modifiers) {
            self.controller.pointer_up(
                &mut self.graph,
                &mut self.history,
                &self.events,
                hit,
                pos,
                mods,
            );
        }

        fn connect(&mut self, a: &PortRef, b: &PortRef) {
            let delta = connection::plan_connect(&self.graph, a, b).unwrap();
            connection::apply(&mut self.graph, &delta);
        }
    }

    fn plain() -> Modifiers {
        Modifiers::default()
    }

    #[test]
    fn test_port_drag_connects() {
        let mut rig = Rig::new();
        let a = rig.graph.create_node(&pass_key()).unwrap();
        let b = rig.graph.create_node(&pass_key()).unwrap();
        let out = PortRef::output(a, "out");
        let inp = PortRef::input(b, "in");
        let hit = StubHitTest::new()
            .with_port([0.0, 0.0], out.clone())
            .with_port([100.0, 0.0], inp.clone());

        rig.down(&hit, [0.0, 0.0], PointerButton::Left, plain());
        assert!(matches!(
            rig.controller.state(),
            InteractionState::DraggingConnection { detached: None, .. }
        ));
        rig.drag([50.0, 0.0]);
        rig.up(&hit, [100.0, 0.0], plain());

        assert!(rig.graph.port(&inp).unwrap().is_connected_to(a, "out"));
        assert_eq!(rig.history.undo_depth(), 1);
        assert_eq!(rig.history.undo_label(), Some("Connect"));
    }

    #[test]
    fn test_grabbing_connected_single_port_moves_pipe() {
        let mut rig = Rig::new();
        let a = rig.graph.create_node(&pass_key()).unwrap();
        let b = rig.graph.create_node(&pass_key()).unwrap();
        let c = rig.graph.create_node(&pass_key()).unwrap();
        let b_in = PortRef::input(b, "in");
        let c_in = PortRef::input(c, "in");
        rig.connect(&PortRef::output(a, "out"), &b_in);

        let hit = StubHitTest::new()
            .with_port([100.0, 0.0], b_in.clone())
            .with_port([200.0, 0.0], c_in.clone());

        // Grab b's occupied input: the far peer (a.out) stays fixed.
        rig.down(&hit, [100.0, 0.0], PointerButton::Left, plain());
        let InteractionState::DraggingConnection { source, detached, .. } = rig.controller.state()
        else {
            panic!("expected a connection drag");
        };
        assert_eq!(source, &PortRef::output(a, "out"));
        assert_eq!(detached.as_ref(), Some(&b_in));

        rig.drag([150.0, 0.0]);
        rig.up(&hit, [200.0, 0.0], plain());

        assert!(!rig.graph.port(&b_in).unwrap().is_connected());
        assert!(rig.graph.port(&c_in).unwrap().is_connected_to(a, "out"));
        // One undo unit restores the original wiring.
        rig.history.undo(&mut rig.graph, &rig.events).unwrap();
        assert!(rig.graph.port(&b_in).unwrap().is_connected_to(a, "out"));
        assert!(!rig.graph.port(&c_in).unwrap().is_connected());
    }

    #[test]
    fn test_short_drag_restores_grabbed_pipe() {
        let mut rig = Rig::new();
        let a = rig.graph.create_node(&pass_key()).unwrap();
        let b = rig.graph.create_node(&pass_key()).unwrap();
        let b_in = PortRef::input(b, "in");
        rig.connect(&PortRef::output(a, "out"), &b_in);

        let hit = StubHitTest::new().with_port([100.0, 0.0], b_in.clone());
        rig.down(&hit, [100.0, 0.0], PointerButton::Left, plain());
        rig.drag([103.5, 0.0]);
        rig.up(&hit, [103.5, 0.0], plain());

        assert!(rig.graph.port(&b_in).unwrap().is_connected_to(a, "out"));
        assert_eq!(rig.history.undo_depth(), 0);
    }

    #[test]
    fn test_long_drag_to_nothing_disconnects() {
        let mut rig = Rig::new();
        let a = rig.graph.create_node(&pass_key()).unwrap();
        let b = rig.graph.create_node(&pass_key()).unwrap();
        let b_in = PortRef::input(b, "in");
        rig.connect(&PortRef::output(a, "out"), &b_in);

        let hit = StubHitTest::new().with_port([100.0, 0.0], b_in.clone());
        rig.down(&hit, [100.0, 0.0], PointerButton::Left, plain());
        rig.drag([180.0, 40.0]);
        rig.up(&hit, [180.0, 40.0], plain());

        assert!(!rig.graph.port(&b_in).unwrap().is_connected());
        assert_eq!(rig.history.undo_label(), Some("Disconnect"));
    }

    #[test]
    fn test_invalid_drop_is_silent_noop() {
        let mut rig = Rig::new();
        let a = rig.graph.create_node(&pass_key()).unwrap();
        let b = rig.graph.create_node(&pass_key()).unwrap();
        rig.connect(&PortRef::output(a, "out"), &PortRef::input(b, "in"));

        // Dropping b.out onto a.in would close a cycle.
        let hit = StubHitTest::new()
            .with_port([0.0, 100.0], PortRef::output(b, "out"))
            .with_port([100.0, 100.0], PortRef::input(a, "in"));
        rig.down(&hit, [0.0, 100.0], PointerButton::Left, plain());
        rig.drag([60.0, 100.0]);
        rig.up(&hit, [100.0, 100.0], plain());

        assert!(!rig.graph.port(&PortRef::input(a, "in")).unwrap().is_connected());
        assert_eq!(rig.history.undo_depth(), 0);
        assert_eq!(rig.controller.state(), &InteractionState::Idle);
    }

    #[test]
    fn test_locked_port_press_selects_node() {
        let mut rig = Rig::new();
        let a = rig.graph.create_node(&pass_key()).unwrap();
        let out = PortRef::output(a, "out");
        rig.graph.port_mut(&out).unwrap().locked = true;

        let hit = StubHitTest::new().with_port([0.0, 0.0], out);
        rig.down(&hit, [0.0, 0.0], PointerButton::Left, plain());
        assert!(matches!(
            rig.controller.state(),
            InteractionState::MovingSelection { .. }
        ));
        assert_eq!(rig.graph.selected_ids(), vec![a]);
    }

    #[test]
    fn test_box_select_then_ctrl_release_removes_one() {
        let mut rig = Rig::new();
        let n1 = rig.graph.create_node(&pass_key()).unwrap();
        let n2 = rig.graph.create_node(&pass_key()).unwrap();
        let n3 = rig.graph.create_node(&pass_key()).unwrap();
        rig.graph.node_mut(n1).unwrap().position = [0.0, 0.0];
        rig.graph.node_mut(n2).unwrap().position = [200.0, 0.0];
        rig.graph.node_mut(n3).unwrap().position = [400.0, 0.0];
        let hit = StubHitTest::new();

        // Rightward box over all three selects them.
        rig.down(&hit, [-10.0, -10.0], PointerButton::Left, plain());
        rig.drag([300.0, 50.0]);
        rig.up(&hit, [600.0, 100.0], plain());
        assert_eq!(rig.graph.selected_ids().len(), 3);

        // Ctrl box over the third removes exactly it.
        let ctrl = Modifiers {
            ctrl: true,
            ..Modifiers::default()
        };
        rig.down(&hit, [380.0, -10.0], PointerButton::Left, ctrl);
        rig.up(&hit, [580.0, 100.0], ctrl);
        let selected = rig.graph.selected_ids();
        assert_eq!(selected.len(), 2);
        assert!(!selected.contains(&n3));

        let events = rig.seen.borrow();
        assert!(matches!(
            events.last(),
            Some(GraphEvent::SelectionChanged { deselected, .. }) if deselected == &vec![n3]
        ));
    }

    #[test]
    fn test_leftward_box_touches() {
        let mut rig = Rig::new();
        let n1 = rig.graph.create_node(&pass_key()).unwrap();
        rig.graph.node_mut(n1).unwrap().position = [100.0, 0.0];
        let hit = StubHitTest::new();

        // Leftward box only clipping the node's left edge still takes it.
        rig.down(&hit, [120.0, 90.0], PointerButton::Left, plain());
        rig.up(&hit, [40.0, -10.0], plain());
        assert_eq!(rig.graph.selected_ids(), vec![n1]);

        // The same rectangle dragged rightward requires full containment.
        rig.down(&hit, [40.0, -10.0], PointerButton::Left, plain());
        rig.up(&hit, [120.0, 90.0], plain());
        assert!(rig.graph.selected_ids().is_empty());
    }

    #[test]
    fn test_ctrl_press_removes_without_drag() {
        let mut rig = Rig::new();
        let n1 = rig.graph.create_node(&pass_key()).unwrap();
        let n2 = rig.graph.create_node(&pass_key()).unwrap();
        let target: IndexSet<NodeId> = [n1, n2].into_iter().collect();
        rig.graph.set_selection(&target);

        let hit = StubHitTest::new().with_item([50.0, 50.0], SceneItem::Node(n2));
        let ctrl = Modifiers {
            ctrl: true,
            ..Modifiers::default()
        };
        rig.down(&hit, [50.0, 50.0], PointerButton::Left, ctrl);
        assert_eq!(rig.graph.selected_ids(), vec![n1]);
        assert_eq!(rig.controller.state(), &InteractionState::Idle);
    }

    #[test]
    fn test_move_selection_commits_one_macro() {
        let mut rig = Rig::new();
        let n1 = rig.graph.create_node(&pass_key()).unwrap();
        let n2 = rig.graph.create_node(&pass_key()).unwrap();
        rig.graph.node_mut(n2).unwrap().position = [200.0, 0.0];
        let target: IndexSet<NodeId> = [n1, n2].into_iter().collect();
        rig.graph.set_selection(&target);

        let hit = StubHitTest::new().with_item([10.0, 10.0], SceneItem::Node(n1));
        rig.down(&hit, [10.0, 10.0], PointerButton::Left, plain());
        rig.drag([60.0, 10.0]);
        rig.up(&hit, [60.0, 10.0], plain());

        assert_eq!(rig.graph.node(n1).unwrap().position, [50.0, 0.0]);
        assert_eq!(rig.graph.node(n2).unwrap().position, [250.0, 0.0]);
        assert_eq!(rig.history.undo_depth(), 1);

        rig.history.undo(&mut rig.graph, &rig.events).unwrap();
        assert_eq!(rig.graph.node(n1).unwrap().position, [0.0, 0.0]);
        assert_eq!(rig.graph.node(n2).unwrap().position, [200.0, 0.0]);
    }

    #[test]
    fn test_click_collapses_multi_selection() {
        let mut rig = Rig::new();
        let n1 = rig.graph.create_node(&pass_key()).unwrap();
        let n2 = rig.graph.create_node(&pass_key()).unwrap();
        let target: IndexSet<NodeId> = [n1, n2].into_iter().collect();
        rig.graph.set_selection(&target);

        let hit = StubHitTest::new().with_item([10.0, 10.0], SceneItem::Node(n1));
        rig.down(&hit, [10.0, 10.0], PointerButton::Left, plain());
        // Press keeps the group so it could have been dragged.
        assert_eq!(rig.graph.selected_ids().len(), 2);
        rig.up(&hit, [11.0, 10.0], plain());
        assert_eq!(rig.graph.selected_ids(), vec![n1]);
        assert_eq!(rig.history.undo_depth(), 0);
    }

    #[test]
    fn test_cancel_rolls_back_preview_moves() {
        let mut rig = Rig::new();
        let n1 = rig.graph.create_node(&pass_key()).unwrap();
        let hit = StubHitTest::new().with_item([10.0, 10.0], SceneItem::Node(n1));

        rig.down(&hit, [10.0, 10.0], PointerButton::Left, plain());
        rig.drag([80.0, 10.0]);
        assert_eq!(rig.graph.node(n1).unwrap().position, [70.0, 0.0]);

        rig.controller.cancel(&mut rig.graph);
        assert_eq!(rig.graph.node(n1).unwrap().position, [0.0, 0.0]);
        assert_eq!(rig.controller.state(), &InteractionState::Idle);
        assert_eq!(rig.history.undo_depth(), 0);
    }

    #[test]
    fn test_slice_disconnects_unlocked_pipes_as_macro() {
        let mut rig = Rig::new();
        let a = rig.graph.create_node(&pass_key()).unwrap();
        let b = rig.graph.create_node(&pass_key()).unwrap();
        let c = rig.graph.create_node(&pass_key()).unwrap();
        let out = PortRef::output(a, "out");
        let b_in = PortRef::input(b, "in");
        let c_in = PortRef::input(c, "in");
        rig.connect(&out, &b_in);
        rig.connect(&out, &c_in);
        rig.graph.port_mut(&c_in).unwrap().locked = true;

        let hit = StubHitTest::new()
            .with_item(
                [10.0, 10.0],
                SceneItem::Pipe {
                    source: out.clone(),
                    target: b_in.clone(),
                },
            )
            .with_item(
                [20.0, 20.0],
                SceneItem::Pipe {
                    source: out.clone(),
                    target: c_in.clone(),
                },
            );

        let slice_mods = Modifiers {
            alt: true,
            shift: true,
            ..Modifiers::default()
        };
        rig.down(&hit, [0.0, 0.0], PointerButton::Left, slice_mods);
        assert!(matches!(
            rig.controller.state(),
            InteractionState::SlicingConnections { .. }
        ));
        rig.drag([10.0, 10.0]);
        rig.drag([20.0, 20.0]);
        rig.up(&hit, [30.0, 30.0], slice_mods);

        assert!(!rig.graph.port(&b_in).unwrap().is_connected());
        // The locked pipe survives.
        assert!(rig.graph.port(&c_in).unwrap().is_connected());
        assert_eq!(rig.history.undo_depth(), 1);
        assert_eq!(rig.history.undo_label(), Some("Slice connections"));
    }

    #[test]
    fn test_drop_on_pipe_splices_node() {
        let mut rig = Rig::new();
        rig.graph.pipe_collision = true;
        let a = rig.graph.create_node(&pass_key()).unwrap();
        let b = rig.graph.create_node(&pass_key()).unwrap();
        let m = rig.graph.create_node(&pass_key()).unwrap();
        rig.graph.node_mut(m).unwrap().position = [0.0, 200.0];
        let out = PortRef::output(a, "out");
        let b_in = PortRef::input(b, "in");
        rig.connect(&out, &b_in);

        let hit = StubHitTest::new()
            .with_item([10.0, 210.0], SceneItem::Node(m))
            .with_item(
                [250.0, 40.0],
                SceneItem::Pipe {
                    source: out.clone(),
                    target: b_in.clone(),
                },
            );

        rig.down(&hit, [10.0, 210.0], PointerButton::Left, plain());
        rig.drag([180.0, 10.0]);
        rig.up(&hit, [180.0, 10.0], plain());

        // m sits at [170, 0]; its center lands on the pipe.
        assert_eq!(rig.graph.node(m).unwrap().position, [170.0, 0.0]);
        assert!(rig.graph.port(&PortRef::input(m, "in")).unwrap().is_connected_to(a, "out"));
        assert!(rig.graph.port(&b_in).unwrap().is_connected_to(m, "out"));
        assert!(!rig.graph.port(&b_in).unwrap().is_connected_to(a, "out"));
        assert_eq!(rig.history.undo_depth(), 1);
        assert_eq!(rig.history.undo_label(), Some("Insert node into pipe"));

        rig.history.undo(&mut rig.graph, &rig.events).unwrap();
        assert_eq!(rig.graph.node(m).unwrap().position, [0.0, 200.0]);
        assert!(rig.graph.port(&b_in).unwrap().is_connected_to(a, "out"));
        assert!(!rig.graph.port(&PortRef::input(m, "in")).unwrap().is_connected());
    }

    #[test]
    fn test_backdrop_resize_pushes_single_command() {
        let mut rig = Rig::new();
        let bd = rig
            .graph
            .create_node(&TypeKey::new("patchbay.graph", "Backdrop"))
            .unwrap();
        let hit = StubHitTest::new().with_item([400.0, 260.0], SceneItem::BackdropSizer(bd));

        rig.down(&hit, [400.0, 260.0], PointerButton::Left, plain());
        rig.drag([440.0, 300.0]);
        rig.up(&hit, [440.0, 300.0], plain());

        assert_eq!(rig.graph.node(bd).unwrap().size, [440.0, 300.0]);
        assert_eq!(rig.history.undo_label(), Some("Resize node"));

        rig.history.undo(&mut rig.graph, &rig.events).unwrap();
        assert_eq!(rig.graph.node(bd).unwrap().size, [400.0, 260.0]);
    }

    #[test]
    fn test_alt_drag_pans() {
        let mut rig = Rig::new();
        let hit = StubHitTest::new();
        let alt = Modifiers {
            alt: true,
            ..Modifiers::default()
        };
        rig.down(&hit, [10.0, 10.0], PointerButton::Left, alt);
        assert!(matches!(rig.controller.state(), InteractionState::Panning { .. }));
        rig.drag([20.0, 10.0]);
        assert_eq!(rig.controller.viewport.pan, [-10.0, 0.0]);
        rig.up(&hit, [20.0, 10.0], alt);
        assert_eq!(rig.controller.state(), &InteractionState::Idle);
    }

    #[test]
    fn test_wheel_zoom_keeps_anchor_fixed() {
        let mut rig = Rig::new();
        let anchor = [100.0, 40.0];
        let before = rig.controller.viewport.scene_to_screen(anchor);
        rig.controller.wheel(2.0, anchor);
        let viewport = rig.controller.viewport;
        assert!((viewport.zoom - 1.2).abs() < 1e-5);
        let after = viewport.scene_to_screen(anchor);
        assert!((after[0] - before[0]).abs() < 1e-3);
        assert!((after[1] - before[1]).abs() < 1e-3);

        // Clamped at the bounds.
        rig.controller.wheel(-100.0, anchor);
        assert_eq!(rig.controller.viewport.zoom, MIN_ZOOM);
    }

    #[test]
    fn test_zoom_drag() {
        let mut rig = Rig::new();
        let hit = StubHitTest::new();
        let alt = Modifiers {
            alt: true,
            ..Modifiers::default()
        };
        rig.down(&hit, [50.0, 50.0], PointerButton::Right, alt);
        assert!(matches!(rig.controller.state(), InteractionState::Zooming { .. }));
        // Dragging up zooms in.
        rig.drag([50.0, 30.0]);
        assert!(rig.controller.viewport.zoom > 1.0);
        rig.up(&hit, [50.0, 30.0], alt);
        assert_eq!(rig.controller.state(), &InteractionState::Idle);
    }
}
