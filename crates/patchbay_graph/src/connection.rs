// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection protocol: validation, deltas, and the only code paths that
//! touch port adjacency.
//!
//! - `plan_*` functions validate against the current graph and return a
//!   [`ConnectionDelta`] without mutating anything
//! - [`apply`] / [`revert`] replay a delta forwards or backwards
//! - lock-state helpers capture prior flags so commands can restore them

use indexmap::IndexSet;
use std::collections::VecDeque;
use thiserror::Error;

use crate::graph::GraphModel;
use crate::node::NodeId;
use crate::port::{PortDirection, PortRef};

/// Errors raised while validating or editing connections and ports.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortError {
    /// Port reference does not resolve to a live port
    #[error("unknown port: {0}")]
    UnknownPort(PortRef),
    /// Locked ports reject connection changes
    #[error("port is locked: {0}")]
    Locked(PortRef),
    /// Both references name the same port
    #[error("cannot connect {0} to itself")]
    SamePort(PortRef),
    /// Both ports sit on one node and face the same direction
    #[error("cannot connect {a} to {b}: same node and direction")]
    SameNodeDirection {
        /// First endpoint
        a: PortRef,
        /// Second endpoint
        b: PortRef,
    },
    /// The two ports are already connected to each other
    #[error("{a} and {b} are already connected")]
    AlreadyConnected {
        /// First endpoint
        a: PortRef,
        /// Second endpoint
        b: PortRef,
    },
    /// Connecting would close a directed cycle on an acyclic graph
    #[error("connecting {from} to {to} would create a cycle")]
    WouldCycle {
        /// Upstream endpoint
        from: PortRef,
        /// Downstream endpoint
        to: PortRef,
    },
    /// Port name already used in that direction on the node
    #[error("node {node} already has a port named '{name}'")]
    NameTaken {
        /// Owning node
        node: NodeId,
        /// Conflicting name
        name: String,
    },
    /// Boundary proxies expose exactly the one port they mirror
    #[error("boundary proxy {0} cannot gain another port")]
    ProxyPortFixed(NodeId),
}

/// Net adjacency change produced by validating one connection request.
///
/// `disconnected` lists pairs severed (implicit evictions of existing
/// peers on single-connection ports, or explicit disconnects);
/// `connected` lists pairs attached. Applying then reverting a delta
/// leaves the graph byte-for-byte where it started.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionDelta {
    /// Pairs severed, in application order
    pub disconnected: Vec<(PortRef, PortRef)>,
    /// Pairs attached, in application order
    pub connected: Vec<(PortRef, PortRef)>,
}

impl ConnectionDelta {
    /// Whether the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.disconnected.is_empty() && self.connected.is_empty()
    }

    /// Fold another delta into this one, skipping pairs already present.
    /// Lets a drag release combine an explicit detach with the connect
    /// plan without double-severing an evicted pair.
    pub fn merge(&mut self, other: ConnectionDelta) {
        for pair in other.disconnected {
            if !self.disconnected.contains(&pair) {
                self.disconnected.push(pair);
            }
        }
        for pair in other.connected {
            if !self.connected.contains(&pair) {
                self.connected.push(pair);
            }
        }
    }
}

/// Order a pair with the output side first when directions differ.
fn orient(a: PortRef, b: PortRef) -> (PortRef, PortRef) {
    if a.direction == PortDirection::In && b.direction == PortDirection::Out {
        (b, a)
    } else {
        (a, b)
    }
}

fn resolve(graph: &GraphModel, port: &PortRef) -> Result<(), PortError> {
    if graph.port(port).is_none() {
        return Err(PortError::UnknownPort(port.clone()));
    }
    Ok(())
}

/// Resolve an adjacency entry (peer node id + port name) to a full
/// reference. The peer usually faces the opposite direction; same-facing
/// links are resolved as a fallback so non-standard pairs stay addressable.
pub fn resolve_peer(
    graph: &GraphModel,
    from: &PortRef,
    peer_node: NodeId,
    peer_name: &str,
) -> Option<PortRef> {
    let node = graph.node(peer_node)?;
    let opposite = from.direction.opposite();
    if node.port(opposite, peer_name).is_some() {
        return Some(PortRef::new(peer_node, opposite, peer_name));
    }
    if node.port(from.direction, peer_name).is_some() {
        return Some(PortRef::new(peer_node, from.direction, peer_name));
    }
    None
}

/// Fully resolved peers of a port, in adjacency order.
pub fn peers(graph: &GraphModel, port: &PortRef) -> Vec<PortRef> {
    let Some(p) = graph.port(port) else {
        return Vec::new();
    };
    p.peer_list()
        .into_iter()
        .filter_map(|(node, name)| resolve_peer(graph, port, node, &name))
        .collect()
}

/// Whether `upstream` is reachable from `start` by walking output-side
/// adjacency. Same-direction links never extend reachability.
fn reaches(graph: &GraphModel, start: NodeId, upstream: NodeId) -> bool {
    let mut visited: IndexSet<NodeId> = IndexSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        if id == upstream {
            return true;
        }
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = graph.node(id) else {
            continue;
        };
        for port in node.outputs() {
            for peer in port.connections().keys() {
                if !visited.contains(peer) {
                    queue.push_back(*peer);
                }
            }
        }
    }
    false
}

/// Validate connecting `a` to `b` and produce the resulting delta.
///
/// The delta carries implicit evictions: when either endpoint is a
/// single-connection port that is already occupied, its existing peers
/// are listed in `disconnected` so a non-multi port never ends up with
/// two peers, even transiently.
pub fn plan_connect(
    graph: &GraphModel,
    a: &PortRef,
    b: &PortRef,
) -> Result<ConnectionDelta, PortError> {
    resolve(graph, a)?;
    resolve(graph, b)?;
    for endpoint in [a, b] {
        let port = graph.port(endpoint).expect("resolved above");
        if port.locked {
            return Err(PortError::Locked(endpoint.clone()));
        }
    }
    if a == b {
        return Err(PortError::SamePort(a.clone()));
    }
    if a.node == b.node && a.direction == b.direction {
        return Err(PortError::SameNodeDirection {
            a: a.clone(),
            b: b.clone(),
        });
    }
    let port_a = graph.port(a).expect("resolved above");
    if port_a.is_connected_to(b.node, &b.name) {
        return Err(PortError::AlreadyConnected {
            a: a.clone(),
            b: b.clone(),
        });
    }
    if graph.acyclic && a.direction != b.direction {
        let (out_ref, in_ref) = orient(a.clone(), b.clone());
        // The receiving node becomes downstream of the emitting one; the
        // connection closes a cycle exactly when the emitter is already
        // reachable from it.
        if in_ref.node == out_ref.node || reaches(graph, in_ref.node, out_ref.node) {
            return Err(PortError::WouldCycle {
                from: out_ref,
                to: in_ref,
            });
        }
    }

    let mut delta = ConnectionDelta::default();
    for endpoint in [a, b] {
        let port = graph.port(endpoint).expect("resolved above");
        if !port.multi_connection && port.is_connected() {
            for peer in peers(graph, endpoint) {
                delta.disconnected.push(orient(endpoint.clone(), peer));
            }
        }
    }
    delta.connected.push(orient(a.clone(), b.clone()));
    Ok(delta)
}

/// Validate disconnecting `a` from `b`. Unconnected pairs yield an empty
/// delta rather than an error.
pub fn plan_disconnect(
    graph: &GraphModel,
    a: &PortRef,
    b: &PortRef,
) -> Result<ConnectionDelta, PortError> {
    resolve(graph, a)?;
    resolve(graph, b)?;
    for endpoint in [a, b] {
        let port = graph.port(endpoint).expect("resolved above");
        if port.locked {
            return Err(PortError::Locked(endpoint.clone()));
        }
    }
    let port_a = graph.port(a).expect("resolved above");
    let mut delta = ConnectionDelta::default();
    if port_a.is_connected_to(b.node, &b.name) {
        delta.disconnected.push(orient(a.clone(), b.clone()));
    }
    Ok(delta)
}

/// Validate clearing every connection on `port`. Fails when the port or
/// any connected peer is locked.
pub fn plan_clear(graph: &GraphModel, port: &PortRef) -> Result<ConnectionDelta, PortError> {
    resolve(graph, port)?;
    let p = graph.port(port).expect("resolved above");
    if p.locked {
        return Err(PortError::Locked(port.clone()));
    }
    let mut delta = ConnectionDelta::default();
    for peer in peers(graph, port) {
        let peer_port = graph.port(&peer).expect("peer resolved from adjacency");
        if peer_port.locked {
            return Err(PortError::Locked(peer));
        }
        delta.disconnected.push(orient(port.clone(), peer));
    }
    Ok(delta)
}

fn attach(graph: &mut GraphModel, a: &PortRef, b: &PortRef) {
    let Some(port_a) = graph.port_mut(a) else {
        panic!("stale connection delta: {a} no longer exists");
    };
    port_a.attach_peer(b.node, &b.name);
    let Some(port_b) = graph.port_mut(b) else {
        panic!("stale connection delta: {b} no longer exists");
    };
    port_b.attach_peer(a.node, &a.name);
}

fn detach(graph: &mut GraphModel, a: &PortRef, b: &PortRef) {
    let Some(port_a) = graph.port_mut(a) else {
        panic!("stale connection delta: {a} no longer exists");
    };
    port_a.detach_peer(b.node, &b.name);
    let Some(port_b) = graph.port_mut(b) else {
        panic!("stale connection delta: {b} no longer exists");
    };
    port_b.detach_peer(a.node, &a.name);
}

/// Replay a delta forwards: sever `disconnected`, then attach `connected`.
///
/// Panics when a referenced port no longer exists; that means a command
/// was applied against a model it was not planned for.
pub fn apply(graph: &mut GraphModel, delta: &ConnectionDelta) {
    for (a, b) in &delta.disconnected {
        detach(graph, a, b);
    }
    for (a, b) in &delta.connected {
        attach(graph, a, b);
    }
}

/// Replay a delta backwards: sever `connected`, then restore
/// `disconnected`, both in reverse order.
pub fn revert(graph: &mut GraphModel, delta: &ConnectionDelta) {
    for (a, b) in delta.connected.iter().rev() {
        detach(graph, a, b);
    }
    for (a, b) in delta.disconnected.iter().rev() {
        attach(graph, a, b);
    }
}

/// Every connected pair with at least one endpoint on `node`, each listed
/// once. Pure; used to capture what a node removal will sever.
pub fn incident_pairs(graph: &GraphModel, node: NodeId) -> Vec<(PortRef, PortRef)> {
    let Some(entity) = graph.node(node) else {
        return Vec::new();
    };
    let mut pairs: Vec<(PortRef, PortRef)> = Vec::new();
    for port in entity.ports() {
        let port_ref = PortRef::new(node, port.direction, &port.name);
        for peer in peers(graph, &port_ref) {
            let pair = orient(port_ref.clone(), peer);
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
    }
    pairs
}

/// Sever every connection incident to `node`, ignoring locks, and return
/// the delta that was applied. Node removal severs before extraction.
pub fn sever_node(graph: &mut GraphModel, node: NodeId) -> ConnectionDelta {
    let delta = ConnectionDelta {
        disconnected: incident_pairs(graph, node),
        connected: Vec::new(),
    };
    apply(graph, &delta);
    delta
}

/// Sever every connection on one port, ignoring locks, and return the
/// delta that was applied. Port removal severs before extraction.
pub fn sever_port(graph: &mut GraphModel, port: &PortRef) -> ConnectionDelta {
    let delta = ConnectionDelta {
        disconnected: peers(graph, port)
            .into_iter()
            .map(|peer| orient(port.clone(), peer))
            .collect(),
        connected: Vec::new(),
    };
    apply(graph, &delta);
    delta
}

/// Lock-state targets for a lock change: the port itself plus, when
/// `cascade` is set, every direct peer. Each entry carries the prior flag
/// so the change can be reverted exactly.
pub fn lock_targets(graph: &GraphModel, port: &PortRef, cascade: bool) -> Vec<(PortRef, bool)> {
    let Some(p) = graph.port(port) else {
        return Vec::new();
    };
    let mut targets = vec![(port.clone(), p.locked)];
    if cascade {
        for peer in peers(graph, port) {
            if targets.iter().any(|(r, _)| *r == peer) {
                continue;
            }
            let prior = graph.port(&peer).map(|pp| pp.locked).unwrap_or(false);
            targets.push((peer, prior));
        }
    }
    targets
}

/// Set the lock flag on every target port.
pub fn set_lock_state(graph: &mut GraphModel, targets: &[(PortRef, bool)], state: bool) {
    for (port_ref, _) in targets {
        if let Some(port) = graph.port_mut(port_ref) {
            port.locked = state;
        }
    }
}

/// Restore the captured prior lock flag on every target port.
pub fn restore_lock_state(graph: &mut GraphModel, targets: &[(PortRef, bool)]) {
    for (port_ref, prior) in targets {
        if let Some(port) = graph.port_mut(port_ref) {
            port.locked = *prior;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeEntity, NodeKind, TypeKey};
    use crate::registry::NodeRegistry;

    fn graph() -> GraphModel {
        GraphModel::new(NodeRegistry::new())
    }

    fn add_node(graph: &mut GraphModel, ins: &[&str], outs: &[&str]) -> NodeId {
        let mut node = NodeEntity::new(TypeKey::new("test.nodes", "N"), NodeKind::Basic, "n");
        for name in ins {
            node.add_input(*name, false).unwrap();
        }
        for name in outs {
            node.add_output(*name, true).unwrap();
        }
        graph.insert_node(node)
    }

    fn connect(graph: &mut GraphModel, a: &PortRef, b: &PortRef) -> ConnectionDelta {
        let delta = plan_connect(graph, a, b).unwrap();
        apply(graph, &delta);
        delta
    }

    #[test]
    fn test_connect_mirrors_both_sides() {
        let mut g = graph();
        let src = add_node(&mut g, &[], &["out"]);
        let dst = add_node(&mut g, &["in"], &[]);
        connect(&mut g, &PortRef::output(src, "out"), &PortRef::input(dst, "in"));

        assert!(g.port(&PortRef::output(src, "out")).unwrap().is_connected_to(dst, "in"));
        assert!(g.port(&PortRef::input(dst, "in")).unwrap().is_connected_to(src, "out"));
    }

    #[test]
    fn test_single_connection_eviction_in_delta() {
        let mut g = graph();
        let a = add_node(&mut g, &[], &["out"]);
        let b = add_node(&mut g, &[], &["out"]);
        let sink = add_node(&mut g, &["in"], &[]);
        let sink_in = PortRef::input(sink, "in");
        connect(&mut g, &PortRef::output(a, "out"), &sink_in);

        let delta = plan_connect(&g, &PortRef::output(b, "out"), &sink_in).unwrap();
        assert_eq!(delta.disconnected, vec![(PortRef::output(a, "out"), sink_in.clone())]);
        apply(&mut g, &delta);

        let port = g.port(&sink_in).unwrap();
        assert_eq!(port.connected_count(), 1);
        assert!(port.is_connected_to(b, "out"));
        assert!(!g.port(&PortRef::output(a, "out")).unwrap().is_connected());
    }

    #[test]
    fn test_revert_restores_evicted_peer() {
        let mut g = graph();
        let a = add_node(&mut g, &[], &["out"]);
        let b = add_node(&mut g, &[], &["out"]);
        let sink = add_node(&mut g, &["in"], &[]);
        let sink_in = PortRef::input(sink, "in");
        connect(&mut g, &PortRef::output(a, "out"), &sink_in);

        let delta = plan_connect(&g, &PortRef::output(b, "out"), &sink_in).unwrap();
        apply(&mut g, &delta);
        revert(&mut g, &delta);

        let port = g.port(&sink_in).unwrap();
        assert_eq!(port.connected_count(), 1);
        assert!(port.is_connected_to(a, "out"));
        assert!(!g.port(&PortRef::output(b, "out")).unwrap().is_connected());
    }

    #[test]
    fn test_locked_port_rejects_connect_and_disconnect() {
        let mut g = graph();
        let src = add_node(&mut g, &[], &["out"]);
        let dst = add_node(&mut g, &["in"], &[]);
        let out = PortRef::output(src, "out");
        let inp = PortRef::input(dst, "in");
        connect(&mut g, &out, &inp);

        g.port_mut(&inp).unwrap().locked = true;
        assert_eq!(plan_disconnect(&g, &out, &inp), Err(PortError::Locked(inp.clone())));
        let other = add_node(&mut g, &[], &["out"]);
        assert_eq!(
            plan_connect(&g, &PortRef::output(other, "out"), &inp),
            Err(PortError::Locked(inp.clone()))
        );
    }

    #[test]
    fn test_same_port_and_same_direction_rejected() {
        let mut g = graph();
        let n = add_node(&mut g, &["a", "b"], &["out"]);
        let a = PortRef::input(n, "a");
        assert_eq!(plan_connect(&g, &a, &a), Err(PortError::SamePort(a.clone())));
        assert!(matches!(
            plan_connect(&g, &a, &PortRef::input(n, "b")),
            Err(PortError::SameNodeDirection { .. })
        ));
    }

    #[test]
    fn test_already_connected_rejected() {
        let mut g = graph();
        let src = add_node(&mut g, &[], &["out"]);
        let dst = add_node(&mut g, &["in"], &[]);
        let out = PortRef::output(src, "out");
        let inp = PortRef::input(dst, "in");
        connect(&mut g, &out, &inp);
        assert!(matches!(
            plan_connect(&g, &out, &inp),
            Err(PortError::AlreadyConnected { .. })
        ));
        // Same result when asked from the other side.
        assert!(matches!(
            plan_connect(&g, &inp, &out),
            Err(PortError::AlreadyConnected { .. })
        ));
    }

    #[test]
    fn test_cycle_rejected_when_acyclic() {
        let mut g = graph();
        let a = add_node(&mut g, &["in"], &["out"]);
        let b = add_node(&mut g, &["in"], &["out"]);
        let c = add_node(&mut g, &["in"], &["out"]);
        connect(&mut g, &PortRef::output(a, "out"), &PortRef::input(b, "in"));
        connect(&mut g, &PortRef::output(b, "out"), &PortRef::input(c, "in"));

        let err = plan_connect(&g, &PortRef::output(c, "out"), &PortRef::input(a, "in"));
        assert!(matches!(err, Err(PortError::WouldCycle { .. })));

        // Self-loop counts as a cycle too.
        assert!(matches!(
            plan_connect(&g, &PortRef::output(a, "out"), &PortRef::input(a, "in")),
            Err(PortError::WouldCycle { .. })
        ));
    }

    #[test]
    fn test_cycle_allowed_when_acyclic_disabled() {
        let mut g = graph();
        g.acyclic = false;
        let a = add_node(&mut g, &["in"], &["out"]);
        let b = add_node(&mut g, &["in"], &["out"]);
        connect(&mut g, &PortRef::output(a, "out"), &PortRef::input(b, "in"));
        let delta = plan_connect(&g, &PortRef::output(b, "out"), &PortRef::input(a, "in"));
        assert!(delta.is_ok());
    }

    #[test]
    fn test_same_direction_links_do_not_extend_reachability() {
        let mut g = graph();
        let a = add_node(&mut g, &["in"], &["out"]);
        let b = add_node(&mut g, &["in"], &["out"]);
        // Cross-node input-to-input link is tolerated by the protocol.
        let delta = plan_connect(&g, &PortRef::input(a, "in"), &PortRef::input(b, "in")).unwrap();
        apply(&mut g, &delta);
        // It must not make b "downstream" of a for cycle purposes.
        let ok = plan_connect(&g, &PortRef::output(b, "out"), &PortRef::input(a, "in"));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_disconnect_unconnected_is_empty_delta() {
        let mut g = graph();
        let src = add_node(&mut g, &[], &["out"]);
        let dst = add_node(&mut g, &["in"], &[]);
        let delta =
            plan_disconnect(&g, &PortRef::output(src, "out"), &PortRef::input(dst, "in")).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_clear_fails_on_locked_peer() {
        let mut g = graph();
        let src = add_node(&mut g, &[], &["out"]);
        let d1 = add_node(&mut g, &["in"], &[]);
        let d2 = add_node(&mut g, &["in"], &[]);
        let out = PortRef::output(src, "out");
        connect(&mut g, &out, &PortRef::input(d1, "in"));
        connect(&mut g, &out, &PortRef::input(d2, "in"));

        g.port_mut(&PortRef::input(d2, "in")).unwrap().locked = true;
        assert_eq!(plan_clear(&g, &out), Err(PortError::Locked(PortRef::input(d2, "in"))));

        g.port_mut(&PortRef::input(d2, "in")).unwrap().locked = false;
        let delta = plan_clear(&g, &out).unwrap();
        assert_eq!(delta.disconnected.len(), 2);
    }

    #[test]
    fn test_unknown_port_error() {
        let g = graph();
        let ghost = PortRef::output(NodeId::new(), "out");
        assert!(matches!(
            plan_connect(&g, &ghost, &ghost),
            Err(PortError::UnknownPort(_))
        ));
    }

    #[test]
    fn test_incident_pairs_and_sever_node() {
        let mut g = graph();
        let src = add_node(&mut g, &[], &["out"]);
        let mid = add_node(&mut g, &["in"], &["out"]);
        let dst = add_node(&mut g, &["in"], &[]);
        connect(&mut g, &PortRef::output(src, "out"), &PortRef::input(mid, "in"));
        connect(&mut g, &PortRef::output(mid, "out"), &PortRef::input(dst, "in"));

        let pairs = incident_pairs(&g, mid);
        assert_eq!(pairs.len(), 2);

        let delta = sever_node(&mut g, mid);
        assert_eq!(delta.disconnected.len(), 2);
        assert!(!g.port(&PortRef::output(src, "out")).unwrap().is_connected());
        assert!(!g.port(&PortRef::input(dst, "in")).unwrap().is_connected());
    }

    #[test]
    fn test_lock_targets_cascade() {
        let mut g = graph();
        let src = add_node(&mut g, &[], &["out"]);
        let dst = add_node(&mut g, &["in"], &[]);
        let out = PortRef::output(src, "out");
        let inp = PortRef::input(dst, "in");
        connect(&mut g, &out, &inp);

        let targets = lock_targets(&g, &out, true);
        assert_eq!(targets.len(), 2);
        set_lock_state(&mut g, &targets, true);
        assert!(g.port(&out).unwrap().locked);
        assert!(g.port(&inp).unwrap().locked);

        restore_lock_state(&mut g, &targets);
        assert!(!g.port(&out).unwrap().locked);
        assert!(!g.port(&inp).unwrap().locked);
    }
}
