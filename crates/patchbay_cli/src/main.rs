// SPDX-License-Identifier: MIT OR Apache-2.0
//! Patchbay - headless node-graph editor demo
//!
//! Drives the editor core without a frontend:
//! - builds a small audio-flavored type registry
//! - patches nodes together, evicting and undoing along the way
//! - expands a group node, wires its boundary proxies, collapses it
//! - saves the session to disk and restores it into a fresh editor
//! - registers one more node type at runtime and patches it in
//!
//! Pass `--session <path>` to choose where the session file lands.

use std::env;
use std::error::Error;
use std::path::{Path, PathBuf};

use patchbay_editor::{ConnectCmd, EditorState, GraphEvent};
use patchbay_graph::{
    connection, ClassRegisterError, NodeRegistry, NodeTemplate, PortDirection, PortRef, PortSpec,
    Property, PropertyValue, TypeKey,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("patchbay=info".parse().unwrap())
        .add_directive("patchbay_editor=debug".parse().unwrap());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Patchbay demo v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&session_path_from_args()) {
        tracing::error!("Demo failed: {e}");
        std::process::exit(1);
    }
}

/// Hand-rolled argument scan; the demo understands `--session <path>`.
fn session_path_from_args() -> PathBuf {
    let mut path = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--session" => path = args.next().map(PathBuf::from),
            other => tracing::warn!("Ignoring unknown argument: {other}"),
        }
    }
    path.unwrap_or_else(|| env::temp_dir().join("patchbay_session.json"))
}

/// Built-in types plus a few audio-flavored demo nodes.
fn demo_registry() -> Result<NodeRegistry, ClassRegisterError> {
    let mut registry = NodeRegistry::builtin();
    registry.register(
        NodeTemplate::new("audio.gen", "Oscillator")
            .with_output(PortSpec::new("out", true))
            .with_property("freq", Property::number(440.0).with_range(20.0, 20000.0)),
    )?;
    registry.register(
        NodeTemplate::new("audio.fx", "Delay")
            .with_input(PortSpec::new("in", false))
            .with_output(PortSpec::new("out", true))
            .with_property("time", Property::number(0.25).with_range(0.0, 2.0)),
    )?;
    registry.register(
        NodeTemplate::new("audio.io", "MainOut").with_input(PortSpec::new("in", true)),
    )?;
    Ok(registry)
}

/// Mirror every bus event into the log.
fn log_events(state: &EditorState) {
    state.events.subscribe(|event| match event {
        GraphEvent::ConnectionsChanged {
            disconnected,
            connected,
        } => {
            for (a, b) in disconnected {
                tracing::info!("Severed  {a} -x- {b}");
            }
            for (a, b) in connected {
                tracing::info!("Attached {a} --> {b}");
            }
        }
        GraphEvent::SelectionChanged {
            selected,
            deselected,
        } => {
            tracing::info!(
                "Selection changed: {} in, {} out",
                selected.len(),
                deselected.len()
            );
        }
        GraphEvent::NodesMoved { previous } => {
            tracing::info!("Moved {} node(s)", previous.len());
        }
        GraphEvent::PropertyChanged {
            node, name, new, ..
        } => {
            tracing::info!("Property '{name}' on {node} is now {new:?}");
        }
    });
}

fn run(session_path: &Path) -> Result<(), Box<dyn Error>> {
    let mut state = EditorState::new(demo_registry()?);
    log_events(&state);

    let osc_key = TypeKey::new("audio.gen", "Oscillator");
    let delay_key = TypeKey::new("audio.fx", "Delay");

    // Base patch: two oscillators, a delay, a main out.
    let osc1 = state.create_node_at(&osc_key, [0.0, 0.0])?;
    let osc2 = state.create_node_at(&osc_key, [0.0, 160.0])?;
    let delay = state.create_node_at(&delay_key, [240.0, 60.0])?;
    let out = state.create_node_at(&TypeKey::new("audio.io", "MainOut"), [480.0, 60.0])?;

    state.connect(&PortRef::output(osc1, "out"), &PortRef::input(delay, "in"))?;
    state.connect(&PortRef::output(delay, "out"), &PortRef::input(out, "in"))?;

    // The delay input is single-connection: rewiring it evicts osc1 in
    // the same undo unit.
    state.connect(&PortRef::output(osc2, "out"), &PortRef::input(delay, "in"))?;
    tracing::info!("Undoing '{}'", state.undo()?);
    state.redo()?;

    state.set_property(delay, "time", PropertyValue::Number(0.5));

    // A group implemented by a nested delay, wired through its boundary
    // proxies while expanded.
    let group = state.create_node_at(&TypeKey::new("patchbay.graph", "Group"), [240.0, 300.0])?;
    state.add_group_port(group, PortDirection::In, "send", false)?;
    state.add_group_port(group, PortDirection::Out, "return", true)?;
    {
        let session = state.expand_group(group)?;
        let send = session
            .proxy_id(PortDirection::In, "send")
            .expect("proxies materialize on expand");
        let ret = session
            .proxy_id(PortDirection::Out, "return")
            .expect("proxies materialize on expand");
        let inner = session.graph.create_node(&delay_key)?;

        let delta = connection::plan_connect(
            &session.graph,
            &PortRef::output(send, "send"),
            &PortRef::input(inner, "in"),
        )?;
        session
            .history
            .push(&mut session.graph, &session.events, ConnectCmd::new(delta));
        let delta = connection::plan_connect(
            &session.graph,
            &PortRef::output(inner, "out"),
            &PortRef::input(ret, "return"),
        )?;
        session
            .history
            .push(&mut session.graph, &session.events, ConnectCmd::new(delta));
    }
    state.collapse_group(group)?;

    // The collapsed group patches in like any other node.
    state.connect(&PortRef::output(osc1, "out"), &PortRef::input(group, "send"))?;
    state.connect(&PortRef::output(group, "return"), &PortRef::input(out, "in"))?;
    state.set_selection(&[group]);

    state.save_session(session_path)?;

    let mut restored = EditorState::new(demo_registry()?);
    log_events(&restored);
    restored.load_session(session_path)?;
    tracing::info!(
        "Restored {} node(s); live editor holds {} undoable step(s)",
        restored.graph.node_count(),
        state.history.undo_depth()
    );

    // Types can join the registry while the editor is live.
    restored.graph.registry_mut().register(
        NodeTemplate::new("audio.fx", "Reverb")
            .with_input(PortSpec::new("in", false))
            .with_output(PortSpec::new("out", true))
            .with_property("mix", Property::number(0.3).with_range(0.0, 1.0)),
    )?;
    let reverb = restored.create_node_at(&TypeKey::new("audio.fx", "Reverb"), [480.0, 300.0])?;
    restored.connect(&PortRef::output(reverb, "out"), &PortRef::input(out, "in"))?;
    Ok(())
}
