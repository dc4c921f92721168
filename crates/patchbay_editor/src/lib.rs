// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editor core for Patchbay.
//!
//! Everything interactive lives here, on top of the data model in
//! `patchbay_graph`:
//! - Command objects and an undo stack with macro grouping
//! - An event bus views subscribe to
//! - A pointer gesture machine over an abstract hit-testing surface
//! - Live sessions for expanded group nodes
//!
//! ## Architecture
//!
//! Mutations flow one way: a caller (or a finished gesture) builds a
//! [`GraphCommand`], the [`CommandStack`] applies it and keeps it for
//! undo, and the command reports what changed through the [`EventBus`].
//! [`EditorState`] wires these pieces together for one open document and
//! is the API a frontend embeds; rendering and real input remain the
//! frontend's job, abstracted behind the [`HitTest`] trait.

pub mod commands;
pub mod events;
pub mod history;
pub mod interaction;
pub mod state;
pub mod subgraph;

pub use commands::{
    AddNodeCmd, ConnectCmd, DisconnectCmd, GraphCommand, LockPortCmd, MoveNodeCmd,
    PortVisibilityCmd, RemoveNodeCmd, ResizeNodeCmd, SetPropertyCmd,
};
pub use events::{EventBus, GraphEvent, SubscriberId};
pub use history::{CommandStack, HistoryError};
pub use hit_test::{HitTest, NullHitTest, SceneItem, SceneItemKind};
pub use interaction::{
    InteractionController, InteractionState, Modifiers, PointerButton, SelectMode, Viewport,
};
pub use state::{EditorError, EditorState};
pub use subgraph::{SubgraphError, SubgraphManager, SubgraphSession};
