// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node graph data model for Patchbay.
//!
//! This crate is the headless core of the editor:
//! - Node entities with typed ports and properties
//! - A registry of instantiable node types
//! - Connection validation and delta replay
//! - Serializable session snapshots, recursive over group nodes
//!
//! ## Architecture
//!
//! The model is an arena of [`NodeEntity`] values keyed by stable
//! [`NodeId`]s. Port adjacency is mirrored on both endpoints and only the
//! [`connection`] module mutates it: callers plan a change, get back a
//! [`ConnectionDelta`], and replay it forwards or backwards. Undo, events
//! and interaction live in the editor crate on top of this one.

pub mod connection;
pub mod graph;
pub mod node;
pub mod port;
pub mod property;
pub mod registry;
pub mod session;

pub use connection::{ConnectionDelta, PortError};
pub use graph::{GraphModel, NodeCreationError, NodeDeletionError};
pub use node::{LayoutDirection, NodeEntity, NodeId, NodeKind, TypeKey};
pub use port::{Port, PortDirection, PortRef};
pub use property::{Property, PropertyMeta, PropertyValue, WidgetKind};
pub use registry::{ClassRegisterError, NodeRegistry, NodeTemplate, PortSpec};
pub use session::{GraphHeader, NodeData, PortData, SessionData, SessionError};
