// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node entities, type keys and node kinds.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::connection::PortError;
use crate::port::{Port, PortDirection};
use crate::property::{Property, PropertyValue};
use crate::session::SessionData;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified node type: namespace plus class name.
///
/// Rendered as `namespace.Name`, e.g. `patchbay.graph.Backdrop`. The
/// namespace may itself contain dots; the class name is the segment after
/// the last dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeKey {
    /// Dotted namespace, never empty
    pub namespace: String,
    /// Class name within the namespace
    pub name: String,
}

impl TypeKey {
    /// Create a type key from namespace and class name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a dotted identifier. Returns `None` when the namespace part
    /// is missing.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (namespace, name) = qualified.rsplit_once('.')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl Serialize for TypeKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("type key '{raw}' has no namespace")))
    }
}

/// Behavioral role of a node.
///
/// Composition over inheritance: one entity struct, with the role carried
/// as data. Group nodes own a serialized subgraph; boundary proxies name
/// the group port they mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Ordinary node
    Basic,
    /// Resizable visual grouping region, no ports
    Backdrop,
    /// Node wrapping a nested subgraph
    Group,
    /// Boundary proxy inside a subgraph, mirrors a group input port
    PortInput {
        /// Mirrored group port name
        port: String,
    },
    /// Boundary proxy inside a subgraph, mirrors a group output port
    PortOutput {
        /// Mirrored group port name
        port: String,
    },
}

impl NodeKind {
    /// Whether this is a subgraph boundary proxy.
    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::PortInput { .. } | Self::PortOutput { .. })
    }

    /// Whether this node wraps a nested subgraph.
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group)
    }

    /// Group port name mirrored by a proxy.
    pub fn proxy_port(&self) -> Option<&str> {
        match self {
            Self::PortInput { port } | Self::PortOutput { port } => Some(port),
            _ => None,
        }
    }

    /// Default visual size for the kind.
    pub fn default_size(&self) -> [f32; 2] {
        match self {
            Self::Backdrop => [400.0, 260.0],
            _ => [160.0, 80.0],
        }
    }
}

impl Default for NodeKind {
    fn default() -> Self {
        Self::Basic
    }
}

/// Flow orientation of a node's port layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayoutDirection {
    /// Inputs left, outputs right
    #[default]
    Horizontal,
    /// Inputs top, outputs bottom
    Vertical,
}

/// Property names routed to typed entity fields instead of the custom map.
pub const RESERVED_PROPERTIES: [&str; 3] = ["label", "disabled", "visible"];

/// A node instance in the graph.
///
/// Ports live in insertion-ordered maps keyed by name; names are unique
/// per direction. Custom properties are a typed map; the reserved names
/// in [`RESERVED_PROPERTIES`] route to the entity fields so that property
/// commands cover them uniformly.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntity {
    /// Unique instance ID
    pub id: NodeId,
    /// Registered type this node was created from
    pub type_key: TypeKey,
    /// Behavioral role
    pub kind: NodeKind,
    /// Display label
    pub label: String,
    /// Scene position of the top-left corner
    pub position: [f32; 2],
    /// Scene size
    pub size: [f32; 2],
    /// Disabled nodes are skipped by downstream evaluation
    pub disabled: bool,
    /// Selection flag
    pub selected: bool,
    /// Whether views draw the node
    pub visible: bool,
    /// Port layout orientation
    pub layout: LayoutDirection,
    /// Whether ports may be removed from this node
    pub port_removal_allowed: bool,
    /// Serialized nested graph, for group nodes while collapsed
    pub subgraph: Option<SessionData>,
    inputs: IndexMap<String, Port>,
    outputs: IndexMap<String, Port>,
    custom: IndexMap<String, Property>,
}

impl NodeEntity {
    /// Create a node with no ports and default attributes.
    pub fn new(type_key: TypeKey, kind: NodeKind, label: impl Into<String>) -> Self {
        let size = kind.default_size();
        Self {
            id: NodeId::new(),
            type_key,
            kind,
            label: label.into(),
            position: [0.0, 0.0],
            size,
            disabled: false,
            selected: false,
            visible: true,
            layout: LayoutDirection::default(),
            port_removal_allowed: false,
            subgraph: None,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            custom: IndexMap::new(),
        }
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }

    /// Set the size
    pub fn with_size(mut self, w: f32, h: f32) -> Self {
        self.size = [w, h];
        self
    }

    /// Whether this node is a subgraph boundary proxy.
    pub fn is_proxy(&self) -> bool {
        self.kind.is_proxy()
    }

    /// Axis-aligned bounds as (min, max) corners.
    pub fn rect(&self) -> ([f32; 2], [f32; 2]) {
        (
            self.position,
            [
                self.position[0] + self.size[0],
                self.position[1] + self.size[1],
            ],
        )
    }

    /// Add a port. Fails on a duplicate name in the same direction, and
    /// on proxies, which expose exactly the one port they mirror.
    pub fn add_port(&mut self, port: Port) -> Result<&mut Port, PortError> {
        if self.is_proxy() && self.inputs.len() + self.outputs.len() >= 1 {
            return Err(PortError::ProxyPortFixed(self.id));
        }
        let map = match port.direction {
            PortDirection::In => &mut self.inputs,
            PortDirection::Out => &mut self.outputs,
        };
        if map.contains_key(&port.name) {
            return Err(PortError::NameTaken {
                node: self.id,
                name: port.name.clone(),
            });
        }
        let name = port.name.clone();
        Ok(map.entry(name).or_insert(port))
    }

    /// Add an input port by name.
    pub fn add_input(&mut self, name: impl Into<String>, multi: bool) -> Result<&mut Port, PortError> {
        self.add_port(Port::new(PortDirection::In, name).with_multi_connection(multi))
    }

    /// Add an output port by name.
    pub fn add_output(&mut self, name: impl Into<String>, multi: bool) -> Result<&mut Port, PortError> {
        self.add_port(Port::new(PortDirection::Out, name).with_multi_connection(multi))
    }

    /// Get an input port by name
    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.get(name)
    }

    /// Get an output port by name
    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.get(name)
    }

    /// Get a port by direction and name
    pub fn port(&self, direction: PortDirection, name: &str) -> Option<&Port> {
        match direction {
            PortDirection::In => self.inputs.get(name),
            PortDirection::Out => self.outputs.get(name),
        }
    }

    /// Get a mutable port by direction and name
    pub fn port_mut(&mut self, direction: PortDirection, name: &str) -> Option<&mut Port> {
        match direction {
            PortDirection::In => self.inputs.get_mut(name),
            PortDirection::Out => self.outputs.get_mut(name),
        }
    }

    /// Input ports in declaration order
    pub fn inputs(&self) -> impl Iterator<Item = &Port> {
        self.inputs.values()
    }

    /// Output ports in declaration order
    pub fn outputs(&self) -> impl Iterator<Item = &Port> {
        self.outputs.values()
    }

    /// All ports, inputs first
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.inputs.values().chain(self.outputs.values())
    }

    /// First visible input port, the landing side for pipe insertion.
    pub fn first_visible_input(&self) -> Option<&Port> {
        self.inputs.values().find(|p| p.visible)
    }

    /// First visible output port, the departing side for pipe insertion.
    pub fn first_visible_output(&self) -> Option<&Port> {
        self.outputs.values().find(|p| p.visible)
    }

    pub(crate) fn take_port(&mut self, direction: PortDirection, name: &str) -> Option<Port> {
        match direction {
            PortDirection::In => self.inputs.shift_remove(name),
            PortDirection::Out => self.outputs.shift_remove(name),
        }
    }

    /// Declare a custom property. Returns false when the name collides
    /// with a reserved or existing property.
    pub fn declare_property(&mut self, name: impl Into<String>, property: Property) -> bool {
        let name = name.into();
        if RESERVED_PROPERTIES.contains(&name.as_str()) || self.custom.contains_key(&name) {
            return false;
        }
        self.custom.insert(name, property);
        true
    }

    /// Get a custom property by name
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.custom.get(name)
    }

    /// Custom properties in declaration order
    pub fn properties(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.custom.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether `name` is a reserved or declared property on this node.
    pub fn has_property(&self, name: &str) -> bool {
        RESERVED_PROPERTIES.contains(&name) || self.custom.contains_key(name)
    }

    /// Current value of a reserved or custom property.
    pub fn property_value(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "label" => Some(PropertyValue::Text(self.label.clone())),
            "disabled" => Some(PropertyValue::Bool(self.disabled)),
            "visible" => Some(PropertyValue::Bool(self.visible)),
            _ => self.custom.get(name).map(|p| p.value.clone()),
        }
    }

    /// Set a reserved or custom property, returning the old value.
    /// Returns `None` when the name is unknown or the value does not fit
    /// the reserved field; nothing is changed in that case.
    pub fn set_property_value(&mut self, name: &str, value: PropertyValue) -> Option<PropertyValue> {
        match name {
            "label" => {
                let PropertyValue::Text(text) = value else {
                    return None;
                };
                let old = std::mem::replace(&mut self.label, text);
                Some(PropertyValue::Text(old))
            }
            "disabled" => {
                let flag = value.as_bool()?;
                let old = std::mem::replace(&mut self.disabled, flag);
                Some(PropertyValue::Bool(old))
            }
            "visible" => {
                let flag = value.as_bool()?;
                let old = std::mem::replace(&mut self.visible, flag);
                Some(PropertyValue::Bool(old))
            }
            _ => {
                let slot = self.custom.get_mut(name)?;
                Some(std::mem::replace(&mut slot.value, value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_node() -> NodeEntity {
        NodeEntity::new(TypeKey::new("test.nodes", "Basic"), NodeKind::Basic, "basic")
    }

    #[test]
    fn test_type_key_parse() {
        let key = TypeKey::parse("patchbay.graph.Backdrop").unwrap();
        assert_eq!(key.namespace, "patchbay.graph");
        assert_eq!(key.name, "Backdrop");
        assert_eq!(key.to_string(), "patchbay.graph.Backdrop");

        assert!(TypeKey::parse("NoNamespace").is_none());
        assert!(TypeKey::parse(".Leading").is_none());
        assert!(TypeKey::parse("trailing.").is_none());
    }

    #[test]
    fn test_duplicate_port_name_rejected() {
        let mut node = basic_node();
        node.add_input("in", false).unwrap();
        let err = node.add_input("in", true).unwrap_err();
        assert!(matches!(err, PortError::NameTaken { .. }));
        // Same name on the other direction is fine.
        assert!(node.add_output("in", false).is_ok());
    }

    #[test]
    fn test_proxy_single_port() {
        let mut proxy = NodeEntity::new(
            TypeKey::new("patchbay.ports", "PortInput"),
            NodeKind::PortInput { port: "a".into() },
            "a",
        );
        proxy.add_output("a", true).unwrap();
        let err = proxy.add_output("b", true).unwrap_err();
        assert!(matches!(err, PortError::ProxyPortFixed(_)));
    }

    #[test]
    fn test_reserved_property_routing() {
        let mut node = basic_node();
        let old = node
            .set_property_value("label", PropertyValue::Text("renamed".into()))
            .unwrap();
        assert_eq!(old, PropertyValue::Text("basic".into()));
        assert_eq!(node.label, "renamed");

        // Type mismatch leaves the field untouched.
        assert!(node.set_property_value("disabled", PropertyValue::Number(1.0)).is_none());
        assert!(!node.disabled);
    }

    #[test]
    fn test_custom_property_set_get() {
        let mut node = basic_node();
        assert!(node.declare_property("gain", Property::number(1.0)));
        assert!(!node.declare_property("gain", Property::number(2.0)));
        assert!(!node.declare_property("label", Property::text("x")));

        let old = node
            .set_property_value("gain", PropertyValue::Number(0.25))
            .unwrap();
        assert_eq!(old, PropertyValue::Number(1.0));
        assert_eq!(node.property_value("gain"), Some(PropertyValue::Number(0.25)));
        assert!(node.set_property_value("missing", PropertyValue::Number(0.0)).is_none());
    }

    #[test]
    fn test_rect() {
        let node = basic_node().with_position(10.0, 20.0).with_size(100.0, 50.0);
        let (min, max) = node.rect();
        assert_eq!(min, [10.0, 20.0]);
        assert_eq!(max, [110.0, 70.0]);
    }
}
