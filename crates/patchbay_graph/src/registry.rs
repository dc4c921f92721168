// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node type registry: templates, aliases, and instantiation.
//!
//! Nodes are not subclassed; a [`NodeTemplate`] declares ports, default
//! properties and a [`NodeKind`], and the registry stamps entities from
//! it. Graphs receive their registry by injection so tests and tools can
//! assemble their own palette.

use indexmap::IndexMap;
use thiserror::Error;

use crate::node::{NodeEntity, NodeKind, TypeKey};
use crate::port::{Port, PortDirection};
use crate::property::Property;

/// Namespace of the built-in structural node types.
pub const GRAPH_NAMESPACE: &str = "patchbay.graph";
/// Namespace of the built-in subgraph boundary proxies.
pub const PORTS_NAMESPACE: &str = "patchbay.ports";

/// Errors raised while registering node types.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassRegisterError {
    /// Type key already registered
    #[error("node type '{0}' is already registered")]
    Duplicate(TypeKey),
    /// Alias already registered
    #[error("alias '{0}' is already registered")]
    DuplicateAlias(String),
    /// Identifier missing its namespace part
    #[error("node type '{0}' has no namespace")]
    MissingNamespace(String),
    /// Alias target was never registered
    #[error("alias target '{0}' is not registered")]
    UnknownType(TypeKey),
    /// Template declares conflicting ports
    #[error("template '{key}' is invalid: {reason}")]
    InvalidTemplate {
        /// Offending template
        key: TypeKey,
        /// What is wrong with it
        reason: String,
    },
}

/// Port declaration inside a template.
#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    /// Port name, unique per direction
    pub name: String,
    /// Whether the port accepts multiple connections
    pub multi_connection: bool,
    /// Initial visibility
    pub visible: bool,
}

impl PortSpec {
    /// Create a visible port spec.
    pub fn new(name: impl Into<String>, multi_connection: bool) -> Self {
        Self {
            name: name.into(),
            multi_connection,
            visible: true,
        }
    }

    /// Hide the port initially.
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Declaration of a node type: identity, ports, default properties.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTemplate {
    /// Fully qualified type key
    pub type_key: TypeKey,
    /// Default display label
    pub label: String,
    /// Behavioral role of instances
    pub kind: NodeKind,
    /// Input port declarations, in display order
    pub inputs: Vec<PortSpec>,
    /// Output port declarations, in display order
    pub outputs: Vec<PortSpec>,
    /// Custom properties stamped onto instances
    pub properties: Vec<(String, Property)>,
    /// Whether ports may later be removed from instances
    pub port_removal_allowed: bool,
}

impl NodeTemplate {
    /// Create a template; the label defaults to the class name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let type_key = TypeKey::new(namespace, name);
        let label = type_key.name.clone();
        Self {
            type_key,
            label,
            kind: NodeKind::Basic,
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: Vec::new(),
            port_removal_allowed: false,
        }
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the node kind.
    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Declare an input port.
    pub fn with_input(mut self, spec: PortSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    /// Declare an output port.
    pub fn with_output(mut self, spec: PortSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// Declare a default custom property.
    pub fn with_property(mut self, name: impl Into<String>, property: Property) -> Self {
        self.properties.push((name.into(), property));
        self
    }

    /// Allow removing ports from instances.
    pub fn allow_port_removal(mut self) -> Self {
        self.port_removal_allowed = true;
        self
    }

    fn duplicate_port_name(&self) -> Option<&str> {
        for specs in [&self.inputs, &self.outputs] {
            for (i, spec) in specs.iter().enumerate() {
                if specs[..i].iter().any(|other| other.name == spec.name) {
                    return Some(&spec.name);
                }
            }
        }
        None
    }

    /// Stamp a fresh entity from this template.
    pub fn instantiate(&self) -> NodeEntity {
        let mut node = NodeEntity::new(self.type_key.clone(), self.kind.clone(), &self.label);
        node.port_removal_allowed = self.port_removal_allowed;
        for spec in &self.inputs {
            let port = Port::new(PortDirection::In, &spec.name)
                .with_multi_connection(spec.multi_connection)
                .with_visible(spec.visible);
            // Names were validated at registration.
            let _ = node.add_port(port);
        }
        for spec in &self.outputs {
            let port = Port::new(PortDirection::Out, &spec.name)
                .with_multi_connection(spec.multi_connection)
                .with_visible(spec.visible);
            let _ = node.add_port(port);
        }
        for (name, property) in &self.properties {
            node.declare_property(name, property.clone());
        }
        node
    }
}

/// Registry of node templates keyed by type, with string aliases.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    templates: IndexMap<TypeKey, NodeTemplate>,
    aliases: IndexMap<String, TypeKey>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            templates: IndexMap::new(),
            aliases: IndexMap::new(),
        }
    }

    /// Registry pre-seeded with the built-in structural types: backdrop,
    /// group, and the two subgraph boundary proxies.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let defaults = [
            NodeTemplate::new(GRAPH_NAMESPACE, "Backdrop").with_kind(NodeKind::Backdrop),
            NodeTemplate::new(GRAPH_NAMESPACE, "Group")
                .with_kind(NodeKind::Group)
                .allow_port_removal(),
            NodeTemplate::new(PORTS_NAMESPACE, "PortInput")
                .with_kind(NodeKind::PortInput { port: String::new() }),
            NodeTemplate::new(PORTS_NAMESPACE, "PortOutput")
                .with_kind(NodeKind::PortOutput { port: String::new() }),
        ];
        for template in defaults {
            registry
                .register(template)
                .expect("builtin templates are unique");
        }
        registry
    }

    /// Register a template.
    pub fn register(&mut self, template: NodeTemplate) -> Result<(), ClassRegisterError> {
        if template.type_key.namespace.is_empty() {
            return Err(ClassRegisterError::MissingNamespace(
                template.type_key.name.clone(),
            ));
        }
        if self.templates.contains_key(&template.type_key) {
            return Err(ClassRegisterError::Duplicate(template.type_key.clone()));
        }
        if let Some(name) = template.duplicate_port_name() {
            return Err(ClassRegisterError::InvalidTemplate {
                key: template.type_key.clone(),
                reason: format!("duplicate port name '{name}'"),
            });
        }
        self.templates.insert(template.type_key.clone(), template);
        Ok(())
    }

    /// Register a template under an additional short alias.
    pub fn register_as(
        &mut self,
        template: NodeTemplate,
        alias: impl Into<String>,
    ) -> Result<(), ClassRegisterError> {
        let key = template.type_key.clone();
        self.register(template)?;
        self.register_alias(alias, &key)
    }

    /// Map a short alias to an already registered type.
    pub fn register_alias(
        &mut self,
        alias: impl Into<String>,
        key: &TypeKey,
    ) -> Result<(), ClassRegisterError> {
        let alias = alias.into();
        if !self.templates.contains_key(key) {
            return Err(ClassRegisterError::UnknownType(key.clone()));
        }
        if self.aliases.contains_key(&alias) {
            return Err(ClassRegisterError::DuplicateAlias(alias));
        }
        self.aliases.insert(alias, key.clone());
        Ok(())
    }

    /// Whether a type is registered.
    pub fn contains(&self, key: &TypeKey) -> bool {
        self.templates.contains_key(key)
    }

    /// Get a template by type key
    pub fn template(&self, key: &TypeKey) -> Option<&NodeTemplate> {
        self.templates.get(key)
    }

    /// All registered templates, in registration order
    pub fn templates(&self) -> impl Iterator<Item = &NodeTemplate> {
        self.templates.values()
    }

    /// Resolve an alias or qualified identifier to a registered key.
    pub fn resolve(&self, identifier: &str) -> Option<TypeKey> {
        if let Some(key) = self.aliases.get(identifier) {
            return Some(key.clone());
        }
        let key = TypeKey::parse(identifier)?;
        self.contains(&key).then_some(key)
    }

    /// Stamp a fresh entity, or `None` when the type is unknown. Callers
    /// surface the creation error themselves.
    pub fn create(&self, key: &TypeKey) -> Option<NodeEntity> {
        self.templates.get(key).map(NodeTemplate::instantiate)
    }

    /// Stamp a fresh entity from an alias or qualified identifier.
    pub fn create_by_name(&self, identifier: &str) -> Option<NodeEntity> {
        self.create(&self.resolve(identifier)?)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
