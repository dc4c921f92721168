// SPDX-License-Identifier: MIT OR Apache-2.0
//! Event bus: explicit observer registration instead of signal wiring.
//!
//! Commands emit a [`GraphEvent`] after every core mutation, including
//! replays during undo and redo, so views never need to diff the model.
//! Delivery is synchronous and fire-and-forget.

use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use patchbay_graph::{NodeId, PortRef, PropertyValue};

/// Notification payload describing one core mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// Connection adjacency changed: pairs severed and pairs attached,
    /// in application order.
    ConnectionsChanged {
        /// Pairs that were severed
        disconnected: Vec<(PortRef, PortRef)>,
        /// Pairs that were attached
        connected: Vec<(PortRef, PortRef)>,
    },
    /// Selection changed: ids that became selected and deselected.
    SelectionChanged {
        /// Newly selected node ids
        selected: Vec<NodeId>,
        /// Newly deselected node ids
        deselected: Vec<NodeId>,
    },
    /// Nodes moved; the map carries each node's position before the move.
    NodesMoved {
        /// Node id -> position prior to the move
        previous: IndexMap<NodeId, [f32; 2]>,
    },
    /// A reserved or custom property changed value.
    PropertyChanged {
        /// Owning node
        node: NodeId,
        /// Property name
        name: String,
        /// Value before the change
        old: PropertyValue,
        /// Value after the change
        new: PropertyValue,
    },
}

/// Handle identifying one subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Synchronous single-threaded event dispatch.
///
/// Subscribers are invoked in subscription order. Handlers may subscribe
/// or unsubscribe re-entrantly; changes take effect from the next emit.
#[derive(Default)]
pub struct EventBus {
    subscribers: RefCell<IndexMap<u64, Rc<dyn Fn(&GraphEvent)>>>,
    next_id: Cell<u64>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every subsequent emit.
    pub fn subscribe(&self, callback: impl Fn(&GraphEvent) + 'static) -> SubscriberId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.subscribers.borrow_mut().insert(id, Rc::new(callback));
        SubscriberId(id)
    }

    /// Remove a subscription. Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.borrow_mut().shift_remove(&id.0).is_some()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Deliver an event to every subscriber registered before this call.
    pub fn emit(&self, event: &GraphEvent) {
        let handlers: Vec<Rc<dyn Fn(&GraphEvent)>> =
            self.subscribers.borrow().values().cloned().collect();
        for handler in handlers {
            handler(event);
        }
    }
}
