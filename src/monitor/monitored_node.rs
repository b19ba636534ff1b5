//! Per-node fan-out of value changes and events to monitored items.

use std::sync::Arc;

use crate::address_space::NodeIdx;
use crate::attributes::AttributeId;
use crate::node::Node;
use crate::value::DataValue;

use super::item::{MonitoredItem, MonitoredItemId};

/// Items attached to one node. Exists only while at least one item is
/// attached; the store removes it when it becomes empty.
#[derive(Debug)]
pub(crate) struct MonitoredNode {
    pub(crate) node: NodeIdx,
    data_items: Vec<Arc<MonitoredItem>>,
    event_items: Vec<Arc<MonitoredItem>>,
}

impl MonitoredNode {
    pub(crate) const fn new(node: NodeIdx) -> Self {
        Self {
            node,
            data_items: Vec::new(),
            event_items: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, item: Arc<MonitoredItem>) {
        let list = if item.is_event_item() {
            &mut self.event_items
        } else {
            &mut self.data_items
        };
        if !list.iter().any(|i| i.id() == item.id()) {
            list.push(item);
        }
    }

    /// Detaches an item. Returns true if it was attached.
    pub(crate) fn remove(&mut self, id: MonitoredItemId) -> bool {
        let before = self.data_items.len() + self.event_items.len();
        self.data_items.retain(|i| i.id() != id);
        self.event_items.retain(|i| i.id() != id);
        before != self.data_items.len() + self.event_items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data_items.is_empty() && self.event_items.is_empty()
    }

    pub(crate) fn event_items(&self) -> &[Arc<MonitoredItem>] {
        &self.event_items
    }

    pub(crate) fn data_items(&self) -> &[Arc<MonitoredItem>] {
        &self.data_items
    }

    /// Samples `node` into every data item.
    pub(crate) fn on_value_changed(&self, node: &Node) {
        for item in &self.data_items {
            sample_into(item, node, false);
        }
    }

    /// Flags Value items as semantics-changed and re-samples them.
    pub(crate) fn on_semantics_changed(&self, node: &Node) {
        for item in &self.data_items {
            if item.attribute_id() == AttributeId::Value {
                item.set_semantics_changed();
                sample_into(item, node, true);
            }
        }
    }
}

/// Reads the item's attribute from `node` and queues the result.
pub(crate) fn sample_into(item: &MonitoredItem, node: &Node, bypass_filter: bool) {
    match node.read_attribute(item.attribute_id(), item.index_range(), item.data_encoding()) {
        Ok(value) => item.queue_value(&value, None, bypass_filter),
        Err(status) => item.queue_value(&DataValue::from_status(status), Some(status), bypass_filter),
    }
}
