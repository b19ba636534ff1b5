//! Event fan-out, event subscriptions and condition refresh.

use std::collections::HashSet;
use std::sync::Arc;

use crate::address_space::{NodeManager, StoreState};
use crate::attributes::EventNotifier;
use crate::context::{OperationContext, Permission};
use crate::error::{UaError, UaResult};
use crate::node_id::{ids, NodeId};
use crate::status::StatusCode;
use crate::value::Variant;

use super::events::{EventInstance, SharedEvent};
use super::item::MonitoredItem;
use super::monitored_node::MonitoredNode;

impl NodeManager {
    /// Raises an event on `source`.
    ///
    /// The event is offered to event items on the source, on every notifier
    /// it reports to and on the root notifiers. Each item receives it at most
    /// once. Condition events are retained per source for
    /// [`condition_refresh`](Self::condition_refresh) until their `Retain`
    /// field is false. Returns the number of items that were offered the
    /// event.
    pub fn report_event(&self, source: &NodeId, event: EventInstance) -> UaResult<usize> {
        let mut state = self.lock_state()?;
        let types = self.read_types()?;
        if state.find(source).is_none() {
            return Err(UaError::service(
                StatusCode::BAD_NODE_ID_UNKNOWN,
                format!("event source {source} not found"),
            ));
        }
        let event: SharedEvent = Arc::new(event);

        let mut targets = state.event_targets(source, &types);
        for root in &state.root_notifiers {
            if !targets.contains(root) {
                targets.push(root.clone());
            }
        }

        let mut offered = HashSet::new();
        for target in &targets {
            let Some(monitored) = state.monitored_nodes.get(target) else {
                continue;
            };
            for item in monitored.event_items() {
                if offered.insert(item.id()) {
                    item.queue_event(&event, false);
                }
            }
        }

        if types.is_type_of(&event.event_type, &ids::CONDITION_TYPE) {
            retain_condition(&mut state, source, &event);
        }
        tracing::trace!(
            source = %source,
            event_type = %event.event_type,
            items = offered.len(),
            "event reported"
        );
        Ok(offered.len())
    }

    /// Attaches (or with `unsubscribe` detaches) an event item to a notifier.
    pub fn subscribe_to_events(
        &self,
        ctx: &OperationContext,
        source: &NodeId,
        item: &Arc<MonitoredItem>,
        unsubscribe: bool,
    ) -> UaResult<StatusCode> {
        let mut state = self.lock_state()?;
        Ok(self.subscribe_locked(ctx, &mut state, source, item, unsubscribe))
    }

    /// Attaches (or detaches) an event item to every root notifier.
    pub fn subscribe_to_all_events(
        &self,
        ctx: &OperationContext,
        item: &Arc<MonitoredItem>,
        unsubscribe: bool,
    ) -> UaResult<StatusCode> {
        let mut state = self.lock_state()?;
        let roots = state.root_notifiers.clone();
        for root in &roots {
            let status = self.subscribe_locked(ctx, &mut state, root, item, unsubscribe);
            if status.is_bad() {
                tracing::warn!(notifier = %root, status = %status, "root notifier subscription failed");
            }
        }
        Ok(StatusCode::GOOD)
    }

    fn subscribe_locked(
        &self,
        ctx: &OperationContext,
        state: &mut StoreState,
        source: &NodeId,
        item: &Arc<MonitoredItem>,
        unsubscribe: bool,
    ) -> StatusCode {
        if !item.is_event_item() {
            return StatusCode::BAD_FILTER_NOT_ALLOWED;
        }
        let Some(idx) = state.find(source) else {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        };

        if unsubscribe {
            if let Some(monitored) = state.monitored_nodes.get_mut(source) {
                monitored.remove(item.id());
                if monitored.is_empty() {
                    state.monitored_nodes.remove(source);
                }
            }
            return StatusCode::GOOD;
        }

        let Some(node) = state.node(idx) else {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        };
        if !node.event_notifier().contains(EventNotifier::SUBSCRIBE_TO_EVENTS) {
            return StatusCode::BAD_NOT_SUPPORTED;
        }
        if !self.hooks.has_permission(ctx, node, Permission::ReceiveEvents) {
            return StatusCode::BAD_USER_ACCESS_DENIED;
        }
        state
            .monitored_nodes
            .entry(source.clone())
            .or_insert_with(|| MonitoredNode::new(idx))
            .add(Arc::clone(item));
        StatusCode::GOOD
    }

    /// Re-queues retained condition events to event items, bypassing their
    /// where clauses. An item receives the conditions of every notifier it
    /// is attached to.
    pub fn condition_refresh(&self, _ctx: &OperationContext, items: &[Arc<MonitoredItem>]) -> UaResult<()> {
        let state = self.lock_state()?;
        let types = self.read_types()?;

        let mut refreshed = 0usize;
        for (source, events) in &state.retained_conditions {
            let mut notifiers = state.event_targets(source, &types);
            notifiers.extend(state.root_notifiers.iter().cloned());
            for item in items.iter().filter(|i| i.is_event_item()) {
                let attached = notifiers.iter().any(|n| {
                    state
                        .monitored_nodes
                        .get(n)
                        .is_some_and(|m| m.event_items().iter().any(|e| e.id() == item.id()))
                });
                if !attached {
                    continue;
                }
                for event in events {
                    item.queue_event(event, true);
                    refreshed += 1;
                }
            }
        }
        tracing::debug!(items = items.len(), refreshed, "condition refresh");
        Ok(())
    }
}

/// Keeps the newest instance of each condition type per source. An event
/// whose `Retain` field is false drops the condition.
fn retain_condition(state: &mut StoreState, source: &NodeId, event: &SharedEvent) {
    let retained = state.retained_conditions.entry(source.clone()).or_default();
    retained.retain(|e| e.event_type != event.event_type);
    if event.fields.get("Retain") != Some(&Variant::Boolean(false)) {
        retained.push(Arc::clone(event));
    }
    if retained.is_empty() {
        state.retained_conditions.remove(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_condition_replaces_and_drops() {
        let mut state = StoreState::new();
        let source = NodeId::numeric(1, 10);
        let first: SharedEvent = Arc::new(EventInstance::new(ids::CONDITION_TYPE, source.clone(), "high", 500));
        let second: SharedEvent = Arc::new(EventInstance::new(ids::CONDITION_TYPE, source.clone(), "higher", 700));
        retain_condition(&mut state, &source, &first);
        retain_condition(&mut state, &source, &second);
        let kept = &state.retained_conditions[&source];
        assert_eq!(kept.len(), 1);
        assert!(Arc::ptr_eq(&kept[0], &second));

        let cleared: SharedEvent = Arc::new(
            EventInstance::new(ids::CONDITION_TYPE, source.clone(), "normal", 100).with_field("Retain", false),
        );
        retain_condition(&mut state, &source, &cleared);
        assert!(!state.retained_conditions.contains_key(&source));
    }
}
