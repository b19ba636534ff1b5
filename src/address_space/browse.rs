//! Browse, continuation cursors and browse-path translation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attributes::{BrowseDirection, BrowseResultMask, NodeClass};
use crate::context::{OperationContext, Permission};
use crate::error::{UaError, UaResult};
use crate::node::{Node, Reference};
use crate::node_id::{ids, LocalizedText, NodeId, QualifiedName};
use crate::status::StatusCode;

use super::arena::NodeIdx;
use super::handle::{NodeHandle, ValidationScope};
use super::hooks::NodeManagerHooks;
use super::store::StoreState;
use super::type_tree::TypeTree;
use super::NodeManager;

/// View to browse in. A null `view_id` means the whole address space.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDescription {
    pub view_id: NodeId,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub view_version: u32,
}

impl Default for ViewDescription {
    fn default() -> Self {
        Self {
            view_id: NodeId::null(),
            timestamp: None,
            view_version: 0,
        }
    }
}

impl ViewDescription {
    /// Restricts browsing to the given view.
    #[must_use]
    pub fn new(view_id: NodeId) -> Self {
        Self {
            view_id,
            ..Self::default()
        }
    }

    /// True when no view is set (the whole address space).
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.view_id.is_null()
    }
}

/// What to browse from one node.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseDescription {
    pub node_id: NodeId,
    pub browse_direction: BrowseDirection,
    /// `None` (or a null id) matches every reference type.
    pub reference_type_id: Option<NodeId>,
    pub include_subtypes: bool,
    /// Bit mask of node classes to return; 0 returns all.
    pub node_class_mask: u32,
    pub result_mask: BrowseResultMask,
}

impl BrowseDescription {
    /// Forward references of every type, all result fields.
    #[must_use]
    pub fn forward(node_id: NodeId) -> Self {
        Self {
            node_id,
            browse_direction: BrowseDirection::Forward,
            reference_type_id: None,
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BrowseResultMask::ALL,
        }
    }

    /// Sets the direction of references to follow.
    #[must_use]
    pub fn with_direction(mut self, direction: BrowseDirection) -> Self {
        self.browse_direction = direction;
        self
    }

    /// Follows only references of `reference_type`, optionally with its subtypes.
    #[must_use]
    pub fn with_reference_type(mut self, reference_type: NodeId, include_subtypes: bool) -> Self {
        self.reference_type_id = Some(reference_type);
        self.include_subtypes = include_subtypes;
        self
    }

    /// Returns only targets whose NodeClass bit is set in `mask` (0 means all).
    #[must_use]
    pub const fn with_node_class_mask(mut self, mask: u32) -> Self {
        self.node_class_mask = mask;
        self
    }

    /// Selects which target attributes are filled in.
    #[must_use]
    pub const fn with_result_mask(mut self, mask: BrowseResultMask) -> Self {
        self.result_mask = mask;
        self
    }
}

/// One reference returned by a browse.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDescription {
    pub reference_type_id: Option<NodeId>,
    pub is_forward: bool,
    pub node_id: NodeId,
    pub browse_name: Option<QualifiedName>,
    pub display_name: Option<LocalizedText>,
    pub node_class: Option<NodeClass>,
    pub type_definition: Option<NodeId>,
    /// Target lives outside this manager; its attributes and class were not
    /// checked here.
    pub unfiltered: bool,
}

/// Typed handle into the manager's cursor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle {
    slot: u32,
    generation: u32,
}

/// Manager-specific payload of a continuation point.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorData {
    Browser(CursorHandle),
}

/// Browse state carried between calls. The session layer stores this and
/// passes it back for the next page.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationPoint {
    pub id: Uuid,
    pub view: ViewDescription,
    pub description: BrowseDescription,
    /// 0 means no limit.
    pub max_results_to_return: usize,
    pub(crate) data: Option<CursorData>,
}

impl ContinuationPoint {
    /// A fresh request; `max_results_to_return` of 0 means unlimited.
    #[must_use]
    pub fn new(view: ViewDescription, description: BrowseDescription, max_results_to_return: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            view,
            description,
            max_results_to_return,
            data: None,
        }
    }

    /// True once the first page has been produced.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.data.is_some()
    }
}

/// Filtered references waiting to be returned.
#[derive(Debug, Default)]
pub(crate) struct BrowseCursor {
    pending: VecDeque<ReferenceDescription>,
}

impl BrowseCursor {
    fn next(&mut self) -> Option<ReferenceDescription> {
        self.pending.pop_front()
    }

    fn push_back(&mut self, reference: ReferenceDescription) {
        self.pending.push_front(reference);
    }
}

type SharedCursor = Arc<Mutex<BrowseCursor>>;

#[derive(Debug, Default)]
struct CursorSlot {
    generation: u32,
    cursor: Option<SharedCursor>,
}

/// Generational table of open browse cursors.
#[derive(Debug, Default)]
pub(crate) struct ContinuationTable {
    slots: Vec<CursorSlot>,
    free: Vec<u32>,
    live: usize,
}

impl ContinuationTable {
    fn insert(&mut self, cursor: SharedCursor) -> CursorHandle {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.cursor = Some(cursor);
            return CursorHandle {
                slot,
                generation: entry.generation,
            };
        }
        let slot = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(CursorSlot {
            generation: 0,
            cursor: Some(cursor),
        });
        CursorHandle { slot, generation: 0 }
    }

    fn get(&self, handle: CursorHandle) -> Option<SharedCursor> {
        let entry = self.slots.get(handle.slot as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.cursor.clone()
    }

    fn remove(&mut self, handle: CursorHandle) -> bool {
        let Some(entry) = self.slots.get_mut(handle.slot as usize) else {
            return false;
        };
        if entry.generation != handle.generation || entry.cursor.is_none() {
            return false;
        }
        entry.cursor = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.slot);
        self.live -= 1;
        true
    }

    pub(crate) const fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
    }
}

/// One step of a relative browse path.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct RelativePathElement {
    pub reference_type_id: NodeId,
    pub is_inverse: bool,
    pub include_subtypes: bool,
    pub target_name: QualifiedName,
}

impl RelativePathElement {
    /// Follows any hierarchical reference forward to `target_name`.
    #[must_use]
    pub const fn child(target_name: QualifiedName) -> Self {
        Self {
            reference_type_id: ids::HIERARCHICAL_REFERENCES,
            is_inverse: false,
            include_subtypes: true,
            target_name,
        }
    }
}

/// Target reached by a browse path.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowsePathTarget {
    pub target_id: NodeId,
    /// Index of the first element not yet resolved; `u32::MAX` when the
    /// whole path was followed here.
    pub remaining_path_index: u32,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowsePathResult {
    pub status: StatusCode,
    pub targets: Vec<BrowsePathTarget>,
}

fn reference_type_matches(types: &TypeTree, actual: &NodeId, wanted: Option<&NodeId>, include_subtypes: bool) -> bool {
    match wanted {
        None => true,
        Some(w) if w.is_null() => true,
        Some(w) => actual == w || (include_subtypes && types.is_type_of(actual, w)),
    }
}

/// Resolves a reference target to a local node: predefined, or part of the
/// same materialized subtree as `source`.
fn local_target(state: &StoreState, source: NodeIdx, target: &NodeId) -> Option<NodeIdx> {
    if let Some(idx) = state.find(target) {
        return Some(idx);
    }
    let node = state.node(source)?;
    if let Some(parent) = node.parent {
        if state.node(parent).is_some_and(|p| &p.node_id == target) {
            return Some(parent);
        }
    }
    node.children
        .iter()
        .copied()
        .find(|c| state.node(*c).is_some_and(|n| &n.node_id == target))
}

struct CandidateFilter<'a> {
    ctx: &'a OperationContext,
    hooks: &'a dyn NodeManagerHooks,
    types: &'a TypeTree,
    view: &'a ViewDescription,
    description: &'a BrowseDescription,
}

impl CandidateFilter<'_> {
    fn collect(&self, state: &StoreState, idx: NodeIdx) -> VecDeque<ReferenceDescription> {
        let mut out = VecDeque::new();
        let Some(source) = state.node(idx) else {
            return out;
        };
        for reference in &source.references {
            if let Some(desc) = self.candidate(state, idx, source, reference) {
                out.push_back(desc);
            }
        }
        out
    }

    fn candidate(
        &self,
        state: &StoreState,
        idx: NodeIdx,
        source: &Node,
        reference: &Reference,
    ) -> Option<ReferenceDescription> {
        let d = self.description;
        if !d.browse_direction.accepts(reference.is_forward) {
            return None;
        }
        if !reference_type_matches(
            self.types,
            &reference.reference_type,
            d.reference_type_id.as_ref(),
            d.include_subtypes,
        ) {
            return None;
        }
        if !self.view.is_default() && !self.hooks.is_reference_in_view(self.ctx, self.view, source, reference) {
            return None;
        }

        let mask = d.result_mask;
        let mut desc = ReferenceDescription {
            reference_type_id: mask
                .contains(BrowseResultMask::REFERENCE_TYPE_ID)
                .then(|| reference.reference_type.clone()),
            is_forward: reference.is_forward,
            node_id: reference.target.clone(),
            browse_name: None,
            display_name: None,
            node_class: None,
            type_definition: None,
            unfiltered: false,
        };

        let Some(target) = local_target(state, idx, &reference.target).and_then(|t| state.node(t)) else {
            desc.unfiltered = true;
            return Some(desc);
        };

        if !self.view.is_default() && !self.hooks.is_node_in_view(self.ctx, self.view, target) {
            return None;
        }
        if !self.hooks.is_node_accessible_for_user(self.ctx, target)
            || !self.hooks.has_permission(self.ctx, target, Permission::Browse)
        {
            return None;
        }
        let class = target.node_class();
        if d.node_class_mask != 0 && d.node_class_mask & class.mask_bit() == 0 {
            return None;
        }

        if mask.contains(BrowseResultMask::BROWSE_NAME) {
            desc.browse_name = Some(target.browse_name.clone());
        }
        if mask.contains(BrowseResultMask::DISPLAY_NAME) {
            desc.display_name = Some(target.display_name.clone());
        }
        if mask.contains(BrowseResultMask::NODE_CLASS) {
            desc.node_class = Some(class);
        }
        if mask.contains(BrowseResultMask::TYPE_DEFINITION)
            && matches!(class, NodeClass::Object | NodeClass::Variable)
        {
            desc.type_definition = target.type_definition().cloned();
        }
        Some(desc)
    }
}

impl NodeManager {
    /// Returns the next page of references for a browse.
    ///
    /// The first call builds a cursor from the node's references under the
    /// store lock; pages are then drained under the cursor's own lock. When
    /// the cursor is exhausted it is released and `continuation_point` is set
    /// to `None`; otherwise the point stays open for the next call.
    pub fn browse(
        &self,
        ctx: &OperationContext,
        continuation_point: &mut Option<ContinuationPoint>,
        references: &mut Vec<ReferenceDescription>,
    ) -> UaResult<()> {
        let Some(point) = continuation_point.as_mut() else {
            return Err(UaError::service(
                StatusCode::BAD_CONTINUATION_POINT_INVALID,
                "browse called without a continuation point",
            ));
        };

        let (cursor, handle) = {
            let mut state = self.lock_state()?;
            match point.data {
                Some(CursorData::Browser(handle)) => {
                    let cursor = state.continuations.get(handle).ok_or_else(|| {
                        UaError::service(StatusCode::BAD_CONTINUATION_POINT_INVALID, "unknown browse cursor")
                    })?;
                    (cursor, handle)
                }
                None => {
                    let cursor = self.open_cursor(ctx, &mut state, point)?;
                    let shared = Arc::new(Mutex::new(cursor));
                    let handle = state.continuations.insert(Arc::clone(&shared));
                    point.data = Some(CursorData::Browser(handle));
                    (shared, handle)
                }
            }
        };

        let max = point.max_results_to_return;
        let start = references.len();
        let exhausted = {
            let mut cursor = cursor.lock().map_err(|_| UaError::poisoned("browse cursor"))?;
            loop {
                let Some(next) = cursor.next() else {
                    break true;
                };
                if max > 0 && references.len() - start >= max {
                    cursor.push_back(next);
                    break false;
                }
                references.push(next);
            }
        };

        tracing::trace!(
            node_id = %point.description.node_id,
            returned = references.len() - start,
            exhausted,
            "browse page"
        );
        if exhausted {
            self.lock_state()?.continuations.remove(handle);
            *continuation_point = None;
        }
        Ok(())
    }

    fn open_cursor(
        &self,
        ctx: &OperationContext,
        state: &mut StoreState,
        point: &ContinuationPoint,
    ) -> UaResult<BrowseCursor> {
        if state.continuations.len() >= self.config.max_continuation_points {
            return Err(UaError::service(
                StatusCode::BAD_NO_CONTINUATION_POINTS,
                "too many open browse cursors",
            ));
        }
        let node_id = &point.description.node_id;
        let mut handle = state
            .handle_for(node_id, self.hooks.as_ref())
            .ok_or_else(|| UaError::service(StatusCode::BAD_NODE_ID_UNKNOWN, format!("node {node_id} not found")))?;

        let mut types = self.write_types()?;
        let mut scope = ValidationScope::default();
        let resolved = state.validate_handle(&mut handle, ctx, self.hooks.as_ref(), &mut types, &mut scope);
        let result = match resolved {
            None => Err(UaError::service(
                StatusCode::BAD_NODE_ID_UNKNOWN,
                format!("node {node_id} not found"),
            )),
            Some(idx) => self.filter_candidates(ctx, state, &types, idx, point),
        };
        state.end_scope(scope);
        result
    }

    fn filter_candidates(
        &self,
        ctx: &OperationContext,
        state: &StoreState,
        types: &TypeTree,
        idx: NodeIdx,
        point: &ContinuationPoint,
    ) -> UaResult<BrowseCursor> {
        let view = &point.view;
        if !view.is_default() {
            let is_view = state
                .lookup(&view.view_id)
                .and_then(|v| state.node(v))
                .is_some_and(|v| v.node_class() == NodeClass::View);
            if !is_view {
                return Err(UaError::service(
                    StatusCode::BAD_VIEW_ID_UNKNOWN,
                    format!("view {} not found", view.view_id),
                ));
            }
        }
        let Some(node) = state.node(idx) else {
            return Err(UaError::service(StatusCode::BAD_NODE_ID_UNKNOWN, "node vanished"));
        };
        if !view.is_default() && !self.hooks.is_node_in_view(ctx, view, node) {
            return Err(UaError::service(
                StatusCode::BAD_NODE_NOT_IN_VIEW,
                format!("node {} is not in view {}", node.node_id, view.view_id),
            ));
        }
        if !self.hooks.is_node_accessible_for_user(ctx, node) {
            return Err(UaError::service(
                StatusCode::BAD_NODE_ID_UNKNOWN,
                format!("node {} not found", node.node_id),
            ));
        }

        let filter = CandidateFilter {
            ctx,
            hooks: self.hooks.as_ref(),
            types,
            view,
            description: &point.description,
        };
        Ok(BrowseCursor {
            pending: filter.collect(state, idx),
        })
    }

    /// Drops the cursor behind an abandoned continuation point.
    pub fn release_continuation_point(&self, continuation_point: ContinuationPoint) -> UaResult<()> {
        if let Some(CursorData::Browser(handle)) = continuation_point.data {
            self.lock_state()?.continuations.remove(handle);
        }
        Ok(())
    }

    /// Number of open browse cursors.
    pub fn open_continuation_points(&self) -> UaResult<usize> {
        Ok(self.lock_state()?.continuations.len())
    }

    /// Follows one path element from `source`.
    ///
    /// Local targets whose browse name matches are appended to `target_ids`.
    /// Targets owned by another manager cannot be name-checked here and go to
    /// `unresolved_target_ids` for the caller to finish.
    pub fn translate_browse_path(
        &self,
        ctx: &OperationContext,
        source: &NodeHandle,
        element: &RelativePathElement,
        target_ids: &mut Vec<NodeId>,
        unresolved_target_ids: &mut Vec<NodeId>,
    ) -> UaResult<()> {
        let mut state = self.lock_state()?;
        let mut types = self.write_types()?;
        let mut handle = source.clone();
        let mut scope = ValidationScope::default();
        let resolved = state.validate_handle(&mut handle, ctx, self.hooks.as_ref(), &mut types, &mut scope);

        if let Some(idx) = resolved {
            self.follow_element(ctx, &state, &types, idx, element, target_ids, unresolved_target_ids);
        }
        state.end_scope(scope);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn follow_element(
        &self,
        ctx: &OperationContext,
        state: &StoreState,
        types: &TypeTree,
        idx: NodeIdx,
        element: &RelativePathElement,
        target_ids: &mut Vec<NodeId>,
        unresolved_target_ids: &mut Vec<NodeId>,
    ) {
        let Some(node) = state.node(idx) else {
            return;
        };
        if !self.hooks.is_node_accessible_for_user(ctx, node) {
            return;
        }
        for reference in &node.references {
            if reference.is_forward == element.is_inverse {
                continue;
            }
            if !reference_type_matches(
                types,
                &reference.reference_type,
                Some(&element.reference_type_id),
                element.include_subtypes,
            ) {
                continue;
            }
            match local_target(state, idx, &reference.target).and_then(|t| state.node(t)) {
                Some(target) => {
                    if target.browse_name == element.target_name
                        && self.hooks.is_node_accessible_for_user(ctx, target)
                        && self.hooks.has_permission(ctx, target, Permission::Browse)
                        && !target_ids.contains(&target.node_id)
                    {
                        target_ids.push(target.node_id.clone());
                    }
                }
                None => {
                    if !unresolved_target_ids.contains(&reference.target) {
                        unresolved_target_ids.push(reference.target.clone());
                    }
                }
            }
        }
    }

    /// Follows a whole relative path from `start`. Targets that leave this
    /// manager are reported with the index of the element still to resolve.
    pub fn translate_path(
        &self,
        ctx: &OperationContext,
        start: &NodeId,
        path: &[RelativePathElement],
    ) -> UaResult<BrowsePathResult> {
        if path.is_empty() {
            return Ok(BrowsePathResult {
                status: StatusCode::BAD_NOTHING_TO_DO,
                targets: Vec::new(),
            });
        }
        if let Some(bad) = path.iter().find(|e| e.target_name.is_null()) {
            tracing::debug!(reference_type = %bad.reference_type_id, "browse path element without target name");
            return Ok(BrowsePathResult {
                status: StatusCode::BAD_BROWSE_NAME_INVALID,
                targets: Vec::new(),
            });
        }

        let mut targets = Vec::new();
        let mut frontier = vec![start.clone()];
        for (i, element) in path.iter().enumerate() {
            let index = u32::try_from(i).unwrap_or(u32::MAX);
            let mut next = Vec::new();
            for node_id in &frontier {
                let Some(handle) = self.get_manager_handle(node_id) else {
                    targets.push(BrowsePathTarget {
                        target_id: node_id.clone(),
                        remaining_path_index: index,
                    });
                    continue;
                };
                let mut unresolved = Vec::new();
                self.translate_browse_path(ctx, &handle, element, &mut next, &mut unresolved)?;
                targets.extend(unresolved.into_iter().map(|target_id| BrowsePathTarget {
                    target_id,
                    remaining_path_index: index,
                }));
            }
            frontier = next;
        }
        targets.extend(frontier.into_iter().map(|target_id| BrowsePathTarget {
            target_id,
            remaining_path_index: u32::MAX,
        }));

        let status = if targets.is_empty() {
            StatusCode::BAD_NO_MATCH
        } else {
            StatusCode::GOOD
        };
        Ok(BrowsePathResult { status, targets })
    }
}
