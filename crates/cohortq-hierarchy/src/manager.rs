//! Hierarchy manager: owns every node and the links between them.
//!
//! The manager is generic over the concrete queue (`Q`) and cohort (`C`)
//! types and only uses the [`Node`] / [`CohortNode`] capability set, so
//! quota bookkeeping can live entirely in the payload types.
//!
//! Structural invariants kept by every public operation:
//! - ids are unique across both node kinds
//! - a parent is always a cohort
//! - `A` is `B`'s parent iff `B` is in `A`'s children
//! - following parents from any node terminates at a root
//!
//! Every mutation validates first and mutates second, so a rejected call
//! leaves the tree untouched.

use std::collections::{HashMap, HashSet};

use cohortq_protocol::{NodeId, NodeKind, NodeState, MAX_HIERARCHY_DEPTH};

use crate::cohort::CohortNode;
use crate::node::Node;
use crate::HierarchyError;

/// A node handed back by [`Manager::remove`].
#[derive(Debug)]
pub enum Removed<Q, C> {
    Queue(Q),
    Cohort(C),
}

/// Owner of the quota hierarchy's structure.
#[derive(Debug, Clone)]
pub struct Manager<Q, C> {
    queues: HashMap<NodeId, Q>,
    cohorts: HashMap<NodeId, C>,
}

impl<Q, C> Default for Manager<Q, C> {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
            cohorts: HashMap::new(),
        }
    }
}

impl<Q: Node, C: CohortNode> Manager<Q, C> {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ──

    pub fn len(&self) -> usize {
        self.queues.len() + self.cohorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.queues.contains_key(id) || self.cohorts.contains_key(id)
    }

    pub fn kind_of(&self, id: &NodeId) -> Option<NodeKind> {
        if self.queues.contains_key(id) {
            Some(NodeKind::Queue)
        } else if self.cohorts.contains_key(id) {
            Some(NodeKind::Cohort)
        } else {
            None
        }
    }

    pub fn lookup_queue(&self, id: &NodeId) -> Option<&Q> {
        self.queues.get(id)
    }

    pub fn lookup_queue_mut(&mut self, id: &NodeId) -> Option<&mut Q> {
        self.queues.get_mut(id)
    }

    pub fn lookup_cohort(&self, id: &NodeId) -> Option<&C> {
        self.cohorts.get(id)
    }

    pub fn lookup_cohort_mut(&mut self, id: &NodeId) -> Option<&mut C> {
        self.cohorts.get_mut(id)
    }

    /// Like [`lookup_queue`](Self::lookup_queue), but distinguishes an
    /// unknown id from an id naming a cohort.
    pub fn queue(&self, id: &NodeId) -> Result<&Q, HierarchyError> {
        let is_cohort = self.cohorts.contains_key(id);
        self.queues.get(id).ok_or_else(|| missing(id, NodeKind::Queue, is_cohort))
    }

    pub fn queue_mut(&mut self, id: &NodeId) -> Result<&mut Q, HierarchyError> {
        let is_cohort = self.cohorts.contains_key(id);
        self.queues.get_mut(id).ok_or_else(|| missing(id, NodeKind::Queue, is_cohort))
    }

    pub fn cohort(&self, id: &NodeId) -> Result<&C, HierarchyError> {
        let is_queue = self.queues.contains_key(id);
        self.cohorts.get(id).ok_or_else(|| missing(id, NodeKind::Cohort, is_queue))
    }

    pub fn cohort_mut(&mut self, id: &NodeId) -> Result<&mut C, HierarchyError> {
        let is_queue = self.queues.contains_key(id);
        self.cohorts.get_mut(id).ok_or_else(|| missing(id, NodeKind::Cohort, is_queue))
    }

    pub fn parent_of(&self, id: &NodeId) -> Result<Option<&NodeId>, HierarchyError> {
        if let Some(queue) = self.queues.get(id) {
            return Ok(queue.parent());
        }
        if let Some(cohort) = self.cohorts.get(id) {
            return Ok(cohort.parent());
        }
        Err(HierarchyError::NotFound(id.clone()))
    }

    pub fn children_of(&self, id: &NodeId) -> Result<Vec<NodeId>, HierarchyError> {
        if let Some(queue) = self.queues.get(id) {
            return Ok(queue.children());
        }
        if let Some(cohort) = self.cohorts.get(id) {
            return Ok(cohort.children());
        }
        Err(HierarchyError::NotFound(id.clone()))
    }

    pub fn state_of(&self, id: &NodeId) -> Result<NodeState, HierarchyError> {
        if let Some(queue) = self.queues.get(id) {
            return Ok(queue.state());
        }
        if let Some(cohort) = self.cohorts.get(id) {
            return Ok(cohort.state());
        }
        Err(HierarchyError::NotFound(id.clone()))
    }

    pub fn queues(&self) -> impl Iterator<Item = &Q> {
        self.queues.values()
    }

    pub fn cohorts(&self) -> impl Iterator<Item = &C> {
        self.cohorts.values()
    }

    /// All queue ids, sorted.
    pub fn queue_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.queues.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All cohort ids, sorted.
    pub fn cohort_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.cohorts.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Nodes without a parent, sorted.
    pub fn roots(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .queues
            .values()
            .filter(|q| !q.has_parent())
            .map(|q| q.id().clone())
            .chain(
                self.cohorts
                    .values()
                    .filter(|c| !c.has_parent())
                    .map(|c| c.id().clone()),
            )
            .collect();
        ids.sort();
        ids
    }

    fn parent_ref(&self, id: &NodeId) -> Option<&NodeId> {
        match self.queues.get(id) {
            Some(queue) => queue.parent(),
            None => self.cohorts.get(id).and_then(|c| c.parent()),
        }
    }

    /// The chain from `id` up to its root, innermost first. Includes `id`.
    ///
    /// O(depth). Terminates because the parent relation is acyclic; a walk
    /// longer than [`MAX_HIERARCHY_DEPTH`] or through a missing node means
    /// the tree is corrupted.
    pub fn path_to_root(&self, id: &NodeId) -> Result<Vec<NodeId>, HierarchyError> {
        if !self.contains(id) {
            return Err(HierarchyError::NotFound(id.clone()));
        }

        let mut path = vec![id.clone()];
        let mut current = self.parent_ref(id);
        while let Some(parent) = current {
            if !self.cohorts.contains_key(parent) {
                return Err(HierarchyError::Corrupted(format!(
                    "{} references missing parent cohort {}",
                    path[path.len() - 1],
                    parent
                )));
            }
            if path.len() > MAX_HIERARCHY_DEPTH {
                return Err(HierarchyError::Corrupted(format!(
                    "ancestor chain of {id} exceeds {MAX_HIERARCHY_DEPTH} nodes"
                )));
            }
            path.push(parent.clone());
            current = self.parent_ref(parent);
        }
        Ok(path)
    }

    /// Ancestors of `id`, innermost first. Excludes `id`.
    pub fn ancestors(&self, id: &NodeId) -> Result<Vec<NodeId>, HierarchyError> {
        let mut path = self.path_to_root(id)?;
        path.remove(0);
        Ok(path)
    }

    pub fn root_of(&self, id: &NodeId) -> Result<NodeId, HierarchyError> {
        let path = self.path_to_root(id)?;
        path.last()
            .cloned()
            .ok_or_else(|| HierarchyError::NotFound(id.clone()))
    }

    /// Whether `ancestor` appears on the path from `id` to its root.
    /// A node is not its own descendant.
    pub fn is_descendant(&self, id: &NodeId, ancestor: &NodeId) -> Result<bool, HierarchyError> {
        Ok(self.ancestors(id)?.iter().any(|a| a == ancestor))
    }

    /// Every queue in the subtree rooted at `cohort`, sorted.
    pub fn subtree_queues(&self, cohort: &NodeId) -> Result<Vec<NodeId>, HierarchyError> {
        self.cohort(cohort)?;

        let mut found = Vec::new();
        let mut visited: HashSet<&NodeId> = HashSet::new();
        let mut stack = vec![cohort];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                return Err(HierarchyError::Corrupted(format!(
                    "cohort {current} reached twice below {cohort}"
                )));
            }
            let Some(node) = self.cohorts.get(current) else {
                return Err(HierarchyError::Corrupted(format!(
                    "missing child cohort {current}"
                )));
            };
            found.extend(node.cohort().child_queues());
            for child in node.cohort().child_cohorts() {
                match self.cohorts.get_key_value(&child) {
                    Some((key, _)) => stack.push(key),
                    None => {
                        return Err(HierarchyError::Corrupted(format!(
                            "cohort {current} lists missing child cohort {child}"
                        )))
                    }
                }
            }
        }
        found.sort();
        Ok(found)
    }

    // ── Mutations ──

    /// Check that `parent` may become the parent of `id`.
    ///
    /// The cycle check runs before the kind check, so attaching a cohort
    /// under one of its own descendant queues reports a cycle.
    fn validate_parent(&self, id: &NodeId, parent: &NodeId) -> Result<(), HierarchyError> {
        if !self.contains(parent) {
            return Err(HierarchyError::UnknownParent {
                id: id.clone(),
                parent: parent.clone(),
            });
        }
        self.check_no_cycle(id, parent)?;
        if !self.cohorts.contains_key(parent) {
            return Err(HierarchyError::InvalidParent {
                id: id.clone(),
                parent: parent.clone(),
            });
        }
        Ok(())
    }

    /// Walk from `parent` to its root; meeting `id` on the way means `parent`
    /// lies in `id`'s subtree. O(depth).
    fn check_no_cycle(&self, id: &NodeId, parent: &NodeId) -> Result<(), HierarchyError> {
        let mut current = Some(parent);
        let mut steps = 0usize;
        while let Some(node) = current {
            if node == id {
                return Err(HierarchyError::Cycle {
                    id: id.clone(),
                    parent: parent.clone(),
                });
            }
            steps += 1;
            if steps > MAX_HIERARCHY_DEPTH {
                return Err(HierarchyError::Corrupted(format!(
                    "ancestor chain of {parent} exceeds {MAX_HIERARCHY_DEPTH} nodes"
                )));
            }
            current = self.parent_ref(node);
        }
        Ok(())
    }

    fn link(&mut self, id: &NodeId, kind: NodeKind, parent: Option<&NodeId>) {
        if let Some(cohort) = parent.and_then(|p| self.cohorts.get_mut(p)) {
            match kind {
                NodeKind::Queue => cohort.cohort_mut().insert_queue(id.clone()),
                NodeKind::Cohort => cohort.cohort_mut().insert_cohort(id.clone()),
            }
        }
    }

    fn unlink(&mut self, id: &NodeId, kind: NodeKind, parent: Option<&NodeId>) {
        if let Some(cohort) = parent.and_then(|p| self.cohorts.get_mut(p)) {
            match kind {
                NodeKind::Queue => cohort.cohort_mut().delete_queue(id),
                NodeKind::Cohort => cohort.cohort_mut().delete_cohort(id),
            }
        }
    }

    /// Insert a new queue under `parent`, or as a root.
    pub fn add_queue(&mut self, mut queue: Q, parent: Option<&NodeId>) -> Result<(), HierarchyError> {
        let id = queue.id().clone();
        if self.contains(&id) {
            return Err(HierarchyError::DuplicateId(id));
        }
        if let Some(parent) = parent {
            self.validate_parent(&id, parent)?;
        }

        queue.header_mut().set_parent(parent.cloned());
        self.link(&id, NodeKind::Queue, parent);
        tracing::debug!(queue = %id, parent = ?parent, "Added queue");
        self.queues.insert(id, queue);
        Ok(())
    }

    /// Insert a new cohort under `parent`, or as a root.
    pub fn add_cohort(&mut self, mut cohort: C, parent: Option<&NodeId>) -> Result<(), HierarchyError> {
        let id = cohort.id().clone();
        if self.contains(&id) {
            return Err(HierarchyError::DuplicateId(id));
        }
        if let Some(parent) = parent {
            self.validate_parent(&id, parent)?;
        }

        cohort.header_mut().set_parent(parent.cloned());
        self.link(&id, NodeKind::Cohort, parent);
        tracing::debug!(cohort = %id, parent = ?parent, "Added cohort");
        self.cohorts.insert(id, cohort);
        Ok(())
    }

    /// Move an existing node (with its whole subtree) under `new_parent`,
    /// or make it a root. Setting the current parent again is a no-op.
    pub fn update_parent(&mut self, id: &NodeId, new_parent: Option<&NodeId>) -> Result<(), HierarchyError> {
        let kind = self
            .kind_of(id)
            .ok_or_else(|| HierarchyError::NotFound(id.clone()))?;
        let old_parent = self.parent_ref(id).cloned();
        if old_parent.as_ref() == new_parent {
            return Ok(());
        }
        if let Some(parent) = new_parent {
            self.validate_parent(id, parent)?;
        }

        self.unlink(id, kind, old_parent.as_ref());
        self.link(id, kind, new_parent);
        match kind {
            NodeKind::Queue => {
                if let Some(queue) = self.queues.get_mut(id) {
                    queue.header_mut().set_parent(new_parent.cloned());
                }
            }
            NodeKind::Cohort => {
                if let Some(cohort) = self.cohorts.get_mut(id) {
                    cohort.header_mut().set_parent(new_parent.cloned());
                }
            }
        }

        tracing::debug!(
            node = %id,
            kind = %kind,
            from = ?old_parent,
            to = ?new_parent,
            "Re-parented node"
        );
        Ok(())
    }

    /// Remove a node. Cohorts must be empty; queues are always removable and
    /// are detached from their parent.
    pub fn remove(&mut self, id: &NodeId) -> Result<Removed<Q, C>, HierarchyError> {
        let kind = self
            .kind_of(id)
            .ok_or_else(|| HierarchyError::NotFound(id.clone()))?;

        if kind == NodeKind::Cohort {
            let children = self.cohorts.get(id).map(|c| c.child_count()).unwrap_or(0);
            if children > 0 {
                return Err(HierarchyError::HasChildren {
                    id: id.clone(),
                    children,
                });
            }
        }

        let parent = self.parent_ref(id).cloned();
        self.unlink(id, kind, parent.as_ref());
        tracing::debug!(node = %id, kind = %kind, parent = ?parent, "Removed node");

        let removed = match kind {
            NodeKind::Queue => self.queues.remove(id).map(Removed::Queue),
            NodeKind::Cohort => self.cohorts.remove(id).map(Removed::Cohort),
        };
        removed.ok_or_else(|| HierarchyError::NotFound(id.clone()))
    }

    /// Flag a cohort the configuration source deleted while it still had
    /// children. It stays in the tree until [`remove`](Self::remove) succeeds.
    pub fn mark_pending_deletion(&mut self, id: &NodeId) -> Result<(), HierarchyError> {
        let cohort = self.cohort_mut(id)?;
        cohort.header_mut().mark_pending_deletion();
        tracing::debug!(cohort = %id, "Cohort pending deletion");
        Ok(())
    }

    /// Undo [`mark_pending_deletion`](Self::mark_pending_deletion), e.g. when
    /// the node is upserted again. No-op for nodes not pending deletion.
    pub fn clear_pending_deletion(&mut self, id: &NodeId) -> Result<(), HierarchyError> {
        if let Some(queue) = self.queues.get_mut(id) {
            if queue.state() == NodeState::PendingDeletion {
                queue.header_mut().clear_pending_deletion();
            }
            return Ok(());
        }
        let cohort = self.cohort_mut(id)?;
        if cohort.state() == NodeState::PendingDeletion {
            cohort.header_mut().clear_pending_deletion();
        }
        Ok(())
    }

    /// Cohorts pending deletion, sorted.
    pub fn pending_deletion(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .cohorts
            .values()
            .filter(|c| c.state() == NodeState::PendingDeletion)
            .map(|c| c.id().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Cohorts pending deletion whose last child has left, sorted.
    pub fn deletable_pending(&self) -> Vec<NodeId> {
        self.pending_deletion()
            .into_iter()
            .filter(|id| self.cohorts.get(id).map(|c| c.child_count() == 0).unwrap_or(false))
            .collect()
    }

    // ── Invariants ──

    /// Verify symmetry of the parent/children relation, acyclicity, unique
    /// ids and state consistency.
    ///
    /// A failure is a programming fault, never a user error.
    pub fn check_invariants(&self) -> Result<(), HierarchyError> {
        for id in self.queues.keys() {
            if self.cohorts.contains_key(id) {
                return Err(HierarchyError::Corrupted(format!(
                    "{id} is both a queue and a cohort"
                )));
            }
        }

        for queue in self.queues.values() {
            self.check_node_link(queue.id(), queue.parent(), queue.state(), NodeKind::Queue)?;
        }

        for cohort in self.cohorts.values() {
            self.check_node_link(cohort.id(), cohort.parent(), cohort.state(), NodeKind::Cohort)?;

            for child in cohort.cohort().child_queues() {
                let parent = self.queues.get(&child).and_then(|q| q.parent());
                if parent != Some(cohort.id()) {
                    return Err(HierarchyError::Corrupted(format!(
                        "cohort {} lists queue {child} whose parent is {parent:?}",
                        cohort.id()
                    )));
                }
            }
            for child in cohort.cohort().child_cohorts() {
                let parent = self.cohorts.get(&child).and_then(|c| c.parent());
                if parent != Some(cohort.id()) {
                    return Err(HierarchyError::Corrupted(format!(
                        "cohort {} lists cohort {child} whose parent is {parent:?}",
                        cohort.id()
                    )));
                }
            }
        }

        for id in self.queues.keys().chain(self.cohorts.keys()) {
            let path = self.path_to_root(id)?;
            let unique: HashSet<&NodeId> = path.iter().collect();
            if unique.len() != path.len() {
                return Err(HierarchyError::Corrupted(format!("cycle through {id}")));
            }
        }

        Ok(())
    }

    fn check_node_link(
        &self,
        id: &NodeId,
        parent: Option<&NodeId>,
        state: NodeState,
        kind: NodeKind,
    ) -> Result<(), HierarchyError> {
        match parent {
            Some(parent) => {
                let listed = self.cohorts.get(parent).map(|c| match kind {
                    NodeKind::Queue => c.cohort().has_queue(id),
                    NodeKind::Cohort => c.cohort().has_cohort(id),
                });
                if listed != Some(true) {
                    return Err(HierarchyError::Corrupted(format!(
                        "{kind} {id} is not listed by its parent {parent}"
                    )));
                }
                if state == NodeState::Unattached {
                    return Err(HierarchyError::Corrupted(format!(
                        "{kind} {id} has a parent but is unattached"
                    )));
                }
            }
            None => {
                if state == NodeState::Attached {
                    return Err(HierarchyError::Corrupted(format!(
                        "{kind} {id} is attached without a parent"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Error for a lookup of the `expected` kind that found nothing.
fn missing(id: &NodeId, expected: NodeKind, other_kind: bool) -> HierarchyError {
    if other_kind {
        HierarchyError::WrongKind {
            id: id.clone(),
            expected,
        }
    } else {
        HierarchyError::NotFound(id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::Cohort;
    use crate::node::NodeHeader;

    #[derive(Debug)]
    struct Leaf(NodeHeader);

    impl Node for Leaf {
        fn header(&self) -> &NodeHeader {
            &self.0
        }
        fn header_mut(&mut self) -> &mut NodeHeader {
            &mut self.0
        }
    }

    #[derive(Debug)]
    struct Group(NodeHeader, Cohort);

    impl Node for Group {
        fn header(&self) -> &NodeHeader {
            &self.0
        }
        fn header_mut(&mut self) -> &mut NodeHeader {
            &mut self.0
        }
        fn children(&self) -> Vec<NodeId> {
            self.1.children()
        }
    }

    impl CohortNode for Group {
        fn cohort(&self) -> &Cohort {
            &self.1
        }
        fn cohort_mut(&mut self) -> &mut Cohort {
            &mut self.1
        }
    }

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    fn leaf(s: &str) -> Leaf {
        Leaf(NodeHeader::new(id(s)))
    }

    fn group(s: &str) -> Group {
        Group(NodeHeader::new(id(s)), Cohort::new())
    }

    #[test]
    fn test_add_and_lookup() {
        let mut m: Manager<Leaf, Group> = Manager::new();
        m.add_cohort(group("c1"), None).unwrap();
        m.add_queue(leaf("q1"), Some(&id("c1"))).unwrap();

        assert_eq!(m.len(), 2);
        assert_eq!(m.kind_of(&id("q1")), Some(NodeKind::Queue));
        assert_eq!(m.lookup_queue(&id("q1")).unwrap().parent(), Some(&id("c1")));
        assert_eq!(m.state_of(&id("q1")).unwrap(), NodeState::Attached);
        assert_eq!(m.state_of(&id("c1")).unwrap(), NodeState::Unattached);
        assert!(m.lookup_cohort(&id("c1")).unwrap().cohort().has_queue(&id("q1")));
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_update_parent_into_own_subtree_is_cycle() {
        let mut m: Manager<Leaf, Group> = Manager::new();
        m.add_cohort(group("a"), None).unwrap();
        m.add_cohort(group("b"), Some(&id("a"))).unwrap();
        m.add_cohort(group("c"), Some(&id("b"))).unwrap();

        let err = m.update_parent(&id("a"), Some(&id("c"))).unwrap_err();
        assert!(matches!(err, HierarchyError::Cycle { .. }));
        let err = m.update_parent(&id("a"), Some(&id("a"))).unwrap_err();
        assert!(matches!(err, HierarchyError::Cycle { .. }));
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_path_to_root_innermost_first() {
        let mut m: Manager<Leaf, Group> = Manager::new();
        m.add_cohort(group("root"), None).unwrap();
        m.add_cohort(group("mid"), Some(&id("root"))).unwrap();
        m.add_queue(leaf("q"), Some(&id("mid"))).unwrap();

        assert_eq!(m.path_to_root(&id("q")).unwrap(), vec![id("q"), id("mid"), id("root")]);
        assert_eq!(m.root_of(&id("q")).unwrap(), id("root"));
    }

    #[test]
    fn test_remove_queue_detaches_from_parent() {
        let mut m: Manager<Leaf, Group> = Manager::new();
        m.add_cohort(group("c"), None).unwrap();
        m.add_queue(leaf("q"), Some(&id("c"))).unwrap();

        assert!(matches!(m.remove(&id("q")).unwrap(), Removed::Queue(_)));
        assert_eq!(m.lookup_cohort(&id("c")).unwrap().child_count(), 0);
        m.check_invariants().unwrap();
    }
}
