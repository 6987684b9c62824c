//! The capability set shared by queues and cohorts.
//!
//! Both node kinds embed a [`NodeHeader`] carrying identity, parent link
//! and lifecycle state. Hierarchy algorithms only ever go through the
//! [`Node`] trait, never through the concrete payload types, so the same
//! manager works for any queue or cohort representation.
//!
//! Header mutators are crate-private: only the manager links and unlinks
//! nodes, which keeps the parent/children relation symmetric.

use cohortq_protocol::{NodeId, NodeState};

/// Identity, parent link and lifecycle state of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    id: NodeId,
    parent: Option<NodeId>,
    state: NodeState,
}

impl NodeHeader {
    /// A fresh, unlinked header.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            parent: None,
            state: NodeState::Unattached,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Link under `parent` (or make a root). Pending deletion survives
    /// re-parenting.
    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
        if self.state != NodeState::PendingDeletion {
            self.state = self.linked_state();
        }
    }

    pub(crate) fn mark_pending_deletion(&mut self) {
        self.state = NodeState::PendingDeletion;
    }

    pub(crate) fn clear_pending_deletion(&mut self) {
        self.state = self.linked_state();
    }

    fn linked_state(&self) -> NodeState {
        if self.parent.is_some() {
            NodeState::Attached
        } else {
            NodeState::Unattached
        }
    }
}

/// Capability set every hierarchy node exposes.
pub trait Node {
    fn header(&self) -> &NodeHeader;

    fn header_mut(&mut self) -> &mut NodeHeader;

    fn id(&self) -> &NodeId {
        self.header().id()
    }

    fn parent(&self) -> Option<&NodeId> {
        self.header().parent()
    }

    fn has_parent(&self) -> bool {
        self.header().parent().is_some()
    }

    fn state(&self) -> NodeState {
        self.header().state()
    }

    /// Direct children. Leaves return an empty list.
    fn children(&self) -> Vec<NodeId> {
        Vec::new()
    }
}
