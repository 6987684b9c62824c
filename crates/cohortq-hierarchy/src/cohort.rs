//! Cohort membership: the child sets of an internal node.

use std::collections::HashSet;

use cohortq_protocol::NodeId;

use crate::node::Node;

/// Children of a cohort, split by kind. A cohort holds no quota of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cohort {
    child_queues: HashSet<NodeId>,
    child_cohorts: HashSet<NodeId>,
}

impl Cohort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct leaf members, sorted by id.
    pub fn child_queues(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.child_queues.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Direct cohort members, sorted by id.
    pub fn child_cohorts(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.child_cohorts.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// All direct children, queues first.
    pub fn children(&self) -> Vec<NodeId> {
        let mut ids = self.child_queues();
        ids.extend(self.child_cohorts());
        ids
    }

    pub fn has_queue(&self, id: &NodeId) -> bool {
        self.child_queues.contains(id)
    }

    pub fn has_cohort(&self, id: &NodeId) -> bool {
        self.child_cohorts.contains(id)
    }

    pub fn child_count(&self) -> usize {
        self.child_queues.len() + self.child_cohorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.child_count() == 0
    }

    // Inserts are idempotent and deletes of non-members are no-ops.

    pub(crate) fn insert_queue(&mut self, id: NodeId) {
        self.child_queues.insert(id);
    }

    pub(crate) fn delete_queue(&mut self, id: &NodeId) {
        self.child_queues.remove(id);
    }

    pub(crate) fn insert_cohort(&mut self, id: NodeId) {
        self.child_cohorts.insert(id);
    }

    pub(crate) fn delete_cohort(&mut self, id: &NodeId) {
        self.child_cohorts.remove(id);
    }
}

/// A concrete cohort type: a [`Node`] that embeds [`Cohort`] membership.
pub trait CohortNode: Node {
    fn cohort(&self) -> &Cohort;

    fn cohort_mut(&mut self) -> &mut Cohort;

    fn child_count(&self) -> usize {
        self.cohort().child_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_queue_is_idempotent() {
        let mut cohort = Cohort::new();
        cohort.insert_queue(NodeId::from("q1"));
        cohort.insert_queue(NodeId::from("q1"));
        assert_eq!(cohort.child_count(), 1);
        assert!(cohort.has_queue(&NodeId::from("q1")));
    }

    #[test]
    fn test_delete_non_member_is_noop() {
        let mut cohort = Cohort::new();
        cohort.insert_queue(NodeId::from("q1"));
        cohort.delete_queue(&NodeId::from("q2"));
        cohort.delete_cohort(&NodeId::from("q1"));
        assert_eq!(cohort.child_count(), 1);
    }

    #[test]
    fn test_children_lists_queues_then_cohorts() {
        let mut cohort = Cohort::new();
        cohort.insert_cohort(NodeId::from("a-cohort"));
        cohort.insert_queue(NodeId::from("z-queue"));
        cohort.insert_queue(NodeId::from("b-queue"));
        let children: Vec<String> = cohort.children().iter().map(|c| c.to_string()).collect();
        assert_eq!(children, vec!["b-queue", "z-queue", "a-cohort"]);
    }

    #[test]
    fn test_empty_cohort() {
        let mut cohort = Cohort::new();
        assert!(cohort.is_empty());
        cohort.insert_cohort(NodeId::from("child"));
        assert!(!cohort.is_empty());
        cohort.delete_cohort(&NodeId::from("child"));
        assert!(cohort.is_empty());
    }
}
