//! Tests for the hierarchy manager.
//!
//! Verifies:
//! - Insert, lookup and removal of queues and cohorts
//! - Structural errors: duplicate ids, unknown/invalid parents, cycles,
//!   non-empty cohort deletion
//! - Re-parenting of whole subtrees
//! - Pending deletion lifecycle
//! - Acyclicity, symmetry and atomicity over random operation sequences

use cohortq_hierarchy::{Cohort, CohortNode, HierarchyError, Manager, Node, NodeHeader, Removed};
use cohortq_protocol::{NodeId, NodeKind, NodeState};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct TestQueue {
    header: NodeHeader,
    payload: u32,
}

impl Node for TestQueue {
    fn header(&self) -> &NodeHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut NodeHeader {
        &mut self.header
    }
}

#[derive(Debug, Clone)]
struct TestCohort {
    header: NodeHeader,
    members: Cohort,
}

impl Node for TestCohort {
    fn header(&self) -> &NodeHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut NodeHeader {
        &mut self.header
    }
    fn children(&self) -> Vec<NodeId> {
        self.members.children()
    }
}

impl CohortNode for TestCohort {
    fn cohort(&self) -> &Cohort {
        &self.members
    }
    fn cohort_mut(&mut self) -> &mut Cohort {
        &mut self.members
    }
}

type TestManager = Manager<TestQueue, TestCohort>;

fn id(s: &str) -> NodeId {
    NodeId::from(s)
}

fn queue(s: &str) -> TestQueue {
    TestQueue {
        header: NodeHeader::new(id(s)),
        payload: 0,
    }
}

fn cohort(s: &str) -> TestCohort {
    TestCohort {
        header: NodeHeader::new(id(s)),
        members: Cohort::new(),
    }
}

/// c1 { q1, q2 }
fn two_queue_cohort() -> TestManager {
    let mut m = TestManager::new();
    m.add_cohort(cohort("c1"), None).unwrap();
    m.add_queue(queue("q1"), Some(&id("c1"))).unwrap();
    m.add_queue(queue("q2"), Some(&id("c1"))).unwrap();
    m
}

/// A sorted structural snapshot: (id, parent, children, state).
fn structure(m: &TestManager) -> Vec<(NodeId, Option<NodeId>, Vec<NodeId>, NodeState)> {
    let mut ids = m.queue_ids();
    ids.extend(m.cohort_ids());
    ids.sort();
    ids.into_iter()
        .map(|node| {
            let parent = m.parent_of(&node).unwrap().cloned();
            let children = m.children_of(&node).unwrap();
            let state = m.state_of(&node).unwrap();
            (node, parent, children, state)
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════
// Insert and lookup
// ═══════════════════════════════════════════════════════════════

#[test]
fn root_cohort_has_no_parent() {
    let m = two_queue_cohort();
    let c1 = m.lookup_cohort(&id("c1")).unwrap();
    assert!(!c1.has_parent());
    assert!(c1.parent().is_none());
    assert_eq!(c1.child_count(), 2);
    assert_eq!(c1.cohort().child_queues(), vec![id("q1"), id("q2")]);
}

#[test]
fn unparented_queue_is_its_own_root() {
    let mut m = TestManager::new();
    m.add_queue(queue("solo"), None).unwrap();
    assert_eq!(m.path_to_root(&id("solo")).unwrap(), vec![id("solo")]);
    assert_eq!(m.state_of(&id("solo")).unwrap(), NodeState::Unattached);
    assert_eq!(m.roots(), vec![id("solo")]);
}

#[test]
fn queue_payload_is_preserved() {
    let mut m = TestManager::new();
    m.add_queue(
        TestQueue {
            header: NodeHeader::new(id("q")),
            payload: 42,
        },
        None,
    )
    .unwrap();
    m.lookup_queue_mut(&id("q")).unwrap().payload += 1;
    assert_eq!(m.lookup_queue(&id("q")).unwrap().payload, 43);
}

#[test]
fn lookup_distinguishes_kinds() {
    let m = two_queue_cohort();
    assert!(matches!(
        m.queue(&id("c1")),
        Err(HierarchyError::WrongKind {
            expected: NodeKind::Queue,
            ..
        })
    ));
    assert!(matches!(m.cohort(&id("nope")), Err(HierarchyError::NotFound(_))));
    assert!(m.lookup_queue(&id("c1")).is_none());
}

#[test]
fn mutable_lookup_distinguishes_kinds() {
    let mut m = two_queue_cohort();
    m.queue_mut(&id("q1")).unwrap().payload += 1;
    assert_eq!(m.queue(&id("q1")).unwrap().payload, 1);
    assert!(m.cohort_mut(&id("c1")).is_ok());

    assert!(matches!(
        m.queue_mut(&id("c1")),
        Err(HierarchyError::WrongKind {
            expected: NodeKind::Queue,
            ..
        })
    ));
    assert!(matches!(
        m.cohort_mut(&id("q1")),
        Err(HierarchyError::WrongKind {
            expected: NodeKind::Cohort,
            ..
        })
    ));
    assert!(matches!(m.queue_mut(&id("nope")), Err(HierarchyError::NotFound(_))));
    assert!(matches!(m.cohort_mut(&id("nope")), Err(HierarchyError::NotFound(_))));
}

#[test]
fn duplicate_id_is_rejected_across_kinds() {
    let mut m = two_queue_cohort();
    assert_eq!(
        m.add_queue(queue("q1"), None).unwrap_err(),
        HierarchyError::DuplicateId(id("q1"))
    );
    assert_eq!(
        m.add_cohort(cohort("q1"), None).unwrap_err(),
        HierarchyError::DuplicateId(id("q1"))
    );
    assert_eq!(
        m.add_queue(queue("c1"), None).unwrap_err(),
        HierarchyError::DuplicateId(id("c1"))
    );
}

#[test]
fn unknown_parent_is_rejected() {
    let mut m = TestManager::new();
    let err = m.add_queue(queue("q1"), Some(&id("ghost"))).unwrap_err();
    assert_eq!(
        err,
        HierarchyError::UnknownParent {
            id: id("q1"),
            parent: id("ghost")
        }
    );
    assert!(m.is_empty());
}

#[test]
fn queue_cannot_be_a_parent() {
    let mut m = two_queue_cohort();
    let err = m.add_queue(queue("q3"), Some(&id("q1"))).unwrap_err();
    assert!(matches!(err, HierarchyError::InvalidParent { .. }));
    let err = m.add_cohort(cohort("c2"), Some(&id("q1"))).unwrap_err();
    assert!(matches!(err, HierarchyError::InvalidParent { .. }));
}

// ═══════════════════════════════════════════════════════════════
// Re-parenting
// ═══════════════════════════════════════════════════════════════

#[test]
fn cohort_under_its_own_queue_is_a_cycle() {
    let mut m = two_queue_cohort();
    let before = structure(&m);
    let err = m.update_parent(&id("c1"), Some(&id("q1"))).unwrap_err();
    assert_eq!(
        err,
        HierarchyError::Cycle {
            id: id("c1"),
            parent: id("q1")
        }
    );
    assert_eq!(structure(&m), before);
}

#[test]
fn reparent_moves_whole_subtree() {
    let mut m = TestManager::new();
    m.add_cohort(cohort("root-a"), None).unwrap();
    m.add_cohort(cohort("root-b"), None).unwrap();
    m.add_cohort(cohort("team"), Some(&id("root-a"))).unwrap();
    m.add_queue(queue("q"), Some(&id("team"))).unwrap();

    m.update_parent(&id("team"), Some(&id("root-b"))).unwrap();

    assert_eq!(
        m.path_to_root(&id("q")).unwrap(),
        vec![id("q"), id("team"), id("root-b")]
    );
    assert_eq!(m.lookup_cohort(&id("root-a")).unwrap().child_count(), 0);
    assert!(m.lookup_cohort(&id("root-b")).unwrap().cohort().has_cohort(&id("team")));
    assert_eq!(m.subtree_queues(&id("root-b")).unwrap(), vec![id("q")]);
    assert!(m.subtree_queues(&id("root-a")).unwrap().is_empty());
    m.check_invariants().unwrap();
}

#[test]
fn reparent_to_none_makes_a_root() {
    let mut m = two_queue_cohort();
    m.update_parent(&id("q1"), None).unwrap();
    assert_eq!(m.state_of(&id("q1")).unwrap(), NodeState::Unattached);
    assert_eq!(m.roots(), vec![id("c1"), id("q1")]);
    m.check_invariants().unwrap();
}

#[test]
fn reparent_to_same_parent_is_noop() {
    let mut m = two_queue_cohort();
    let before = structure(&m);
    m.update_parent(&id("q1"), Some(&id("c1"))).unwrap();
    assert_eq!(structure(&m), before);
}

#[test]
fn reparent_unknown_node_is_not_found() {
    let mut m = two_queue_cohort();
    assert_eq!(
        m.update_parent(&id("zz"), None).unwrap_err(),
        HierarchyError::NotFound(id("zz"))
    );
}

#[test]
fn is_descendant_follows_ancestors() {
    let mut m = two_queue_cohort();
    m.add_cohort(cohort("top"), None).unwrap();
    m.update_parent(&id("c1"), Some(&id("top"))).unwrap();
    assert!(m.is_descendant(&id("q1"), &id("top")).unwrap());
    assert!(!m.is_descendant(&id("top"), &id("q1")).unwrap());
    assert!(!m.is_descendant(&id("q1"), &id("q1")).unwrap());
}

// ═══════════════════════════════════════════════════════════════
// Removal
// ═══════════════════════════════════════════════════════════════

#[test]
fn non_empty_cohort_cannot_be_removed() {
    let mut m = two_queue_cohort();
    let before = structure(&m);
    assert_eq!(
        m.remove(&id("c1")).unwrap_err(),
        HierarchyError::HasChildren {
            id: id("c1"),
            children: 2
        }
    );
    assert_eq!(structure(&m), before);
}

#[test]
fn cohort_removable_once_emptied() {
    let mut m = two_queue_cohort();
    m.remove(&id("q1")).unwrap();
    m.remove(&id("q2")).unwrap();
    assert!(matches!(m.remove(&id("c1")).unwrap(), Removed::Cohort(_)));
    assert!(m.is_empty());
}

#[test]
fn remove_unknown_is_not_found() {
    let mut m = TestManager::new();
    assert!(matches!(m.remove(&id("x")), Err(HierarchyError::NotFound(_))));
}

// ═══════════════════════════════════════════════════════════════
// Pending deletion
// ═══════════════════════════════════════════════════════════════

#[test]
fn pending_deletion_becomes_deletable_when_empty() {
    let mut m = two_queue_cohort();
    m.mark_pending_deletion(&id("c1")).unwrap();
    assert_eq!(m.state_of(&id("c1")).unwrap(), NodeState::PendingDeletion);
    assert_eq!(m.pending_deletion(), vec![id("c1")]);
    assert!(m.deletable_pending().is_empty());

    m.remove(&id("q1")).unwrap();
    m.update_parent(&id("q2"), None).unwrap();
    assert_eq!(m.deletable_pending(), vec![id("c1")]);
    m.check_invariants().unwrap();
}

#[test]
fn clearing_pending_deletion_restores_state() {
    let mut m = two_queue_cohort();
    m.mark_pending_deletion(&id("c1")).unwrap();
    m.clear_pending_deletion(&id("c1")).unwrap();
    assert_eq!(m.state_of(&id("c1")).unwrap(), NodeState::Unattached);
    assert!(m.pending_deletion().is_empty());
}

#[test]
fn queues_cannot_be_pending_deletion() {
    let mut m = two_queue_cohort();
    assert!(matches!(
        m.mark_pending_deletion(&id("q1")),
        Err(HierarchyError::WrongKind {
            expected: NodeKind::Cohort,
            ..
        })
    ));
}

// ═══════════════════════════════════════════════════════════════
// Properties over random operation sequences
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Op {
    AddCohort(usize, Option<usize>),
    AddQueue(usize, Option<usize>),
    Reparent(usize, Option<usize>),
    Remove(usize),
}

const POOL: usize = 8;

fn node_name(i: usize) -> NodeId {
    NodeId::new(format!("n{i}"))
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let node = 0..POOL;
    let parent = proptest::option::of(0..POOL);
    prop_oneof![
        (node.clone(), parent.clone()).prop_map(|(n, p)| Op::AddCohort(n, p)),
        (node.clone(), parent.clone()).prop_map(|(n, p)| Op::AddQueue(n, p)),
        (node.clone(), parent).prop_map(|(n, p)| Op::Reparent(n, p)),
        node.prop_map(Op::Remove),
    ]
}

fn apply(m: &mut TestManager, op: &Op) -> Result<(), HierarchyError> {
    match op {
        Op::AddCohort(n, p) => m.add_cohort(cohort(node_name(*n).as_str()), p.map(node_name).as_ref()),
        Op::AddQueue(n, p) => m.add_queue(queue(node_name(*n).as_str()), p.map(node_name).as_ref()),
        Op::Reparent(n, p) => m.update_parent(&node_name(*n), p.map(node_name).as_ref()),
        Op::Remove(n) => m.remove(&node_name(*n)).map(|_| ()),
    }
}

proptest! {
    #[test]
    fn random_operations_keep_forest_symmetric(ops in proptest::collection::vec(op_strategy(), 1..64)) {
        let mut m = TestManager::new();
        for op in &ops {
            let before = structure(&m);
            let result = apply(&mut m, op);
            if result.is_err() {
                prop_assert_eq!(structure(&m), before, "rejected {:?} changed the tree", op);
            }
            prop_assert!(m.check_invariants().is_ok(), "invariants broken after {:?}", op);

            for node in m.queue_ids().iter().chain(m.cohort_ids().iter()) {
                // Symmetry: every child names its parent, every parent lists its child.
                for child in m.children_of(node).unwrap() {
                    prop_assert_eq!(m.parent_of(&child).unwrap(), Some(node));
                }
                if let Some(parent) = m.parent_of(node).unwrap() {
                    prop_assert!(m.children_of(parent).unwrap().contains(node));
                }
                // Acyclicity: the path terminates at a root with no repeats.
                let path = m.path_to_root(node).unwrap();
                let root = path.last().unwrap();
                prop_assert!(m.parent_of(root).unwrap().is_none());
            }
        }
    }
}
