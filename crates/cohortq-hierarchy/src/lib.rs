//! cohortq hierarchy - the tree of quota-holding nodes
//!
//! Owns the structure of the quota hierarchy, independent of what a queue
//! or cohort carries:
//! - A node capability set shared by leaf queues and internal cohorts
//! - Cohort membership (child queues and child cohorts)
//! - A generic manager that attaches, re-parents and removes nodes while
//!   keeping the parent relation a forest

pub mod cohort;
pub mod manager;
pub mod node;

pub use cohort::{Cohort, CohortNode};
pub use manager::{Manager, Removed};
pub use node::{Node, NodeHeader};

use cohortq_protocol::{NodeId, NodeKind};
use thiserror::Error;

/// Errors originating from the hierarchy layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("Node already exists: {0}")]
    DuplicateId(NodeId),

    #[error("Unknown parent {parent} for node {id}")]
    UnknownParent { id: NodeId, parent: NodeId },

    #[error("Parent {parent} of node {id} is not a cohort")]
    InvalidParent { id: NodeId, parent: NodeId },

    #[error("Attaching {id} under {parent} would create a cycle")]
    Cycle { id: NodeId, parent: NodeId },

    #[error("Cohort {id} still has {children} children")]
    HasChildren { id: NodeId, children: usize },

    #[error("Node not found: {0}")]
    NotFound(NodeId),

    #[error("Node {id} is not a {expected}")]
    WrongKind { id: NodeId, expected: NodeKind },

    #[error("Hierarchy corrupted: {0}")]
    Corrupted(String),
}
