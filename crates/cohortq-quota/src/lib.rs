//! cohortq quota - capacity accounting over the quota hierarchy
//!
//! Builds on the hierarchy crate with concrete node payloads:
//! - `ClusterQueue` leaves declaring nominal quota, borrowing and lending limits
//! - Cohorts caching the quota lent and the usage charged by their subtree
//! - A `QuotaTree` that keeps those aggregates current on every mutation and
//!   answers effective-capacity and admission queries from them
//! - Dominant-resource fair-share ranking

pub mod cohort;
pub mod fair_share;
pub mod queue;
pub mod resource_node;
pub mod status;
pub mod tree;

pub use cohort::QuotaCohort;
pub use fair_share::FairShareRank;
pub use queue::ClusterQueue;
pub use resource_node::{Contribution, QuotaLimits, ResourceNode};
pub use status::{AggregateStatus, CohortStatus, QueueStatus, ResourceStatus, TreeStatus};
pub use tree::{Change, QuotaTree};

use cohortq_hierarchy::HierarchyError;
use cohortq_protocol::{FlavorResource, NodeId, ProtocolError, Quantity};
use thiserror::Error;

/// Errors originating from the quota layer.
#[derive(Error, Debug)]
pub enum QuotaError {
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Queue {queue} does not declare {flavor_resource}")]
    ResourceNotFound {
        queue: NodeId,
        flavor_resource: FlavorResource,
    },

    #[error("Admitting {requested} of {flavor_resource} to queue {queue} exceeds available {available}")]
    CapacityExceeded {
        queue: NodeId,
        flavor_resource: FlavorResource,
        requested: Quantity,
        available: Quantity,
    },
}

impl QuotaError {
    /// Whether the error names a parent that may simply not have arrived yet.
    pub fn is_unknown_parent(&self) -> bool {
        matches!(self, QuotaError::Hierarchy(HierarchyError::UnknownParent { .. }))
    }
}
