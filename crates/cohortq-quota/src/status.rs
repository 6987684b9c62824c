//! Serializable views of the tree, for logs and inspection.

use cohortq_protocol::{FlavorResource, NodeId, Quantity};
use serde::Serialize;

use crate::fair_share::FairShareRank;

#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub flavor_resource: FlavorResource,
    pub nominal: Quantity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub borrowing_limit: Option<Quantity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lending_limit: Option<Quantity>,
    pub usage: Quantity,
    pub borrowed: Quantity,
    pub available: Quantity,
    pub effective_capacity: Quantity,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub fair_share_weight: f64,
    pub fair_share: FairShareRank,
    pub resources: Vec<ResourceStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateStatus {
    pub flavor_resource: FlavorResource,
    pub subtree_quota: Quantity,
    pub usage: Quantity,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortStatus {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub pending_deletion: bool,
    pub children: Vec<NodeId>,
    pub resources: Vec<AggregateStatus>,
}

/// Every node of the tree, sorted by id within each kind.
#[derive(Debug, Clone, Serialize)]
pub struct TreeStatus {
    pub cohorts: Vec<CohortStatus>,
    pub queues: Vec<QueueStatus>,
}
