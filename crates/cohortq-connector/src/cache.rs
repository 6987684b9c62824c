//! Thread-safe facade over the quota tree.
//!
//! Queries take the shared lock; structural changes and usage updates take
//! the exclusive lock. A corrupted hierarchy is a programming fault and
//! panics instead of being returned to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use cohortq_hierarchy::HierarchyError;
use cohortq_protocol::{FlavorResource, NodeId, NodeKind, Quantity, ResourceGroup};
use cohortq_quota::{Change, FairShareRank, QuotaError, QuotaLimits, QuotaTree, TreeStatus};

#[derive(Debug, Clone, Default)]
pub struct QuotaCache {
    tree: Arc<RwLock<QuotaTree>>,
}

/// Panic on corruption; pass every other result through.
fn surface<T>(result: Result<T, QuotaError>) -> Result<T, QuotaError> {
    if let Err(QuotaError::Hierarchy(HierarchyError::Corrupted(reason))) = &result {
        tracing::error!(reason = %reason, "Quota tree corrupted");
        panic!("quota tree corrupted: {reason}");
    }
    result
}

impl QuotaCache {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Structure --

    pub fn upsert_cohort(&self, id: &NodeId, parent: Option<&NodeId>) -> Result<Change, QuotaError> {
        surface(self.tree.write().upsert_cohort(id, parent))
    }

    pub fn upsert_queue(
        &self,
        id: &NodeId,
        parent: Option<&NodeId>,
        resource_groups: Vec<ResourceGroup>,
        fair_share_weight: f64,
    ) -> Result<Change, QuotaError> {
        surface(
            self.tree
                .write()
                .upsert_queue(id, parent, resource_groups, fair_share_weight),
        )
    }

    pub fn delete(&self, id: &NodeId) -> Result<NodeKind, QuotaError> {
        surface(self.tree.write().delete(id))
    }

    pub fn mark_pending_deletion(&self, id: &NodeId) -> Result<(), QuotaError> {
        surface(self.tree.write().mark_pending_deletion(id))
    }

    pub fn reap_pending(&self) -> Result<Vec<NodeId>, QuotaError> {
        surface(self.tree.write().reap_pending())
    }

    // -- Usage --

    pub fn admit(&self, id: &NodeId, fr: &FlavorResource, amount: Quantity) -> Result<Quantity, QuotaError> {
        surface(self.tree.write().admit(id, fr, amount))
    }

    pub fn release(&self, id: &NodeId, fr: &FlavorResource, amount: Quantity) -> Result<Quantity, QuotaError> {
        surface(self.tree.write().release(id, fr, amount))
    }

    // -- Queries --

    pub fn effective_capacity(&self, id: &NodeId) -> Result<BTreeMap<FlavorResource, Quantity>, QuotaError> {
        surface(self.tree.read().effective_capacity(id))
    }

    pub fn available(&self, id: &NodeId, fr: &FlavorResource) -> Result<Quantity, QuotaError> {
        surface(self.tree.read().available(id, fr))
    }

    pub fn fair_share_rank(&self, id: &NodeId) -> Result<FairShareRank, QuotaError> {
        surface(self.tree.read().fair_share_rank(id))
    }

    pub fn rank_queues(&self, ids: &[NodeId]) -> Result<Vec<FairShareRank>, QuotaError> {
        surface(self.tree.read().rank_queues(ids))
    }

    pub fn usage(&self, id: &NodeId, fr: &FlavorResource) -> Result<Quantity, QuotaError> {
        surface(self.tree.read().usage(id, fr))
    }

    pub fn quota(&self, id: &NodeId, fr: &FlavorResource) -> Result<QuotaLimits, QuotaError> {
        let tree = self.tree.read();
        tree.queue(id)?.quota(fr)
    }

    pub fn path_to_root(&self, id: &NodeId) -> Result<Vec<NodeId>, QuotaError> {
        surface(self.tree.read().path_to_root(id))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.tree.read().hierarchy().contains(id)
    }

    pub fn queue_ids(&self) -> Vec<NodeId> {
        self.tree.read().hierarchy().queue_ids()
    }

    pub fn pending_deletion(&self) -> Vec<NodeId> {
        self.tree.read().hierarchy().pending_deletion()
    }

    pub fn status(&self) -> Result<TreeStatus, QuotaError> {
        surface(self.tree.read().status())
    }

    /// A consistent copy of the whole tree, for one scheduling cycle.
    pub fn snapshot(&self) -> QuotaTree {
        self.tree.read().clone()
    }

    /// Full invariant check, including a recomputation of every cached
    /// aggregate. Panics on violation.
    pub fn check_invariants(&self) {
        if let Err(err) = self.tree.read().check_invariants() {
            tracing::error!(error = %err, "Quota tree invariant violated");
            panic!("quota tree invariant violated: {err}");
        }
    }
}
