//! The quota tree: hierarchy structure plus cached quota aggregates.
//!
//! Every mutation that changes what a node contributes to its parent
//! (admission, release, quota change, re-parent, insert, delete) pushes
//! the difference up the ancestor chain, stopping as soon as it vanishes.
//! Queries therefore never recompute subtrees; they walk one root path.

use std::collections::BTreeMap;

use cohortq_hierarchy::{HierarchyError, Manager, Node, Removed};
use cohortq_protocol::{
    validate_quantity, validate_resource_groups, validate_weight, FlavorResource, NodeId,
    NodeKind, NodeState, Quantity, ResourceGroup,
};

use crate::cohort::QuotaCohort;
use crate::fair_share::{self, FairShareRank};
use crate::queue::ClusterQueue;
use crate::resource_node::{Contribution, ResourceNode};
use crate::status::{AggregateStatus, CohortStatus, QueueStatus, ResourceStatus, TreeStatus};
use crate::QuotaError;

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct QuotaTree {
    hierarchy: Manager<ClusterQueue, QuotaCohort>,
}

impl QuotaTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hierarchy(&self) -> &Manager<ClusterQueue, QuotaCohort> {
        &self.hierarchy
    }

    pub fn queue(&self, id: &NodeId) -> Result<&ClusterQueue, QuotaError> {
        Ok(self.hierarchy.queue(id)?)
    }

    pub fn cohort(&self, id: &NodeId) -> Result<&QuotaCohort, QuotaError> {
        Ok(self.hierarchy.cohort(id)?)
    }

    pub fn path_to_root(&self, id: &NodeId) -> Result<Vec<NodeId>, QuotaError> {
        Ok(self.hierarchy.path_to_root(id)?)
    }

    // ═══════════════════════════════════════════════════════════════
    // Structure
    // ═══════════════════════════════════════════════════════════════

    /// Create a cohort, or move an existing one. Re-upserting a cohort
    /// pending deletion revives it.
    pub fn upsert_cohort(&mut self, id: &NodeId, parent: Option<&NodeId>) -> Result<Change, QuotaError> {
        match self.hierarchy.kind_of(id) {
            None => {
                self.hierarchy.add_cohort(QuotaCohort::new(id.clone()), parent)?;
                tracing::info!(cohort = %id, parent = ?parent, "Cohort created");
                Ok(Change::Created)
            }
            Some(NodeKind::Queue) => Err(HierarchyError::WrongKind {
                id: id.clone(),
                expected: NodeKind::Cohort,
            }
            .into()),
            Some(NodeKind::Cohort) => {
                let moved = self.move_node(id, parent)?;
                let revived = self.hierarchy.state_of(id)? == NodeState::PendingDeletion;
                if revived {
                    self.hierarchy.clear_pending_deletion(id)?;
                    tracing::info!(cohort = %id, "Cohort revived");
                }
                Ok(if moved || revived {
                    Change::Updated
                } else {
                    Change::Unchanged
                })
            }
        }
    }

    /// Create a queue, or update an existing one's parent, quota and weight.
    ///
    /// All inputs are validated before anything changes. Usage recorded for
    /// pairs that stay declared survives the update.
    pub fn upsert_queue(
        &mut self,
        id: &NodeId,
        parent: Option<&NodeId>,
        resource_groups: Vec<ResourceGroup>,
        fair_share_weight: f64,
    ) -> Result<Change, QuotaError> {
        validate_resource_groups(&resource_groups)?;
        let fair_share_weight = validate_weight(fair_share_weight)?;

        match self.hierarchy.kind_of(id) {
            None => {
                let queue = ClusterQueue::new(id.clone(), resource_groups, fair_share_weight)?;
                let contributions = contributions(queue.resource_node());
                self.hierarchy.add_queue(queue, parent)?;
                for (fr, contribution) in &contributions {
                    self.propagate(parent, fr, *contribution)?;
                }
                tracing::info!(queue = %id, parent = ?parent, "Queue created");
                Ok(Change::Created)
            }
            Some(NodeKind::Cohort) => Err(HierarchyError::WrongKind {
                id: id.clone(),
                expected: NodeKind::Queue,
            }
            .into()),
            Some(NodeKind::Queue) => {
                let moved = self.move_node(id, parent)?;
                let queue = self.hierarchy.queue_mut(id)?;
                if !queue.spec_differs(&resource_groups, fair_share_weight) {
                    return Ok(if moved {
                        Change::Updated
                    } else {
                        Change::Unchanged
                    });
                }

                let before = contributions(queue.resource_node());
                queue.set_spec(resource_groups, fair_share_weight);
                let after = contributions(queue.resource_node());
                let parent = queue.parent().cloned();
                self.propagate_changes(parent.as_ref(), before, after)?;
                tracing::info!(queue = %id, weight = fair_share_weight, "Queue updated");
                Ok(Change::Updated)
            }
        }
    }

    /// Remove a queue, or an empty cohort. Returns the kind removed.
    pub fn delete(&mut self, id: &NodeId) -> Result<NodeKind, QuotaError> {
        let parent = self.hierarchy.parent_of(id)?.cloned();
        let contributions = contributions(self.resource_node(id)?);
        let kind = match self.hierarchy.remove(id)? {
            Removed::Queue(_) => NodeKind::Queue,
            Removed::Cohort(_) => NodeKind::Cohort,
        };
        for (fr, contribution) in &contributions {
            self.propagate(parent.as_ref(), fr, contribution.negate())?;
        }
        tracing::info!(node = %id, kind = %kind, "Node deleted");
        Ok(kind)
    }

    /// Keep a non-empty cohort in place until its last child leaves.
    pub fn mark_pending_deletion(&mut self, id: &NodeId) -> Result<(), QuotaError> {
        Ok(self.hierarchy.mark_pending_deletion(id)?)
    }

    /// Remove every cohort pending deletion that has become empty,
    /// repeating until none is left. Returns the removed ids.
    pub fn reap_pending(&mut self) -> Result<Vec<NodeId>, QuotaError> {
        let mut reaped = Vec::new();
        loop {
            let ready = self.hierarchy.deletable_pending();
            if ready.is_empty() {
                return Ok(reaped);
            }
            for id in ready {
                self.delete(&id)?;
                reaped.push(id);
            }
        }
    }

    /// Re-parent a node and move its contributions between ancestor chains.
    /// Returns whether the parent changed.
    fn move_node(&mut self, id: &NodeId, parent: Option<&NodeId>) -> Result<bool, QuotaError> {
        let old_parent = self.hierarchy.parent_of(id)?.cloned();
        if old_parent.as_ref() == parent {
            return Ok(false);
        }
        let contributions = contributions(self.resource_node(id)?);
        self.hierarchy.update_parent(id, parent)?;
        for (fr, contribution) in &contributions {
            self.propagate(old_parent.as_ref(), fr, contribution.negate())?;
            self.propagate(parent, fr, *contribution)?;
        }
        Ok(true)
    }

    fn resource_node(&self, id: &NodeId) -> Result<&ResourceNode, QuotaError> {
        match self.hierarchy.kind_of(id) {
            Some(NodeKind::Queue) => Ok(self.hierarchy.queue(id)?.resource_node()),
            Some(NodeKind::Cohort) => Ok(self.hierarchy.cohort(id)?.resource_node()),
            None => Err(HierarchyError::NotFound(id.clone()).into()),
        }
    }

    fn propagate_changes(
        &mut self,
        parent: Option<&NodeId>,
        before: Vec<(FlavorResource, Contribution)>,
        after: Vec<(FlavorResource, Contribution)>,
    ) -> Result<(), QuotaError> {
        let mut deltas: BTreeMap<FlavorResource, Contribution> = BTreeMap::new();
        for (fr, contribution) in before {
            deltas.insert(fr, contribution.negate());
        }
        for (fr, contribution) in after {
            let entry = deltas.entry(fr).or_default();
            *entry = contribution - entry.negate();
        }
        for (fr, delta) in &deltas {
            self.propagate(parent, fr, *delta)?;
        }
        Ok(())
    }

    /// Apply a child's contribution change to `from` and its ancestors.
    fn propagate(
        &mut self,
        from: Option<&NodeId>,
        fr: &FlavorResource,
        mut delta: Contribution,
    ) -> Result<(), QuotaError> {
        let mut current = from.cloned();
        while let Some(id) = current {
            if delta.is_zero() {
                break;
            }
            let cohort = self.hierarchy.lookup_cohort_mut(&id).ok_or_else(|| {
                HierarchyError::Corrupted(format!("ancestor {id} is not a cohort"))
            })?;
            let node = cohort.resource_node_mut();
            let before = node.contribution(fr);
            node.apply(fr, delta);
            delta = node.contribution(fr) - before;
            current = cohort.parent().cloned();
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // Capacity
    // ═══════════════════════════════════════════════════════════════

    fn declared_queue(&self, id: &NodeId, fr: &FlavorResource) -> Result<&ClusterQueue, QuotaError> {
        let queue = self.hierarchy.queue(id)?;
        if !queue.resource_node().declares(fr) {
            return Err(queue.undeclared(fr));
        }
        Ok(queue)
    }

    fn path_nodes(&self, id: &NodeId) -> Result<Vec<&ResourceNode>, QuotaError> {
        self.hierarchy
            .path_to_root(id)?
            .iter()
            .map(|n| self.resource_node(n))
            .collect()
    }

    /// How much more `id` can admit of `fr` right now: its unused
    /// guaranteed quota plus what its ancestors can still lend, capped by
    /// its borrowing limit. Negative when quota was reduced below usage.
    pub fn available(&self, id: &NodeId, fr: &FlavorResource) -> Result<Quantity, QuotaError> {
        self.declared_queue(id, fr)?;
        let nodes = self.path_nodes(id)?;
        let mut path = nodes.iter().rev();
        let root = path
            .next()
            .ok_or_else(|| HierarchyError::Corrupted(format!("empty path for {id}")))?;

        let mut available = root.subtree_quota(fr).saturating_sub(root.usage(fr));
        for node in path {
            let guaranteed = node.guaranteed_quota(fr);
            let usage = node.usage(fr);
            let local = guaranteed.saturating_sub(usage).max(0);
            let mut from_parent = available;
            if let Some(limit) = node.borrowing_limit(fr) {
                let stored = node.subtree_quota(fr).saturating_sub(guaranteed);
                let used = usage.saturating_sub(guaranteed).max(0);
                let ceiling = stored.saturating_sub(used).saturating_add(limit);
                from_parent = from_parent.min(ceiling);
            }
            available = local.saturating_add(from_parent);
        }
        Ok(available)
    }

    /// Capacity `id` could reach if every other queue were idle.
    pub fn potential_available(&self, id: &NodeId, fr: &FlavorResource) -> Result<Quantity, QuotaError> {
        self.declared_queue(id, fr)?;
        let nodes = self.path_nodes(id)?;
        let mut path = nodes.iter().rev();
        let root = path
            .next()
            .ok_or_else(|| HierarchyError::Corrupted(format!("empty path for {id}")))?;

        let mut potential = root.subtree_quota(fr);
        for node in path {
            potential = potential.saturating_add(node.guaranteed_quota(fr));
            if let Some(limit) = node.borrowing_limit(fr) {
                potential = potential.min(node.subtree_quota(fr).saturating_add(limit));
            }
        }
        Ok(potential)
    }

    /// Usage plus what can still be admitted; never negative.
    pub fn effective_capacity_for(&self, id: &NodeId, fr: &FlavorResource) -> Result<Quantity, QuotaError> {
        let usage = self.declared_queue(id, fr)?.usage(fr);
        Ok(usage.saturating_add(self.available(id, fr)?).max(0))
    }

    /// Effective capacity of every pair the queue declares.
    pub fn effective_capacity(&self, id: &NodeId) -> Result<BTreeMap<FlavorResource, Quantity>, QuotaError> {
        self.queue(id)?
            .flavor_resources()
            .into_iter()
            .map(|fr| {
                let capacity = self.effective_capacity_for(id, &fr)?;
                Ok((fr, capacity))
            })
            .collect()
    }

    pub fn usage(&self, id: &NodeId, fr: &FlavorResource) -> Result<Quantity, QuotaError> {
        Ok(self.declared_queue(id, fr)?.usage(fr))
    }

    pub fn cohort_usage(&self, id: &NodeId, fr: &FlavorResource) -> Result<Quantity, QuotaError> {
        Ok(self.cohort(id)?.resource_node().usage(fr))
    }

    pub fn cohort_subtree_quota(&self, id: &NodeId, fr: &FlavorResource) -> Result<Quantity, QuotaError> {
        Ok(self.cohort(id)?.resource_node().subtree_quota(fr))
    }

    // ═══════════════════════════════════════════════════════════════
    // Usage
    // ═══════════════════════════════════════════════════════════════

    /// Record `amount` of `fr` admitted to queue `id`, after checking it
    /// fits in what is available now. Returns the queue's new usage.
    pub fn admit(&mut self, id: &NodeId, fr: &FlavorResource, amount: Quantity) -> Result<Quantity, QuotaError> {
        validate_quantity(amount)?;
        let available = self.available(id, fr)?;
        if amount > available {
            tracing::debug!(
                queue = %id,
                flavor_resource = %fr,
                requested = amount,
                available,
                "Admission rejected"
            );
            return Err(QuotaError::CapacityExceeded {
                queue: id.clone(),
                flavor_resource: fr.clone(),
                requested: amount,
                available,
            });
        }

        let queue = self.hierarchy.queue_mut(id)?;
        let before = queue.resource_node().contribution(fr);
        queue.record_admission(fr, amount);
        let delta = queue.resource_node().contribution(fr) - before;
        let usage = queue.usage(fr);
        let parent = queue.parent().cloned();
        self.propagate(parent.as_ref(), fr, delta)?;

        tracing::debug!(queue = %id, flavor_resource = %fr, amount, usage, "Admitted");
        Ok(usage)
    }

    /// Release usage. Releasing more than is recorded clamps to zero.
    /// Returns the queue's new usage.
    pub fn release(&mut self, id: &NodeId, fr: &FlavorResource, amount: Quantity) -> Result<Quantity, QuotaError> {
        validate_quantity(amount)?;
        self.declared_queue(id, fr)?;

        let queue = self.hierarchy.queue_mut(id)?;
        let before = queue.resource_node().contribution(fr);
        let released = queue.record_release(fr, amount);
        let delta = queue.resource_node().contribution(fr) - before;
        let usage = queue.usage(fr);
        let parent = queue.parent().cloned();
        self.propagate(parent.as_ref(), fr, delta)?;

        if released < amount {
            tracing::warn!(
                queue = %id,
                flavor_resource = %fr,
                requested = amount,
                released,
                "Released more than was admitted"
            );
        } else {
            tracing::debug!(queue = %id, flavor_resource = %fr, amount, usage, "Released");
        }
        Ok(usage)
    }

    // ═══════════════════════════════════════════════════════════════
    // Fair share
    // ═══════════════════════════════════════════════════════════════

    /// Largest `usage / effective_capacity` over the queue's declared pairs.
    pub fn dominant_resource_share(&self, id: &NodeId) -> Result<(f64, Option<FlavorResource>), QuotaError> {
        let queue = self.queue(id)?;
        let mut entries = Vec::new();
        for fr in queue.flavor_resources() {
            let capacity = self.effective_capacity_for(id, &fr)?;
            entries.push((fr.clone(), queue.usage(&fr), capacity));
        }
        Ok(fair_share::dominant_share(entries))
    }

    pub fn fair_share_rank(&self, id: &NodeId) -> Result<FairShareRank, QuotaError> {
        let weight = self.queue(id)?.fair_share_weight();
        let (share, dominant) = self.dominant_resource_share(id)?;
        Ok(FairShareRank {
            queue: id.clone(),
            value: fair_share::weighted_share(share, weight),
            dominant,
        })
    }

    /// Ranks of the given queues, most entitled first.
    pub fn rank_queues(&self, ids: &[NodeId]) -> Result<Vec<FairShareRank>, QuotaError> {
        let mut ranks = ids
            .iter()
            .map(|id| self.fair_share_rank(id))
            .collect::<Result<Vec<_>, _>>()?;
        ranks.sort();
        Ok(ranks)
    }

    // ═══════════════════════════════════════════════════════════════
    // Status and invariants
    // ═══════════════════════════════════════════════════════════════

    pub fn queue_status(&self, id: &NodeId) -> Result<QueueStatus, QuotaError> {
        let queue = self.queue(id)?;
        let mut resources = Vec::new();
        for fr in queue.flavor_resources() {
            let limits = queue.quota(&fr)?;
            let available = self.available(id, &fr)?;
            resources.push(ResourceStatus {
                nominal: limits.nominal,
                borrowing_limit: limits.borrowing_limit,
                lending_limit: limits.lending_limit,
                usage: queue.usage(&fr),
                borrowed: queue.borrowed(&fr),
                available,
                effective_capacity: queue.usage(&fr).saturating_add(available).max(0),
                flavor_resource: fr,
            });
        }
        Ok(QueueStatus {
            id: id.clone(),
            parent: queue.parent().cloned(),
            fair_share_weight: queue.fair_share_weight(),
            fair_share: self.fair_share_rank(id)?,
            resources,
        })
    }

    pub fn cohort_status(&self, id: &NodeId) -> Result<CohortStatus, QuotaError> {
        let cohort = self.cohort(id)?;
        let node = cohort.resource_node();
        Ok(CohortStatus {
            id: id.clone(),
            parent: cohort.parent().cloned(),
            pending_deletion: cohort.state() == NodeState::PendingDeletion,
            children: cohort.children(),
            resources: node
                .flavor_resources()
                .into_iter()
                .map(|fr| AggregateStatus {
                    subtree_quota: node.subtree_quota(&fr),
                    usage: node.usage(&fr),
                    flavor_resource: fr,
                })
                .collect(),
        })
    }

    pub fn status(&self) -> Result<TreeStatus, QuotaError> {
        Ok(TreeStatus {
            cohorts: self
                .hierarchy
                .cohort_ids()
                .iter()
                .map(|id| self.cohort_status(id))
                .collect::<Result<_, _>>()?,
            queues: self
                .hierarchy
                .queue_ids()
                .iter()
                .map(|id| self.queue_status(id))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Verify the hierarchy invariants and that every cached cohort
    /// aggregate equals a from-scratch recomputation.
    pub fn check_invariants(&self) -> Result<(), QuotaError> {
        self.hierarchy.check_invariants()?;
        for queue in self.hierarchy.queues() {
            for fr in queue.resource_node().flavor_resources() {
                if queue.usage(&fr) < 0 {
                    return Err(HierarchyError::Corrupted(format!(
                        "negative usage of {fr} in queue {}",
                        queue.id()
                    ))
                    .into());
                }
            }
        }
        for cohort in self.hierarchy.cohorts() {
            let expected = self.recompute(cohort.id())?;
            if &expected != cohort.resource_node() {
                return Err(HierarchyError::Corrupted(format!(
                    "stale aggregates in cohort {}",
                    cohort.id()
                ))
                .into());
            }
        }
        Ok(())
    }

    fn recompute(&self, cohort: &NodeId) -> Result<ResourceNode, QuotaError> {
        let mut expected = ResourceNode::new();
        for child in self.hierarchy.children_of(cohort)? {
            let child_node = match self.hierarchy.kind_of(&child) {
                Some(NodeKind::Queue) => self.hierarchy.queue(&child)?.resource_node().clone(),
                _ => self.recompute(&child)?,
            };
            for (fr, contribution) in contributions(&child_node) {
                expected.apply(&fr, contribution);
            }
        }
        Ok(expected)
    }
}

fn contributions(node: &ResourceNode) -> Vec<(FlavorResource, Contribution)> {
    node.flavor_resources()
        .into_iter()
        .map(|fr| {
            let contribution = node.contribution(&fr);
            (fr, contribution)
        })
        .collect()
}
