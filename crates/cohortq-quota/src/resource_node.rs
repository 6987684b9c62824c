//! Per-node quota bookkeeping.
//!
//! Every node, queue or cohort, carries a [`ResourceNode`]:
//! - `subtree_quota`: capacity stored at this node. For a queue this is its
//!   nominal quota; for a cohort, the sum of what its children lend upwards.
//! - `usage`: for a queue, admitted usage; for a cohort, the part of its
//!   children's usage that draws on shared capacity.
//!
//! A node lends `subtree_quota - guaranteed` to its parent and charges
//! `max(0, usage - guaranteed)` against it, where `guaranteed` is the part of
//! its quota the lending limit keeps back. Cohorts have no limits, so they
//! pass their aggregates through unchanged.

use std::collections::{BTreeSet, HashMap};
use std::ops::Sub;

use cohortq_protocol::{flavor_resources, FlavorResource, Quantity, ResourceGroup};

/// The quota line declared for one (flavor, resource) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub nominal: Quantity,
    pub borrowing_limit: Option<Quantity>,
    pub lending_limit: Option<Quantity>,
}

/// What a node adds to its parent's aggregates for one pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Contribution {
    pub lendable: Quantity,
    pub charged: Quantity,
}

impl Contribution {
    pub fn is_zero(&self) -> bool {
        self.lendable == 0 && self.charged == 0
    }

    pub fn negate(self) -> Self {
        Self {
            lendable: -self.lendable,
            charged: -self.charged,
        }
    }
}

impl Sub for Contribution {
    type Output = Contribution;

    fn sub(self, rhs: Self) -> Self::Output {
        Contribution {
            lendable: self.lendable.saturating_sub(rhs.lendable),
            charged: self.charged.saturating_sub(rhs.charged),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceNode {
    quotas: HashMap<FlavorResource, QuotaLimits>,
    subtree_quota: HashMap<FlavorResource, Quantity>,
    usage: HashMap<FlavorResource, Quantity>,
}

impl ResourceNode {
    /// An empty node, as used by cohorts.
    pub fn new() -> Self {
        Self::default()
    }

    /// A leaf node whose stored capacity is its declared nominal quota.
    pub fn from_groups(groups: &[ResourceGroup]) -> Self {
        let mut node = Self::new();
        for (fr, quota) in flavor_resources(groups) {
            node.quotas.insert(
                fr.clone(),
                QuotaLimits {
                    nominal: quota.nominal_quota,
                    borrowing_limit: quota.borrowing_limit,
                    lending_limit: quota.lending_limit,
                },
            );
            node.subtree_quota.insert(fr, quota.nominal_quota);
        }
        node
    }

    pub fn limits(&self, fr: &FlavorResource) -> Option<&QuotaLimits> {
        self.quotas.get(fr)
    }

    pub fn declares(&self, fr: &FlavorResource) -> bool {
        self.quotas.contains_key(fr)
    }

    pub fn borrowing_limit(&self, fr: &FlavorResource) -> Option<Quantity> {
        self.quotas.get(fr).and_then(|q| q.borrowing_limit)
    }

    pub fn subtree_quota(&self, fr: &FlavorResource) -> Quantity {
        self.subtree_quota.get(fr).copied().unwrap_or(0)
    }

    pub fn usage(&self, fr: &FlavorResource) -> Quantity {
        self.usage.get(fr).copied().unwrap_or(0)
    }

    /// Capacity this node never lends to its parent.
    pub fn guaranteed_quota(&self, fr: &FlavorResource) -> Quantity {
        match self.quotas.get(fr).and_then(|q| q.lending_limit) {
            Some(limit) => self.subtree_quota(fr).saturating_sub(limit).max(0),
            None => 0,
        }
    }

    pub fn contribution(&self, fr: &FlavorResource) -> Contribution {
        let guaranteed = self.guaranteed_quota(fr);
        Contribution {
            lendable: self.subtree_quota(fr).saturating_sub(guaranteed),
            charged: self.usage(fr).saturating_sub(guaranteed).max(0),
        }
    }

    /// Every pair this node declares or aggregates, sorted.
    pub fn flavor_resources(&self) -> BTreeSet<FlavorResource> {
        self.quotas
            .keys()
            .chain(self.subtree_quota.keys())
            .chain(self.usage.keys())
            .cloned()
            .collect()
    }

    /// Fold a child's contribution change into this node's aggregates.
    pub(crate) fn apply(&mut self, fr: &FlavorResource, delta: Contribution) {
        let stored = self.subtree_quota.entry(fr.clone()).or_insert(0);
        *stored = stored.saturating_add(delta.lendable);
        let used = self.usage.entry(fr.clone()).or_insert(0);
        *used = used.saturating_add(delta.charged);
        self.prune(fr);
    }

    pub(crate) fn set_usage(&mut self, fr: &FlavorResource, value: Quantity) {
        self.usage.insert(fr.clone(), value);
        self.prune(fr);
    }

    /// Drop all-zero aggregates for pairs this node does not declare, so
    /// equal trees compare equal regardless of history.
    fn prune(&mut self, fr: &FlavorResource) {
        if self.quotas.contains_key(fr) {
            return;
        }
        if self.subtree_quota(fr) == 0 && self.usage(fr) == 0 {
            self.subtree_quota.remove(fr);
            self.usage.remove(fr);
        }
    }
}
