//! The leaf node: a cluster queue with declared quota and admitted usage.

use cohortq_hierarchy::{Node, NodeHeader};
use cohortq_protocol::{
    flavor_resources, validate_resource_groups, validate_weight, FlavorResource, NodeId, Quantity,
    ResourceGroup,
};

use crate::resource_node::{QuotaLimits, ResourceNode};
use crate::QuotaError;

#[derive(Debug, Clone)]
pub struct ClusterQueue {
    header: NodeHeader,
    resource_groups: Vec<ResourceGroup>,
    fair_share_weight: f64,
    node: ResourceNode,
}

impl ClusterQueue {
    /// Build a queue from validated resource groups and weight.
    pub fn new(
        id: NodeId,
        resource_groups: Vec<ResourceGroup>,
        fair_share_weight: f64,
    ) -> Result<Self, QuotaError> {
        validate_resource_groups(&resource_groups)?;
        let fair_share_weight = validate_weight(fair_share_weight)?;
        Ok(Self {
            header: NodeHeader::new(id),
            node: ResourceNode::from_groups(&resource_groups),
            resource_groups,
            fair_share_weight,
        })
    }

    pub fn resource_groups(&self) -> &[ResourceGroup] {
        &self.resource_groups
    }

    pub fn fair_share_weight(&self) -> f64 {
        self.fair_share_weight
    }

    pub fn resource_node(&self) -> &ResourceNode {
        &self.node
    }

    /// Declared (flavor, resource) pairs in declaration order.
    pub fn flavor_resources(&self) -> Vec<FlavorResource> {
        flavor_resources(&self.resource_groups)
            .into_iter()
            .map(|(fr, _)| fr)
            .collect()
    }

    /// Nominal quota and limits for a declared pair.
    pub fn quota(&self, fr: &FlavorResource) -> Result<QuotaLimits, QuotaError> {
        self.node
            .limits(fr)
            .copied()
            .ok_or_else(|| self.undeclared(fr))
    }

    /// Admitted usage; 0 for pairs never admitted.
    pub fn usage(&self, fr: &FlavorResource) -> Quantity {
        self.node.usage(fr)
    }

    /// Usage above nominal quota.
    pub fn borrowed(&self, fr: &FlavorResource) -> Quantity {
        let nominal = self.node.limits(fr).map(|l| l.nominal).unwrap_or(0);
        self.usage(fr).saturating_sub(nominal).max(0)
    }

    pub fn is_borrowing(&self, fr: &FlavorResource) -> bool {
        self.borrowed(fr) > 0
    }

    pub(crate) fn undeclared(&self, fr: &FlavorResource) -> QuotaError {
        QuotaError::ResourceNotFound {
            queue: self.header.id().clone(),
            flavor_resource: fr.clone(),
        }
    }

    pub(crate) fn record_admission(&mut self, fr: &FlavorResource, amount: Quantity) {
        let usage = self.node.usage(fr).saturating_add(amount);
        self.node.set_usage(fr, usage);
    }

    /// Release saturates at zero; returns the amount actually released.
    pub(crate) fn record_release(&mut self, fr: &FlavorResource, amount: Quantity) -> Quantity {
        let current = self.node.usage(fr);
        let released = amount.min(current);
        self.node.set_usage(fr, current - released);
        released
    }

    /// Replace quota declarations and weight. Usage recorded for pairs that
    /// stay declared is kept; usage of dropped pairs is discarded.
    pub(crate) fn set_spec(&mut self, resource_groups: Vec<ResourceGroup>, fair_share_weight: f64) {
        let mut node = ResourceNode::from_groups(&resource_groups);
        for fr in node.flavor_resources() {
            let usage = self.node.usage(&fr);
            if usage > 0 {
                node.set_usage(&fr, usage);
            }
        }
        self.node = node;
        self.resource_groups = resource_groups;
        self.fair_share_weight = fair_share_weight;
    }

    /// Whether `set_spec` with these arguments would change anything.
    pub(crate) fn spec_differs(&self, resource_groups: &[ResourceGroup], fair_share_weight: f64) -> bool {
        self.resource_groups != resource_groups || self.fair_share_weight != fair_share_weight
    }
}

impl Node for ClusterQueue {
    fn header(&self) -> &NodeHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut NodeHeader {
        &mut self.header
    }
}
