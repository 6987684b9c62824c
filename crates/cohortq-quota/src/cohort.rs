//! The internal node: a cohort with membership and cached aggregates.

use cohortq_hierarchy::{Cohort, CohortNode, Node, NodeHeader};
use cohortq_protocol::NodeId;

use crate::resource_node::ResourceNode;

#[derive(Debug, Clone)]
pub struct QuotaCohort {
    header: NodeHeader,
    members: Cohort,
    node: ResourceNode,
}

impl QuotaCohort {
    pub fn new(id: NodeId) -> Self {
        Self {
            header: NodeHeader::new(id),
            members: Cohort::new(),
            node: ResourceNode::new(),
        }
    }

    /// Aggregated subtree quota and usage.
    pub fn resource_node(&self) -> &ResourceNode {
        &self.node
    }

    pub(crate) fn resource_node_mut(&mut self) -> &mut ResourceNode {
        &mut self.node
    }
}

impl Node for QuotaCohort {
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

impl CohortNode for QuotaCohort {
    fn cohort(&self) -> &Cohort {
        &self.members
    }

    fn cohort_mut(&mut self) -> &mut Cohort {
        &mut self.members
    }
}
