//! TOML topology source.
//!
//! A topology file declares cohorts and queues:
//!
//! ```toml
//! [[cohorts]]
//! id = "root"
//!
//! [[cohorts]]
//! id = "team-a"
//! parent = "root"
//!
//! [[queues]]
//! id = "training"
//! parent = "team-a"
//! fair_share_weight = 2.0
//! quota = { cpu = 16000, memory = 64000 }
//! ```
//!
//! `quota` is shorthand for a single group in the default flavor. Queues
//! needing several flavors or limits spell out `resource_groups` instead.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use cohortq_protocol::{
    ConfigEvent, FlavorQuota, NodeId, Quantity, ResourceGroup, ResourceQuota, DEFAULT_FAIR_SHARE_WEIGHT,
    DEFAULT_FLAVOR,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub cohorts: Vec<CohortSpec>,
    #[serde(default)]
    pub queues: Vec<QueueSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortSpec {
    pub id: NodeId,
    #[serde(default)]
    pub parent: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub id: NodeId,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default = "default_weight")]
    pub fair_share_weight: f64,
    /// Resource name to nominal quota in the default flavor.
    #[serde(default)]
    pub quota: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub resource_groups: Vec<ResourceGroup>,
}

fn default_weight() -> f64 {
    DEFAULT_FAIR_SHARE_WEIGHT
}

impl QueueSpec {
    /// Explicit groups, followed by the `quota` shorthand if present.
    pub fn groups(&self) -> Vec<ResourceGroup> {
        let mut groups = self.resource_groups.clone();
        if !self.quota.is_empty() {
            let names: Vec<&str> = self.quota.keys().map(String::as_str).collect();
            let resources = self
                .quota
                .iter()
                .map(|(name, nominal)| ResourceQuota::new(name.as_str(), *nominal))
                .collect();
            groups.push(ResourceGroup::new(
                &names,
                vec![FlavorQuota::new(DEFAULT_FLAVOR, resources)],
            ));
        }
        groups
    }
}

impl Topology {
    pub fn parse(content: &str) -> Result<Self, anyhow::Error> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Upserts for every node, cohorts first, in declaration order.
    pub fn events(&self) -> Vec<ConfigEvent> {
        let cohorts = self.cohorts.iter().map(|c| ConfigEvent::UpsertCohort {
            id: c.id.clone(),
            parent: c.parent.clone(),
        });
        let queues = self.queues.iter().map(|q| ConfigEvent::UpsertQueue {
            id: q.id.clone(),
            parent: q.parent.clone(),
            resource_groups: q.groups(),
            fair_share_weight: q.fair_share_weight,
        });
        cohorts.chain(queues).collect()
    }

    /// Events turning `previous` into `self`: upserts for everything
    /// present, then deletes for nodes that disappeared, queues before
    /// cohorts. Upserts of unchanged nodes are no-ops downstream.
    pub fn diff(&self, previous: &Topology) -> Vec<ConfigEvent> {
        let mut events = self.events();

        let queues: BTreeSet<&NodeId> = self.queues.iter().map(|q| &q.id).collect();
        let cohorts: BTreeSet<&NodeId> = self.cohorts.iter().map(|c| &c.id).collect();

        events.extend(
            previous
                .queues
                .iter()
                .filter(|q| !queues.contains(&q.id))
                .map(|q| ConfigEvent::Delete { id: q.id.clone() }),
        );
        events.extend(
            previous
                .cohorts
                .iter()
                .filter(|c| !cohorts.contains(&c.id))
                .map(|c| ConfigEvent::Delete { id: c.id.clone() }),
        );
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[cohorts]]
        id = "root"

        [[cohorts]]
        id = "team-a"
        parent = "root"

        [[queues]]
        id = "training"
        parent = "team-a"
        fair_share_weight = 2.0
        quota = { cpu = 16, memory = 64 }

        [[queues]]
        id = "batch"
        parent = "root"

        [[queues.resource_groups]]
        covered_resources = ["gpu"]

        [[queues.resource_groups.flavors]]
        flavor = "a100"
        resources = [{ name = "gpu", nominal_quota = 8, borrowing_limit = 2 }]
    "#;

    #[test]
    fn test_parse_sample() {
        let topology = Topology::parse(SAMPLE).unwrap();
        assert_eq!(topology.cohorts.len(), 2);
        assert_eq!(topology.queues.len(), 2);
        assert_eq!(topology.queues[1].fair_share_weight, DEFAULT_FAIR_SHARE_WEIGHT);
    }

    #[test]
    fn test_quota_shorthand_builds_one_group() {
        let topology = Topology::parse(SAMPLE).unwrap();
        let groups = topology.queues[0].groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].covered_resources.len(), 2);
        assert_eq!(groups[0].flavors[0].flavor.as_str(), DEFAULT_FLAVOR);
        cohortq_protocol::validate_resource_groups(&groups).unwrap();
    }

    #[test]
    fn test_explicit_groups_keep_limits() {
        let topology = Topology::parse(SAMPLE).unwrap();
        let groups = topology.queues[1].groups();
        assert_eq!(groups[0].flavors[0].resources[0].borrowing_limit, Some(2));
    }

    #[test]
    fn test_events_order() {
        let topology = Topology::parse(SAMPLE).unwrap();
        let kinds: Vec<&str> = topology.events().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec!["upsert_cohort", "upsert_cohort", "upsert_queue", "upsert_queue"]
        );
    }

    #[test]
    fn test_diff_deletes_removed_nodes() {
        let previous = Topology::parse(SAMPLE).unwrap();
        let mut next = previous.clone();
        next.queues.retain(|q| q.id.as_str() != "training");
        next.cohorts.retain(|c| c.id.as_str() != "team-a");

        let events = next.diff(&previous);
        let deletes: Vec<&str> = events
            .iter()
            .filter(|e| e.kind() == "delete")
            .map(|e| e.node_id().as_str())
            .collect();
        assert_eq!(deletes, vec!["training", "team-a"]);
    }
}
