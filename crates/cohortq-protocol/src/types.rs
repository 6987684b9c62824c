use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_NOMINAL_QUOTA;
use crate::error::ProtocolError;
use crate::identity::{FlavorName, FlavorResource, ResourceName};

/// An amount of a resource in its smallest unit (millicores, bytes, ...).
pub type Quantity = i64;

/// Lifecycle state of a node in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Known, but not linked to a parent. Only valid for roots.
    Unattached,
    /// Linked under a parent cohort.
    Attached,
    /// Deleted by the configuration source while it still had children.
    /// Stays reachable until the last child leaves.
    PendingDeletion,
}

/// The two concrete node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Queue,
    Cohort,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Queue => write!(f, "queue"),
            NodeKind::Cohort => write!(f, "cohort"),
        }
    }
}

/// Quota declared for one resource of one flavor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub name: ResourceName,
    /// Capacity the queue can always use without borrowing.
    pub nominal_quota: Quantity,
    /// How much beyond nominal the queue may borrow. `None` = unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub borrowing_limit: Option<Quantity>,
    /// How much of the nominal quota others may borrow. `None` = unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lending_limit: Option<Quantity>,
}

impl ResourceQuota {
    pub fn new(name: impl Into<String>, nominal_quota: Quantity) -> Self {
        Self {
            name: ResourceName::new(name),
            nominal_quota,
            borrowing_limit: None,
            lending_limit: None,
        }
    }

    pub fn with_borrowing_limit(mut self, limit: Quantity) -> Self {
        self.borrowing_limit = Some(limit);
        self
    }

    pub fn with_lending_limit(mut self, limit: Quantity) -> Self {
        self.lending_limit = Some(limit);
        self
    }
}

/// The quota lines a queue declares for one flavor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorQuota {
    pub flavor: FlavorName,
    pub resources: Vec<ResourceQuota>,
}

impl FlavorQuota {
    pub fn new(flavor: impl Into<String>, resources: Vec<ResourceQuota>) -> Self {
        Self {
            flavor: FlavorName::new(flavor),
            resources,
        }
    }
}

/// A set of resources that are always assigned flavors together, with the
/// flavors tried in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub covered_resources: Vec<ResourceName>,
    pub flavors: Vec<FlavorQuota>,
}

impl ResourceGroup {
    pub fn new(covered_resources: &[&str], flavors: Vec<FlavorQuota>) -> Self {
        Self {
            covered_resources: covered_resources.iter().map(|r| ResourceName::new(*r)).collect(),
            flavors,
        }
    }

    /// Single-flavor, single-resource group; the common case in tests and
    /// small topologies.
    pub fn single(flavor: &str, quota: ResourceQuota) -> Self {
        Self {
            covered_resources: vec![quota.name.clone()],
            flavors: vec![FlavorQuota::new(flavor, vec![quota])],
        }
    }
}

/// Validate a queue's resource groups.
///
/// Rules:
/// - every group covers at least one resource
/// - a resource is covered by at most one group
/// - a flavor appears in at most one group
/// - each flavor lists exactly its group's covered resources
/// - quantities are non-negative and a lending limit does not exceed nominal
pub fn validate_resource_groups(groups: &[ResourceGroup]) -> Result<(), ProtocolError> {
    let mut seen_resources: HashSet<&ResourceName> = HashSet::new();
    let mut seen_flavors: HashSet<&FlavorName> = HashSet::new();

    for (idx, group) in groups.iter().enumerate() {
        if group.covered_resources.is_empty() {
            return Err(ProtocolError::InvalidQuota(format!(
                "resource group {idx} covers no resources"
            )));
        }

        let covered: HashSet<&ResourceName> = group.covered_resources.iter().collect();
        if covered.len() != group.covered_resources.len() {
            return Err(ProtocolError::InvalidQuota(format!(
                "resource group {idx} lists a resource twice"
            )));
        }
        for resource in &group.covered_resources {
            if !seen_resources.insert(resource) {
                return Err(ProtocolError::InvalidQuota(format!(
                    "resource {resource} is covered by more than one group"
                )));
            }
        }

        for flavor in &group.flavors {
            if !seen_flavors.insert(&flavor.flavor) {
                return Err(ProtocolError::InvalidQuota(format!(
                    "flavor {} appears in more than one group",
                    flavor.flavor
                )));
            }

            let listed: HashSet<&ResourceName> = flavor.resources.iter().map(|r| &r.name).collect();
            if listed != covered || listed.len() != flavor.resources.len() {
                return Err(ProtocolError::InvalidQuota(format!(
                    "flavor {} must list exactly the resources of group {idx}",
                    flavor.flavor
                )));
            }

            for quota in &flavor.resources {
                validate_resource_quota(&flavor.flavor, quota)?;
            }
        }
    }

    Ok(())
}

fn validate_resource_quota(flavor: &FlavorName, quota: &ResourceQuota) -> Result<(), ProtocolError> {
    let line = format!("{}/{}", flavor, quota.name);
    if quota.nominal_quota < 0 {
        return Err(ProtocolError::InvalidQuota(format!(
            "{line}: negative nominal quota {}",
            quota.nominal_quota
        )));
    }
    if quota.nominal_quota > MAX_NOMINAL_QUOTA {
        return Err(ProtocolError::InvalidQuota(format!(
            "{line}: nominal quota {} exceeds {MAX_NOMINAL_QUOTA}",
            quota.nominal_quota
        )));
    }
    if let Some(limit) = quota.borrowing_limit {
        if limit < 0 {
            return Err(ProtocolError::InvalidQuota(format!(
                "{line}: negative borrowing limit {limit}"
            )));
        }
    }
    if let Some(limit) = quota.lending_limit {
        if limit < 0 {
            return Err(ProtocolError::InvalidQuota(format!(
                "{line}: negative lending limit {limit}"
            )));
        }
        if limit > quota.nominal_quota {
            return Err(ProtocolError::InvalidQuota(format!(
                "{line}: lending limit {limit} exceeds nominal quota {}",
                quota.nominal_quota
            )));
        }
    }
    Ok(())
}

/// Flatten resource groups into their quota lines, in declaration order.
pub fn flavor_resources(groups: &[ResourceGroup]) -> Vec<(FlavorResource, &ResourceQuota)> {
    groups
        .iter()
        .flat_map(|group| group.flavors.iter())
        .flat_map(|flavor| {
            flavor.resources.iter().map(move |quota| {
                (
                    FlavorResource {
                        flavor: flavor.flavor.clone(),
                        resource: quota.name.clone(),
                    },
                    quota,
                )
            })
        })
        .collect()
}

/// Validate a fair-share weight: finite and non-negative.
pub fn validate_weight(weight: f64) -> Result<f64, ProtocolError> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(ProtocolError::InvalidWeight(weight));
    }
    Ok(weight)
}

/// Validate an admission or release amount.
pub fn validate_quantity(amount: Quantity) -> Result<Quantity, ProtocolError> {
    if amount < 0 {
        return Err(ProtocolError::NegativeQuantity(amount));
    }
    Ok(amount)
}
