use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_FAIR_SHARE_WEIGHT;
use crate::error::ProtocolError;
use crate::identity::NodeId;
use crate::types::ResourceGroup;

/// A node definition pushed by the configuration source.
///
/// Events are idempotent notifications: applying the same event twice
/// leaves the hierarchy as applying it once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigEvent {
    UpsertCohort {
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<NodeId>,
    },
    UpsertQueue {
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<NodeId>,
        #[serde(default)]
        resource_groups: Vec<ResourceGroup>,
        #[serde(default = "default_weight")]
        fair_share_weight: f64,
    },
    Delete {
        id: NodeId,
    },
}

fn default_weight() -> f64 {
    DEFAULT_FAIR_SHARE_WEIGHT
}

impl ConfigEvent {
    /// The node this event is about.
    pub fn node_id(&self) -> &NodeId {
        match self {
            ConfigEvent::UpsertCohort { id, .. }
            | ConfigEvent::UpsertQueue { id, .. }
            | ConfigEvent::Delete { id } => id,
        }
    }

    /// The parent this event references, if any.
    pub fn parent(&self) -> Option<&NodeId> {
        match self {
            ConfigEvent::UpsertCohort { parent, .. } | ConfigEvent::UpsertQueue { parent, .. } => {
                parent.as_ref()
            }
            ConfigEvent::Delete { .. } => None,
        }
    }

    /// Short name of the event kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigEvent::UpsertCohort { .. } => "upsert_cohort",
            ConfigEvent::UpsertQueue { .. } => "upsert_queue",
            ConfigEvent::Delete { .. } => "delete",
        }
    }
}

/// A configuration event as received by the sync actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    /// Number of times the event was applied and parked again.
    pub attempts: u32,
    pub event: ConfigEvent,
}

impl EventEnvelope {
    pub fn new(event: ConfigEvent) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            received_at: chrono::Utc::now(),
            attempts: 0,
            event,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}
