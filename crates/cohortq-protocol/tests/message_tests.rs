//! Tests for configuration-source events.
//!
//! Verifies:
//! - Event accessors (node id, parent, kind)
//! - JSON shape of each event variant
//! - Defaults applied to omitted fields
//! - Envelope construction and JSON round trip

use cohortq_protocol::constants::*;
use cohortq_protocol::identity::*;
use cohortq_protocol::messages::*;
use cohortq_protocol::types::*;

fn cpu_queue_event(id: &str, parent: Option<&str>) -> ConfigEvent {
    ConfigEvent::UpsertQueue {
        id: NodeId::from(id),
        parent: parent.map(NodeId::from),
        resource_groups: vec![ResourceGroup::single(
            DEFAULT_FLAVOR,
            ResourceQuota::new("cpu", 10),
        )],
        fair_share_weight: 1.0,
    }
}

// ═══════════════════════════════════════════════════════════════
// Accessors
// ═══════════════════════════════════════════════════════════════

#[test]
fn node_id_for_every_variant() {
    let cohort = ConfigEvent::UpsertCohort {
        id: NodeId::from("c1"),
        parent: None,
    };
    let queue = cpu_queue_event("q1", Some("c1"));
    let delete = ConfigEvent::Delete {
        id: NodeId::from("q1"),
    };

    assert_eq!(cohort.node_id().as_str(), "c1");
    assert_eq!(queue.node_id().as_str(), "q1");
    assert_eq!(delete.node_id().as_str(), "q1");
}

#[test]
fn parent_is_reported_for_upserts_only() {
    let queue = cpu_queue_event("q1", Some("c1"));
    assert_eq!(queue.parent(), Some(&NodeId::from("c1")));

    let root = ConfigEvent::UpsertCohort {
        id: NodeId::from("root"),
        parent: None,
    };
    assert!(root.parent().is_none());

    let delete = ConfigEvent::Delete {
        id: NodeId::from("c1"),
    };
    assert!(delete.parent().is_none());
}

#[test]
fn kind_names() {
    assert_eq!(cpu_queue_event("q", None).kind(), "upsert_queue");
    assert_eq!(
        ConfigEvent::UpsertCohort {
            id: NodeId::from("c"),
            parent: None
        }
        .kind(),
        "upsert_cohort"
    );
    assert_eq!(ConfigEvent::Delete { id: NodeId::from("c") }.kind(), "delete");
}

// ═══════════════════════════════════════════════════════════════
// JSON shape
// ═══════════════════════════════════════════════════════════════

#[test]
fn events_are_tagged_by_type() {
    let json = serde_json::to_value(cpu_queue_event("q1", Some("c1"))).unwrap();
    assert_eq!(json["type"], "upsert_queue");
    assert_eq!(json["id"], "q1");
    assert_eq!(json["parent"], "c1");
    assert_eq!(
        json["resource_groups"][0]["flavors"][0]["resources"][0]["nominal_quota"],
        10
    );
}

#[test]
fn root_cohort_omits_parent() {
    let event = ConfigEvent::UpsertCohort {
        id: NodeId::from("root"),
        parent: None,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert!(json.get("parent").is_none());
}

#[test]
fn omitted_weight_defaults_to_one() {
    let raw = r#"{"type":"upsert_queue","id":"q1","parent":"c1"}"#;
    let event: ConfigEvent = serde_json::from_str(raw).unwrap();
    match event {
        ConfigEvent::UpsertQueue {
            fair_share_weight,
            resource_groups,
            ..
        } => {
            assert_eq!(fair_share_weight, DEFAULT_FAIR_SHARE_WEIGHT);
            assert!(resource_groups.is_empty());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn omitted_limits_deserialize_as_none() {
    let raw = r#"{"name":"cpu","nominal_quota":4}"#;
    let quota: ResourceQuota = serde_json::from_str(raw).unwrap();
    assert_eq!(quota.nominal_quota, 4);
    assert!(quota.borrowing_limit.is_none());
    assert!(quota.lending_limit.is_none());
}

#[test]
fn unknown_event_type_is_rejected() {
    let raw = r#"{"type":"rename","id":"q1"}"#;
    assert!(serde_json::from_str::<ConfigEvent>(raw).is_err());
}

// ═══════════════════════════════════════════════════════════════
// Envelope
// ═══════════════════════════════════════════════════════════════

#[test]
fn envelope_has_uuid_and_no_attempts() {
    let envelope = EventEnvelope::new(cpu_queue_event("q1", None));
    assert_eq!(envelope.event_id.len(), 36);
    assert_eq!(envelope.attempts, 0);
}

#[test]
fn envelope_json_round_trip_keeps_event() {
    let envelope = EventEnvelope::new(cpu_queue_event("q1", Some("c1")));
    let raw = envelope.to_json().unwrap();
    let decoded = EventEnvelope::from_json(&raw).unwrap();
    assert_eq!(decoded.event_id, envelope.event_id);
    assert_eq!(decoded.event, envelope.event);
}

#[test]
fn envelope_from_garbage_is_serialization_error() {
    let err = EventEnvelope::from_json("not json").unwrap_err();
    assert!(matches!(
        err,
        cohortq_protocol::ProtocolError::Serialization(_)
    ));
}
