//! Wire contract tests for the sync protocol.
//!
//! Both sides of the protocol serialize through courier-sync's transport
//! types; these tests pin down the JSON shapes a deployed client and
//! server must keep agreeing on.

use courier_sync::{Conversation, Entity, Message, PullResponse, PushRequest, PushResponse};
use serde_json::json;

fn conversation(id: &str, title: &str) -> Conversation {
    Conversation::new(id, title, 1706745600000)
}

#[test]
fn push_request_uses_camel_case() {
    let request = PushRequest {
        node_id: "device-1".to_string(),
        conversations: vec![conversation("c1", "Trip")],
        messages: vec![Message::new("m1", "c1", "user", "hello", 1706745600000)],
    };

    let value = serde_json::to_value(&request).unwrap();
    assert!(value.get("nodeId").is_some());
    assert_eq!(value["conversations"][0]["id"], "c1");
    assert_eq!(value["messages"][0]["conversationId"], "c1");
}

#[test]
fn entities_are_tagged_by_type() {
    let entity = Entity::from(conversation("c1", "Trip"));
    let value = serde_json::to_value(&entity).unwrap();
    assert_eq!(value["type"], "conversation");

    let entity = Entity::from(Message::new("m1", "c1", "user", "hello", 1706745600000));
    let value = serde_json::to_value(&entity).unwrap();
    assert_eq!(value["type"], "message");
}

#[test]
fn pull_response_round_trips_mixed_entities() {
    let mut tombstone = Entity::from(conversation("c2", "Old"));
    tombstone.set_version(7);
    tombstone.mark_deleted();

    let response = PullResponse {
        entities: vec![Entity::from(conversation("c1", "Trip")), tombstone],
        new_watermark: 7,
        has_more: false,
    };

    let text = serde_json::to_string(&response).unwrap();
    let parsed: PullResponse = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, response);
    assert!(parsed.entities[1].is_deleted());
}

#[test]
fn push_response_carries_assigned_versions() {
    let body = json!({
        "message": "accepted 2 entities",
        "newWatermark": 12,
        "versions": {"c1": 11, "m1": 12}
    });

    let response: PushResponse = serde_json::from_value(body).unwrap();
    assert_eq!(response.new_watermark, 12);
    assert_eq!(response.versions["c1"], 11);
    assert_eq!(response.versions["m1"], 12);
}

#[test]
fn unsynced_entity_defaults_to_version_zero() {
    // a client staging a brand-new conversation sends no version field
    let body = json!({
        "type": "conversation",
        "id": "c1",
        "title": "Trip",
        "createdAt": 1706745600000u64,
        "updatedAt": 1706745600000u64
    });

    let entity: Entity = serde_json::from_value(body).unwrap();
    assert_eq!(entity.version(), 0);
    assert!(!entity.is_deleted());
}
