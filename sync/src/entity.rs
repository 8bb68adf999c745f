//! Entity types for chat data.
//!
//! The sync engine treats conversations and messages uniformly through
//! the [`Entity`] enum: each carries an opaque id, a payload of domain
//! fields, a backend-assigned version, and a tombstone flag.

use crate::{EntityId, Timestamp, Version};
use serde::{Deserialize, Serialize};

/// The kind of an entity, used to key the change log and route storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Conversation,
    Message,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Conversation => write!(f, "conversation"),
            EntityType::Message => write!(f, "message"),
        }
    }
}

/// A chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Opaque identifier, stable across stores
    pub id: EntityId,
    /// Display title
    pub title: String,
    /// When the conversation was created (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the conversation was last updated (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Backend-assigned version; 0 means never synced
    #[serde(default)]
    pub version: Version,
    /// Tombstone flag
    #[serde(default)]
    pub deleted: bool,
}

impl Conversation {
    /// Create a new, never-synced conversation.
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            version: 0,
            deleted: false,
        }
    }
}

/// A single chat message inside a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Opaque identifier, stable across stores
    pub id: EntityId,
    /// Parent conversation id
    pub conversation_id: EntityId,
    /// Who authored the message ("user", "assistant", ...)
    pub role: String,
    /// Message body
    pub body: String,
    /// When the message was created (milliseconds since epoch)
    pub created_at: Timestamp,
    /// Backend-assigned version; 0 means never synced
    #[serde(default)]
    pub version: Version,
    /// Tombstone flag
    #[serde(default)]
    pub deleted: bool,
}

impl Message {
    /// Create a new, never-synced message.
    pub fn new(
        id: impl Into<EntityId>,
        conversation_id: impl Into<EntityId>,
        role: impl Into<String>,
        body: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            role: role.into(),
            body: body.into(),
            created_at: now,
            version: 0,
            deleted: false,
        }
    }
}

/// Any syncable entity, tagged on the wire by its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Entity {
    Conversation(Conversation),
    Message(Message),
}

impl Entity {
    /// The entity's opaque id.
    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Conversation(c) => &c.id,
            Entity::Message(m) => &m.id,
        }
    }

    /// The entity's kind.
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Conversation(_) => EntityType::Conversation,
            Entity::Message(_) => EntityType::Message,
        }
    }

    /// The last version observed for this entity.
    pub fn version(&self) -> Version {
        match self {
            Entity::Conversation(c) => c.version,
            Entity::Message(m) => m.version,
        }
    }

    /// Stamp a new version. Only the backend authority assigns versions;
    /// the client calls this when adopting a stamped copy.
    pub fn set_version(&mut self, version: Version) {
        match self {
            Entity::Conversation(c) => c.version = version,
            Entity::Message(m) => m.version = version,
        }
    }

    /// Whether this entity is a tombstone.
    pub fn is_deleted(&self) -> bool {
        match self {
            Entity::Conversation(c) => c.deleted,
            Entity::Message(m) => m.deleted,
        }
    }

    /// Turn this entity into a tombstone.
    pub fn mark_deleted(&mut self) {
        match self {
            Entity::Conversation(c) => c.deleted = true,
            Entity::Message(m) => m.deleted = true,
        }
    }
}

impl From<Conversation> for Entity {
    fn from(c: Conversation) -> Self {
        Entity::Conversation(c)
    }
}

impl From<Message> for Entity {
    fn from(m: Message) -> Self {
        Entity::Message(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_accessors() {
        let conv = Conversation::new("c1", "Trip planning", 1000);
        let entity = Entity::from(conv);

        assert_eq!(entity.id(), "c1");
        assert_eq!(entity.entity_type(), EntityType::Conversation);
        assert_eq!(entity.version(), 0);
        assert!(!entity.is_deleted());
    }

    #[test]
    fn message_accessors() {
        let msg = Message::new("m1", "c1", "user", "hello", 1000);
        let entity = Entity::from(msg);

        assert_eq!(entity.id(), "m1");
        assert_eq!(entity.entity_type(), EntityType::Message);
    }

    #[test]
    fn stamp_version() {
        let mut entity = Entity::from(Conversation::new("c1", "t", 1000));
        entity.set_version(7);
        assert_eq!(entity.version(), 7);
    }

    #[test]
    fn tombstone() {
        let mut entity = Entity::from(Message::new("m1", "c1", "user", "x", 1000));
        entity.mark_deleted();
        assert!(entity.is_deleted());
    }

    #[test]
    fn serialization_tagged() {
        let entity = Entity::from(Conversation::new("c1", "Trip", 1000));
        let json = serde_json::to_string(&entity).unwrap();
        assert!(json.contains("\"type\":\"conversation\""));
        assert!(json.contains("createdAt")); // camelCase

        let parsed: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(entity, parsed);
    }

    #[test]
    fn serialization_defaults() {
        // version and deleted are optional on the wire
        let json = r#"{"type":"message","id":"m1","conversationId":"c1","role":"user","body":"hi","createdAt":5}"#;
        let parsed: Entity = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.version(), 0);
        assert!(!parsed.is_deleted());
    }
}
