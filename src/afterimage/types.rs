use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Composite key naming one message in the observed stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageIdentity {
    /// The conversation (chat) the message belongs to
    pub conversation_id: String,
    /// The transport-assigned message id, unique within the conversation
    pub message_id: String,
}

impl MessageIdentity {
    pub fn new(conversation_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
        }
    }
}

impl fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.conversation_id, self.message_id)
    }
}

/// The transport's addressing block attached to every message and update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_jid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub from_me: bool,

    /// Author of the message inside group and broadcast chats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

impl MessageKey {
    pub fn new(remote_jid: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            remote_jid: Some(remote_jid.into()),
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_participant(mut self, participant: impl Into<String>) -> Self {
        self.participant = Some(participant.into());
        self
    }

    /// Returns the identity named by this key, if both halves are present and non-empty.
    pub fn identity(&self) -> Option<MessageIdentity> {
        match (self.remote_jid.as_deref(), self.id.as_deref()) {
            (Some(jid), Some(id)) if !jid.is_empty() && !id.is_empty() => {
                Some(MessageIdentity::new(jid, id))
            }
            _ => None,
        }
    }

    /// The sender of the message: the participant in group chats, the chat itself otherwise
    pub fn sender(&self) -> Option<&str> {
        self.participant
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(self.remote_jid.as_deref())
    }
}

/// A raw inbound message as delivered by the transport.
///
/// `message` is the polymorphic content body: a JSON object whose first key is the
/// content discriminator, possibly nested inside disappearing / view-once wrappers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub key: MessageKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,

    /// Seconds since the Unix epoch, as declared by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

impl MessageEnvelope {
    pub fn source_timestamp(&self) -> Option<DateTime<Utc>> {
        self.message_timestamp
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// A content event: a message that may later be deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentEvent {
    pub envelope: MessageEnvelope,
}

impl ContentEvent {
    pub fn new(envelope: MessageEnvelope) -> Self {
        Self { envelope }
    }

    pub fn identity(&self) -> Option<MessageIdentity> {
        self.envelope.key.identity()
    }
}

/// An update event: a change notification about a message, deletions included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub key: MessageKey,

    #[serde(default)]
    pub update: Value,
}

impl UpdateEvent {
    pub fn new(key: MessageKey, update: Value) -> Self {
        Self { key, update }
    }

    pub fn identity(&self) -> Option<MessageIdentity> {
        self.key.identity()
    }
}

/// Events that can be processed by the recovery event loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "snake_case")]
pub enum ProcessableEvent {
    Content(ContentEvent),
    Update(UpdateEvent),
}
