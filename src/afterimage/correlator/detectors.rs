use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::afterimage::{
    correlator::{DeletionSignal, SignalKind},
    normalizer::unwrap_body,
    types::{MessageIdentity, UpdateEvent},
};

/// Stub type code the transport uses for a revoked message
pub const REVOKE_STUB_TYPE: u64 = 1;

/// Numeric value of the revoke action in protocol bodies
const REVOKE_PROTOCOL_TYPE: u64 = 0;

/// Recognizes one encoding of "this message was deleted".
///
/// Implementations must be pure: inspect the update, return a signal or nothing.
pub trait SignalDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, update: &UpdateEvent, observed_at: DateTime<Utc>) -> Option<DeletionSignal>;
}

/// An embedded protocol body marked as a revoke, naming its target explicitly.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExplicitRevokeDetector;

impl SignalDetector for ExplicitRevokeDetector {
    fn name(&self) -> &'static str {
        "explicit_revoke"
    }

    fn detect(&self, update: &UpdateEvent, observed_at: DateTime<Utc>) -> Option<DeletionSignal> {
        let (body, _) = unwrap_body(update.update.get("message")?)?;
        let protocol = body.get("protocolMessage")?;
        if !protocol.get("type").is_some_and(is_revoke_type) {
            return None;
        }

        // In private chats the embedded jid names the author's side of the
        // conversation, so the update's own conversation wins when present.
        let target_key = protocol.get("key");
        let message_id = target_key
            .and_then(|key| non_empty_str(key.get("id")))
            .map(str::to_string);
        let conversation_id = update
            .key
            .remote_jid
            .as_deref()
            .filter(|jid| !jid.is_empty())
            .or_else(|| target_key.and_then(|key| non_empty_str(key.get("remoteJid"))))
            .map(str::to_string);

        match (conversation_id, message_id) {
            (Some(conversation_id), Some(message_id)) => Some(DeletionSignal {
                target: MessageIdentity::new(conversation_id, message_id),
                kind: SignalKind::ExplicitRevoke,
                observed_at,
            }),
            _ => {
                tracing::debug!(
                    target: "afterimage::correlator::explicit_revoke",
                    "Revoke body without a target identity, ignoring: {:?}",
                    update.key
                );
                None
            }
        }
    }
}

/// A bare status code on the update; the update's own key is the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubTypeDetector;

impl SignalDetector for StubTypeDetector {
    fn name(&self) -> &'static str {
        "stub_type"
    }

    fn detect(&self, update: &UpdateEvent, observed_at: DateTime<Utc>) -> Option<DeletionSignal> {
        let stub_type = update.update.get("messageStubType").and_then(Value::as_u64)?;
        if stub_type != REVOKE_STUB_TYPE {
            return None;
        }

        let Some(target) = update.identity() else {
            tracing::debug!(
                target: "afterimage::correlator::stub_type",
                "Revoke stub without a target identity, ignoring: {:?}",
                update.key
            );
            return None;
        };

        Some(DeletionSignal {
            target,
            kind: SignalKind::StubTypeCode,
            observed_at,
        })
    }
}

fn is_revoke_type(value: &Value) -> bool {
    match value {
        Value::String(name) => name == "REVOKE",
        Value::Number(code) => code.as_u64() == Some(REVOKE_PROTOCOL_TYPE),
        _ => false,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
