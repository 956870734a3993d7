use serde_json::{Map, Value};

use crate::afterimage::{
    content_kind::ContentKind,
    resolver::effective_kind,
    types::{MessageEnvelope, MessageIdentity},
};

/// Maximum number of transparent wrapper layers peeled off a content body
pub const MAX_WRAPPER_DEPTH: usize = 3;

/// Transparent envelope layers carrying disappearing / view-once semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    Ephemeral,
    ViewOnce,
    ViewOnceV2,
    ViewOnceV2Extension,
    DocumentWithCaption,
}

impl WrapperKind {
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "ephemeralMessage" => Some(Self::Ephemeral),
            "viewOnceMessage" => Some(Self::ViewOnce),
            "viewOnceMessageV2" => Some(Self::ViewOnceV2),
            "viewOnceMessageV2Extension" => Some(Self::ViewOnceV2Extension),
            "documentWithCaptionMessage" => Some(Self::DocumentWithCaption),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeralMessage",
            Self::ViewOnce => "viewOnceMessage",
            Self::ViewOnceV2 => "viewOnceMessageV2",
            Self::ViewOnceV2Extension => "viewOnceMessageV2Extension",
            Self::DocumentWithCaption => "documentWithCaptionMessage",
        }
    }
}

/// The canonical form of an inbound content body
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedContent {
    pub identity: MessageIdentity,
    pub kind: ContentKind,
    /// The innermost content object, all of its fields included
    pub body: Value,
    /// Outermost wrapper that was peeled off. Diagnostic only.
    pub wrapper: Option<WrapperKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A recoverable message, eligible for caching
    Content(NormalizedContent),
    /// A control body (e.g. a revoke) that arrived on the content stream
    Control(NormalizedContent),
}

/// Peels up to [`MAX_WRAPPER_DEPTH`] wrapper layers off a message body.
///
/// Returns the innermost content object and the outermost wrapper removed.
pub(crate) fn unwrap_body(message: &Value) -> Option<(&Map<String, Value>, Option<WrapperKind>)> {
    let mut body = message.as_object()?;
    let mut wrapper = None;

    for _ in 0..MAX_WRAPPER_DEPTH {
        let Some((name, value)) = primary_entry(body) else {
            break;
        };
        let Some(kind) = WrapperKind::from_wire(name) else {
            break;
        };
        wrapper.get_or_insert(kind);
        body = value.get("message")?.as_object()?;
    }

    Some((body, wrapper))
}

/// Unwraps a raw envelope down to its innermost content body.
///
/// Returns `None` for envelopes without an identity, for bodies with no
/// discernible content kind, and for housekeeping bodies carrying no content
/// field; many transport events carry nothing recoverable. A body with a
/// protocol field is control whatever else rides along with it.
pub fn normalize(envelope: &MessageEnvelope) -> Option<Normalized> {
    let Some(identity) = envelope.key.identity() else {
        tracing::debug!(
            target: "afterimage::normalizer::normalize",
            "Dropping content event without a usable identity: {:?}",
            envelope.key
        );
        return None;
    };

    let (body, wrapper) = unwrap_body(envelope.message.as_ref()?)?;

    let protocol = ContentKind::Protocol;
    let kind = if body
        .get(protocol.as_str())
        .is_some_and(|value| !value.is_null())
    {
        protocol
    } else {
        let Some((name, _)) = primary_entry(body) else {
            tracing::trace!(
                target: "afterimage::normalizer::normalize",
                "No content kind for {}, skipping",
                identity
            );
            return None;
        };
        ContentKind::from_wire(name)
    };

    let body = Value::Object(body.clone());

    if effective_kind(&kind, &body).is_housekeeping() {
        tracing::debug!(
            target: "afterimage::normalizer::normalize",
            "Dropping bare {} body for {}",
            kind,
            identity
        );
        return None;
    }

    if let Some(wrapper) = wrapper {
        tracing::debug!(
            target: "afterimage::normalizer::normalize",
            "Unwrapped {} from {} for {}",
            kind,
            wrapper.as_str(),
            identity
        );
    }

    let content = NormalizedContent {
        identity,
        kind,
        body,
        wrapper,
    };

    if content.kind == ContentKind::Protocol {
        Some(Normalized::Control(content))
    } else {
        Some(Normalized::Content(content))
    }
}

/// The first non-null field of a content object names its kind.
fn primary_entry(body: &Map<String, Value>) -> Option<(&str, &Value)> {
    body.iter()
        .find(|(_, value)| !value.is_null())
        .map(|(name, value)| (name.as_str(), value))
}
