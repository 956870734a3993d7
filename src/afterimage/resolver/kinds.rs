use serde_json::Value;

use crate::afterimage::content_kind::{ContentKind, MEDIA_KINDS, TEXT_KINDS};

fn has_field(body: &Value, kind: &ContentKind) -> bool {
    body.get(kind.as_str()).is_some_and(|value| !value.is_null())
}

/// Resolves the kind a message really carries.
///
/// Housekeeping kinds are not content: when one is the primary discriminator
/// but a recognized field rides along, the message is retagged to that field.
/// A context-info wrapper hiding a video note becomes a video note; media
/// fields are preferred over text fields.
pub fn effective_kind(declared: &ContentKind, body: &Value) -> ContentKind {
    if !declared.is_housekeeping() {
        return declared.clone();
    }

    if *declared == ContentKind::MessageContextInfo && has_field(body, &ContentKind::VideoNote) {
        return ContentKind::VideoNote;
    }

    MEDIA_KINDS
        .iter()
        .chain(TEXT_KINDS.iter())
        .find(|kind| has_field(body, kind))
        .cloned()
        .unwrap_or_else(|| declared.clone())
}

/// Text carried by a kind, per the fixed extraction table
pub fn extract_text(kind: &ContentKind, body: &Value) -> Option<String> {
    let pointer = kind.text_pointer()?;
    body.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
}

/// The sub-object describing a media payload (mimetype, fileName, url, ...)
pub fn media_node<'a>(kind: &ContentKind, body: &'a Value) -> Option<&'a Value> {
    kind.media_kind()?;
    body.get(kind.as_str()).filter(|node| node.is_object())
}
