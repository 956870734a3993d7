//! Builds the human-readable notifications handed to the [`DeliverySink`].
//!
//! [`DeliverySink`]: crate::afterimage::collaborators::DeliverySink

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::afterimage::resolver::ResolvedRecovery;

/// Maximum characters of serialized body shown for unrecognized kinds
pub const PREVIEW_LIMIT: usize = 1000;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCategory {
    Status,
    Broadcast,
    Group,
    Private,
}

impl ChatCategory {
    /// Substring heuristic on the conversation id
    pub fn from_conversation_id(conversation_id: &str) -> Self {
        if conversation_id.contains("status@broadcast") {
            Self::Status
        } else if conversation_id.contains("@broadcast") {
            Self::Broadcast
        } else if conversation_id.contains("@g.us") {
            Self::Group
        } else {
            Self::Private
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Status => "Status",
            Self::Broadcast => "Broadcast list",
            Self::Group => "Group",
            Self::Private => "Private chat",
        }
    }
}

/// One message for the delivery sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        text: String,
    },
    Media {
        #[serde(skip)]
        bytes: Vec<u8>,
        mime_type: String,
        caption: Option<String>,
        file_name: Option<String>,
    },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Media { .. })
    }
}

/// Short form of a chat id: `4915550001@s.whatsapp.net` and
/// `4915550001:12@s.whatsapp.net` both become `4915550001`.
pub fn short_id(id: &str) -> &str {
    let id = id.split('@').next().unwrap_or(id);
    id.split(':').next().unwrap_or(id)
}

fn sender_label(recovery: &ResolvedRecovery) -> String {
    let short = short_id(&recovery.record.sender);
    match recovery.sender_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => format!("{} ({})", name, short),
        _ => short.to_string(),
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn header(recovery: &ResolvedRecovery) -> String {
    let record = &recovery.record;
    let category = ChatCategory::from_conversation_id(&record.chat);

    let mut header = String::from("Deleted message recovered\n");
    let _ = writeln!(header, "Chat type: {}", category.label());
    let _ = writeln!(header, "From: {}", sender_label(recovery));
    let _ = writeln!(header, "Chat: {}", record.chat);
    if let Some(sent_at) = recovery.sent_at {
        let _ = writeln!(header, "Sent: {}", format_time(sent_at));
    }
    let _ = writeln!(header, "Deleted: {}", format_time(recovery.deleted_at));
    let _ = write!(header, "Type: {}", recovery.kind);
    header
}

/// Truncates at a character boundary, marking the cut
const TRUNCATION_MARKER: &str = "\n…";

/// Cuts a preview to at most [`PREVIEW_LIMIT`] characters, marker included
fn truncate_preview(serialized: &str) -> String {
    if serialized.chars().count() <= PREVIEW_LIMIT {
        return serialized.to_string();
    }
    let keep = PREVIEW_LIMIT - TRUNCATION_MARKER.chars().count();
    let mut preview: String = serialized.chars().take(keep).collect();
    preview.push_str(TRUNCATION_MARKER);
    preview
}

fn structured_preview(recovery: &ResolvedRecovery) -> String {
    let node = recovery
        .body
        .get(recovery.kind.as_str())
        .unwrap_or(&recovery.body);
    let serialized = serde_json::to_string_pretty(node).unwrap_or_else(|_| node.to_string());
    truncate_preview(&serialized)
}

/// Composes the notifications for one recovery.
///
/// Textual kinds produce a single text. Media kinds produce the header as a
/// text followed by the media itself, or a text fallback when the payload
/// could not be recovered. Anything else gets a structured preview.
pub fn compose(recovery: &ResolvedRecovery) -> Vec<OutboundMessage> {
    let header = header(recovery);
    let text = recovery.record.text_content.as_deref();

    if recovery.kind.is_textual() {
        let body = text.unwrap_or("(empty message)");
        return vec![OutboundMessage::text(format!("{}\n\n{}", header, body))];
    }

    if recovery.kind.media_kind().is_some() {
        let Some(media) = &recovery.media else {
            let mut fallback = format!("{}\n\nThe media could not be recovered.", header);
            if let Some(caption) = text {
                let _ = write!(fallback, "\nCaption: {}", caption);
            }
            return vec![OutboundMessage::text(fallback)];
        };

        return vec![
            OutboundMessage::text(header),
            OutboundMessage::Media {
                bytes: media.bytes.clone(),
                mime_type: media.mime_type.clone(),
                caption: text.map(str::to_string),
                file_name: Some(media.file_name.clone()),
            },
        ];
    }

    vec![OutboundMessage::text(format!(
        "{}\n\n{}",
        header,
        structured_preview(recovery)
    ))]
}
