//! Content kind discriminators and the fixed tables keyed by them.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The payload shape a message carries, named by its wire discriminator.
///
/// Kinds outside the fixed tables land in [`ContentKind::Other`] and are
/// reported through a structured preview instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Conversation,
    ExtendedText,
    Image,
    Video,
    /// Round "video note" messages
    VideoNote,
    Audio,
    Sticker,
    Document,
    /// Control bodies (revokes and friends). Never cached.
    Protocol,
    /// Key-exchange bookkeeping that sometimes rides along with real media
    SenderKeyDistribution,
    /// Generic context wrapper that sometimes hides a video note
    MessageContextInfo,
    Other(String),
}

/// Binary media classes that require a fetch through the media collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Sticker,
    Document,
}

/// Media fields in the order they are checked when retagging a disguised kind.
pub const MEDIA_KINDS: [ContentKind; 6] = [
    ContentKind::Image,
    ContentKind::Video,
    ContentKind::VideoNote,
    ContentKind::Audio,
    ContentKind::Sticker,
    ContentKind::Document,
];

pub const TEXT_KINDS: [ContentKind; 2] = [ContentKind::Conversation, ContentKind::ExtendedText];

impl ContentKind {
    pub fn from_wire(name: &str) -> Self {
        match name {
            "conversation" => Self::Conversation,
            "extendedTextMessage" => Self::ExtendedText,
            "imageMessage" => Self::Image,
            "videoMessage" => Self::Video,
            "ptvMessage" => Self::VideoNote,
            "audioMessage" => Self::Audio,
            "stickerMessage" => Self::Sticker,
            "documentMessage" => Self::Document,
            "protocolMessage" => Self::Protocol,
            "senderKeyDistributionMessage" => Self::SenderKeyDistribution,
            "messageContextInfo" => Self::MessageContextInfo,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Conversation => "conversation",
            Self::ExtendedText => "extendedTextMessage",
            Self::Image => "imageMessage",
            Self::Video => "videoMessage",
            Self::VideoNote => "ptvMessage",
            Self::Audio => "audioMessage",
            Self::Sticker => "stickerMessage",
            Self::Document => "documentMessage",
            Self::Protocol => "protocolMessage",
            Self::SenderKeyDistribution => "senderKeyDistributionMessage",
            Self::MessageContextInfo => "messageContextInfo",
            Self::Other(name) => name,
        }
    }

    /// JSON pointer to the textual field of this kind, relative to the content body.
    pub fn text_pointer(&self) -> Option<&'static str> {
        match self {
            Self::Conversation => Some("/conversation"),
            Self::ExtendedText => Some("/extendedTextMessage/text"),
            Self::Image => Some("/imageMessage/caption"),
            Self::Video => Some("/videoMessage/caption"),
            Self::VideoNote => Some("/ptvMessage/caption"),
            Self::Document => Some("/documentMessage/caption"),
            _ => None,
        }
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            Self::Image => Some(MediaKind::Image),
            Self::Video | Self::VideoNote => Some(MediaKind::Video),
            Self::Audio => Some(MediaKind::Audio),
            Self::Sticker => Some(MediaKind::Sticker),
            Self::Document => Some(MediaKind::Document),
            _ => None,
        }
    }

    /// Text-only kinds, as opposed to media kinds that merely carry a caption
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Conversation | Self::ExtendedText)
    }

    pub fn is_housekeeping(&self) -> bool {
        matches!(self, Self::SenderKeyDistribution | Self::MessageContextInfo)
    }

    /// Whether the kind is covered by the extraction or media tables
    pub fn is_recognized(&self) -> bool {
        self.is_textual() || self.media_kind().is_some()
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ContentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&name))
    }
}

impl MediaKind {
    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
            Self::Audio => "ogg",
            Self::Sticker => "webp",
            Self::Document => "bin",
        }
    }

    pub fn default_mime_type(&self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
            Self::Audio => "audio/ogg",
            Self::Sticker => "image/webp",
            Self::Document => "application/octet-stream",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Sticker => "sticker",
            Self::Document => "document",
        }
    }
}
