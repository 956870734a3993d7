//! Recovery resolution
//!
//! Turns a cached message into a [`RecoveredRecord`]: resolves disguised
//! kinds, extracts text through the fixed table and pulls media payloads
//! through the [`MediaFetcher`]. Nothing in here fails the recovery; a media
//! problem only leaves `media_path` empty.

mod kinds;
mod mime;

pub use kinds::{effective_kind, extract_text, media_node};
pub use mime::{effective_mime_type, extension_for_mime, file_extension};

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::afterimage::{
    collaborators::MediaFetcher,
    content_kind::{ContentKind, MediaKind},
    correlator::DeletionSignal,
    database::recovered_messages::RecoveredRecord,
    error::{AfterimageError, Result},
    message_cache::CachedMessage,
    normalizer::{Normalized, normalize},
    storage::{Storage, media_files::unique_file_name},
    types::MessageEnvelope,
};

const STATUS_BROADCAST: &str = "status@broadcast";

/// Media bytes kept in memory so they can be forwarded without a re-read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

/// Everything known about one recovered message
#[derive(Debug, Clone)]
pub struct ResolvedRecovery {
    pub record: RecoveredRecord,
    pub kind: ContentKind,
    pub body: Value,
    /// Present only when the payload was fetched successfully
    pub media: Option<RecoveredMedia>,
    pub sender_name: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub deleted_at: DateTime<Utc>,
}

impl ResolvedRecovery {
    /// A media kind whose payload could not be recovered
    pub fn media_missing(&self) -> bool {
        self.kind.media_kind().is_some() && self.media.is_none()
    }
}

/// Where a fetcher can find the media reference inside an envelope
#[derive(Debug, Clone, PartialEq)]
pub struct MediaReference {
    pub kind: MediaKind,
    pub node: Value,
}

/// Locates the media sub-object of a raw envelope, unwrapping and retagging
/// the same way recovery does.
pub fn media_reference(envelope: &MessageEnvelope) -> Option<MediaReference> {
    let Normalized::Content(content) = normalize(envelope)? else {
        return None;
    };
    let kind = effective_kind(&content.kind, &content.body);
    let node = media_node(&kind, &content.body)?.clone();
    Some(MediaReference {
        kind: kind.media_kind()?,
        node,
    })
}

pub struct Resolver {
    fetcher: Arc<dyn MediaFetcher>,
    storage: Arc<Storage>,
    fetch_timeout: Duration,
}

impl Resolver {
    pub(crate) fn new(
        fetcher: Arc<dyn MediaFetcher>,
        storage: Arc<Storage>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            storage,
            fetch_timeout,
        }
    }

    pub async fn resolve(&self, message: &CachedMessage, signal: &DeletionSignal) -> ResolvedRecovery {
        let kind = effective_kind(&message.kind, &message.body);
        if kind != message.kind {
            tracing::debug!(
                target: "afterimage::resolver::resolve",
                "Retagged {} as {} for {}",
                message.kind,
                kind,
                message.identity
            );
        }

        let text_content = extract_text(&kind, &message.body);
        let sender = message.sender().to_string();

        let (media, media_path) = match kind.media_kind() {
            Some(media_kind) => self.recover_media(message, &kind, media_kind, &sender).await,
            None => (None, None),
        };

        let record = RecoveredRecord {
            id: None,
            timestamp: message.source_timestamp.unwrap_or(message.cached_at),
            sender,
            chat: message.identity.conversation_id.clone(),
            content_kind: kind.as_str().to_string(),
            text_content,
            media_path,
            is_status: message.identity.conversation_id == STATUS_BROADCAST,
        };

        ResolvedRecovery {
            record,
            kind,
            body: message.body.clone(),
            media,
            sender_name: message.envelope.push_name.clone(),
            sent_at: message.source_timestamp,
            deleted_at: signal.observed_at,
        }
    }

    async fn recover_media(
        &self,
        message: &CachedMessage,
        kind: &ContentKind,
        media_kind: MediaKind,
        sender: &str,
    ) -> (Option<RecoveredMedia>, Option<PathBuf>) {
        let bytes = match self.fetch(&message.envelope).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    target: "afterimage::resolver::recover_media",
                    "Could not retrieve {} for {}: {}",
                    media_kind.label(),
                    message.identity,
                    e
                );
                return (None, None);
            }
        };

        let node = media_node(kind, &message.body);
        let declared_mime = node.and_then(|n| n.get("mimetype")).and_then(Value::as_str);
        let original_name = node
            .and_then(|n| n.get("fileName"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty());

        let extension = file_extension(media_kind, declared_mime, original_name, &bytes);
        let mime_type = effective_mime_type(media_kind, declared_mime, &bytes);
        let file_name = unique_file_name(Utc::now(), sender, &extension);

        let media_path = match self.storage.media_files.store_file(&file_name, &bytes).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(
                    target: "afterimage::resolver::recover_media",
                    "Failed to persist media for {}: {}",
                    message.identity,
                    e
                );
                None
            }
        };

        let media = RecoveredMedia {
            bytes,
            mime_type,
            file_name: original_name.map(str::to_string).unwrap_or(file_name),
        };
        (Some(media), media_path)
    }

    async fn fetch(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>> {
        let bytes = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(envelope))
            .await
            .map_err(|_| AfterimageError::Timeout(self.fetch_timeout))?
            .map_err(|e| AfterimageError::MediaRetrieval(e.to_string()))?;

        if bytes.is_empty() {
            return Err(AfterimageError::MediaRetrieval(
                "fetcher returned an empty payload".to_string(),
            ));
        }
        Ok(bytes)
    }
}
