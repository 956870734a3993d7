use async_trait::async_trait;

use crate::afterimage::{
    composer::OutboundMessage,
    database::recovered_messages::RecoveredRecord,
    error::CollaboratorError,
    types::MessageEnvelope,
};

/// Resolves transport-specific media references into bytes
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download the media payload referenced by a raw envelope
    async fn fetch(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>, CollaboratorError>;
}

/// Durable, append-only home for recovery records
#[async_trait]
pub trait RecoveryStore: Send + Sync {
    /// Append one record, returning its row id
    async fn append(&self, record: &RecoveredRecord) -> Result<i64, CollaboratorError>;
}

/// Outbound delivery of composed notifications
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn send(
        &self,
        destination: &str,
        message: OutboundMessage,
    ) -> Result<(), CollaboratorError>;
}

/// Fetcher used when no media transport is wired in; every fetch fails
pub struct NoMediaFetcher;

#[async_trait]
impl MediaFetcher for NoMediaFetcher {
    async fn fetch(&self, _envelope: &MessageEnvelope) -> Result<Vec<u8>, CollaboratorError> {
        Err("media retrieval is not configured".into())
    }
}

/// Sink that writes notifications to the log instead of delivering them
pub struct TracingDeliverySink;

#[async_trait]
impl DeliverySink for TracingDeliverySink {
    async fn send(
        &self,
        destination: &str,
        message: OutboundMessage,
    ) -> Result<(), CollaboratorError> {
        match &message {
            OutboundMessage::Text { text } => tracing::info!(
                target: "afterimage::collaborators::tracing_sink",
                "To {}:\n{}",
                destination,
                text
            ),
            OutboundMessage::Media {
                bytes,
                mime_type,
                caption,
                file_name,
            } => tracing::info!(
                target: "afterimage::collaborators::tracing_sink",
                "To {}: {} bytes of {} ({}) {}",
                destination,
                bytes.len(),
                mime_type,
                file_name.as_deref().unwrap_or("unnamed"),
                caption.as_deref().unwrap_or_default()
            ),
        }
        Ok(())
    }
}
