use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tempfile::TempDir;

use crate::afterimage::{
    Afterimage, AfterimageConfig, Collaborators,
    collaborators::{DeliverySink, MediaFetcher, RecoveryStore},
    composer::OutboundMessage,
    database::recovered_messages::RecoveredRecord,
    error::CollaboratorError,
    message_cache::CachedMessage,
    normalizer::{Normalized, normalize},
    types::{ContentEvent, MessageEnvelope, MessageKey, UpdateEvent},
};

pub(crate) const TEST_DESTINATION: &str = "4915550000@s.whatsapp.net";

// Test configuration and setup helpers
pub(crate) fn create_test_config() -> (AfterimageConfig, TempDir, TempDir) {
    let data_temp_dir = TempDir::new().expect("Failed to create temp data dir");
    let logs_temp_dir = TempDir::new().expect("Failed to create temp logs dir");
    let config = AfterimageConfig::new(data_temp_dir.path(), logs_temp_dir.path());
    (config, data_temp_dir, logs_temp_dir)
}

pub(crate) fn envelope_with(conversation_id: &str, message_id: &str, message: Value) -> MessageEnvelope {
    MessageEnvelope {
        key: MessageKey::new(conversation_id, message_id),
        push_name: Some("Alice".to_string()),
        message_timestamp: Some(1_700_000_000),
        message: Some(message),
    }
}

pub(crate) fn text_envelope(conversation_id: &str, message_id: &str, text: &str) -> MessageEnvelope {
    envelope_with(conversation_id, message_id, json!({ "conversation": text }))
}

pub(crate) fn image_envelope(
    conversation_id: &str,
    message_id: &str,
    caption: Option<&str>,
) -> MessageEnvelope {
    let mut image = json!({
        "url": "https://mmg.whatsapp.net/unreachable.enc",
        "mimetype": "image/jpeg",
    });
    if let Some(caption) = caption {
        image["caption"] = json!(caption);
    }
    envelope_with(conversation_id, message_id, json!({ "imageMessage": image }))
}

pub(crate) fn content_event(envelope: MessageEnvelope) -> ContentEvent {
    ContentEvent::new(envelope)
}

/// Normalizes an envelope into a cache entry, panicking on control bodies
pub(crate) fn cached_envelope(envelope: MessageEnvelope) -> CachedMessage {
    match normalize(&envelope) {
        Some(Normalized::Content(content)) => CachedMessage::new(content, envelope),
        other => panic!("envelope does not normalize to content: {:?}", other),
    }
}

pub(crate) fn cached_text(conversation_id: &str, message_id: &str, text: &str) -> CachedMessage {
    cached_envelope(text_envelope(conversation_id, message_id, text))
}

/// An explicit revoke body targeting `(conversation_id, message_id)`
pub(crate) fn revoke_update(conversation_id: &str, message_id: &str) -> UpdateEvent {
    UpdateEvent::new(
        MessageKey::new(conversation_id, format!("REVOKE-{}", message_id)),
        json!({ "message": { "protocolMessage": {
            "key": { "remoteJid": conversation_id, "id": message_id, "fromMe": false },
            "type": "REVOKE"
        }}}),
    )
}

/// A revoke announced by status code on the deleted message's own key
pub(crate) fn stub_update(conversation_id: &str, message_id: &str) -> UpdateEvent {
    UpdateEvent::new(
        MessageKey::new(conversation_id, message_id),
        json!({ "messageStubType": 1, "message": null }),
    )
}

/// Returns the same payload for every fetch
pub(crate) struct StaticMediaFetcher {
    bytes: Vec<u8>,
    calls: AtomicUsize,
}

impl StaticMediaFetcher {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for StaticMediaFetcher {
    async fn fetch(&self, _envelope: &MessageEnvelope) -> Result<Vec<u8>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.bytes.clone())
    }
}

/// Simulates an unreachable media reference
pub(crate) struct FailingMediaFetcher;

impl FailingMediaFetcher {
    pub(crate) fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaFetcher for FailingMediaFetcher {
    async fn fetch(&self, _envelope: &MessageEnvelope) -> Result<Vec<u8>, CollaboratorError> {
        Err("media server unreachable".into())
    }
}

#[derive(Default)]
pub(crate) struct RecordingStore {
    records: Mutex<Vec<RecoveredRecord>>,
    fail: bool,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn records(&self) -> Vec<RecoveredRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecoveryStore for RecordingStore {
    async fn append(&self, record: &RecoveredRecord) -> Result<i64, CollaboratorError> {
        if self.fail {
            return Err("disk full".into());
        }
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        Ok(records.len() as i64)
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    fail: bool,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn send(
        &self,
        destination: &str,
        message: OutboundMessage,
    ) -> Result<(), CollaboratorError> {
        if self.fail {
            return Err("sink offline".into());
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), message));
        Ok(())
    }
}

/// A fetcher, store and sink whose calls never complete
pub(crate) struct PendingCollaborator;

#[async_trait]
impl MediaFetcher for PendingCollaborator {
    async fn fetch(&self, _envelope: &MessageEnvelope) -> Result<Vec<u8>, CollaboratorError> {
        std::future::pending().await
    }
}

#[async_trait]
impl RecoveryStore for PendingCollaborator {
    async fn append(&self, _record: &RecoveredRecord) -> Result<i64, CollaboratorError> {
        std::future::pending().await
    }
}

#[async_trait]
impl DeliverySink for PendingCollaborator {
    async fn send(
        &self,
        _destination: &str,
        _message: OutboundMessage,
    ) -> Result<(), CollaboratorError> {
        std::future::pending().await
    }
}

pub(crate) struct MockAfterimage {
    pub(crate) afterimage: Arc<Afterimage>,
    pub(crate) store: Arc<RecordingStore>,
    pub(crate) sink: Arc<RecordingSink>,
    _data_temp: TempDir,
    _logs_temp: TempDir,
}

async fn build_mock(capacity: usize, fetcher: Arc<dyn MediaFetcher>) -> MockAfterimage {
    let (config, data_temp, logs_temp) = create_test_config();
    let config = config
        .with_cache_capacity(capacity)
        .with_destination(TEST_DESTINATION);

    let store = Arc::new(RecordingStore::new());
    let sink = Arc::new(RecordingSink::new());
    let collaborators = Collaborators::new(fetcher, sink.clone()).with_recovery_store(store.clone());

    let afterimage = Afterimage::initialize(config, collaborators)
        .await
        .expect("Failed to initialize Afterimage");

    MockAfterimage {
        afterimage,
        store,
        sink,
        _data_temp: data_temp,
        _logs_temp: logs_temp,
    }
}

/// Creates an engine with recording collaborators and a fetcher that always fails.
pub(crate) async fn create_mock_afterimage() -> MockAfterimage {
    build_mock(100, Arc::new(FailingMediaFetcher::new())).await
}

pub(crate) async fn create_mock_afterimage_with_capacity(capacity: usize) -> MockAfterimage {
    build_mock(capacity, Arc::new(FailingMediaFetcher::new())).await
}

pub(crate) async fn create_mock_afterimage_with_media(bytes: Vec<u8>) -> MockAfterimage {
    build_mock(100, Arc::new(StaticMediaFetcher::new(bytes))).await
}
