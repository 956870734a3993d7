use std::path::{Path, PathBuf};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use tokio::{
    sync::{
        Mutex,
        mpsc::{self, Sender},
    },
    task::JoinHandle,
};

pub mod collaborators;
pub mod composer;
pub mod content_kind;
pub mod correlator;
pub mod database;
pub mod error;
mod event_processor;
pub mod message_cache;
pub mod normalizer;
pub mod persistence;
pub mod recovery;
pub mod resolver;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

use crate::init_tracing;

use collaborators::{DeliverySink, MediaFetcher, NoMediaFetcher, RecoveryStore, TracingDeliverySink};
use correlator::{Correlation, Correlator};
use database::Database;
use error::{AfterimageError, Result};
use message_cache::{CachedMessage, DEFAULT_CACHE_CAPACITY, MessageCache};
use normalizer::{Normalized, normalize};
use persistence::SqliteRecoveryStore;
use recovery::{RecoveryPipeline, RecoveryReport};
use resolver::Resolver;
use storage::Storage;
use types::{ContentEvent, ProcessableEvent, UpdateEvent};

pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CHANNEL_SIZE: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AfterimageConfig {
    /// Directory for application data
    pub data_dir: PathBuf,

    /// Directory for application logs
    pub logs_dir: PathBuf,

    /// Directory recovered media is written to
    pub media_dir: PathBuf,

    /// Maximum number of messages held for recovery
    pub cache_capacity: usize,

    /// Chat that receives recovery notifications. Delivery is skipped without one.
    pub destination: Option<String>,

    /// Upper bound for each media fetch, store append and delivery
    pub task_timeout: Duration,

    /// Capacity of the inbound event queue
    pub channel_size: usize,
}

impl AfterimageConfig {
    pub fn new(data_dir: &Path, logs_dir: &Path) -> Self {
        let env_suffix = if cfg!(debug_assertions) {
            "dev"
        } else {
            "release"
        };
        let formatted_data_dir = data_dir.join(env_suffix);
        let formatted_logs_dir = logs_dir.join(env_suffix);

        Self {
            media_dir: formatted_data_dir.join("recovered_media"),
            data_dir: formatted_data_dir,
            logs_dir: formatted_logs_dir,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            destination: None,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            channel_size: DEFAULT_CHANNEL_SIZE,
        }
    }

    pub fn with_media_dir(mut self, media_dir: &Path) -> Self {
        self.media_dir = media_dir.to_path_buf();
        self
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    pub fn with_channel_size(mut self, channel_size: usize) -> Self {
        self.channel_size = channel_size;
        self
    }

    /// Builds a configuration from `AFTERIMAGE_*` environment variables,
    /// loading a `.env` file first when one exists.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from `AFTERIMAGE_*` variables resolved by `lookup`.
    ///
    /// Unset or blank variables keep their defaults; a malformed number is a
    /// configuration error.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let string = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let path = |name: &str| string(name).map(PathBuf::from);
        let number = |name: &str| -> Result<Option<u64>> {
            string(name)
                .map(|value| {
                    value.trim().parse::<u64>().map_err(|e| {
                        AfterimageError::Configuration(format!("{} must be a number: {}", name, e))
                    })
                })
                .transpose()
        };

        let data_dir = path("AFTERIMAGE_DATA_DIR").unwrap_or_else(|| PathBuf::from("./data"));
        let logs_dir = path("AFTERIMAGE_LOGS_DIR").unwrap_or_else(|| PathBuf::from("./logs"));
        let mut config = Self::new(&data_dir, &logs_dir);

        if let Some(media_dir) = path("AFTERIMAGE_MEDIA_DIR") {
            config.media_dir = media_dir;
        }
        if let Some(capacity) = number("AFTERIMAGE_CACHE_CAPACITY")? {
            config.cache_capacity = capacity as usize;
        }
        if let Some(destination) = string("AFTERIMAGE_DESTINATION") {
            config.destination = Some(destination);
        }
        if let Some(secs) = number("AFTERIMAGE_TASK_TIMEOUT_SECS")? {
            config.task_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(AfterimageError::Configuration(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(AfterimageError::Configuration(
                "task timeout must be greater than zero".to_string(),
            ));
        }
        if self.channel_size == 0 {
            return Err(AfterimageError::Configuration(
                "channel size must be at least 1".to_string(),
            ));
        }
        if self.destination.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(AfterimageError::Configuration(
                "destination must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// The external services the engine talks to
pub struct Collaborators {
    pub media_fetcher: Arc<dyn MediaFetcher>,
    /// `None` stores records in the local SQLite database
    pub recovery_store: Option<Arc<dyn RecoveryStore>>,
    pub delivery_sink: Arc<dyn DeliverySink>,
}

impl Collaborators {
    pub fn new(media_fetcher: Arc<dyn MediaFetcher>, delivery_sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            media_fetcher,
            recovery_store: None,
            delivery_sink,
        }
    }

    pub fn with_recovery_store(mut self, recovery_store: Arc<dyn RecoveryStore>) -> Self {
        self.recovery_store = Some(recovery_store);
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new(Arc::new(NoMediaFetcher), Arc::new(TracingDeliverySink))
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub evicted: u64,
    pub recovered: u64,
    pub missed: u64,
}

pub struct Afterimage {
    pub config: AfterimageConfig,
    database: Arc<Database>,
    cache: Arc<Mutex<MessageCache>>,
    correlator: Correlator,
    pipeline: Arc<RecoveryPipeline>,
    recovered: AtomicU64,
    missed: AtomicU64,
    event_sender: Sender<ProcessableEvent>,
    shutdown_sender: Sender<()>,
    processing_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Afterimage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Afterimage")
            .field("config", &self.config)
            .field("detectors", &self.correlator.detector_names())
            .field("database", &"<REDACTED>")
            .field("cache", &"<REDACTED>")
            .field("pipeline", &"<REDACTED>")
            .finish()
    }
}

impl Afterimage {
    /// Initializes the engine with the provided configuration.
    ///
    /// Sets up the data, log and media directories, configures logging,
    /// opens the database and starts the event processing loop. Feed events
    /// through [`Afterimage::event_sender`].
    ///
    /// # Arguments
    ///
    /// * `config` - An [`AfterimageConfig`] specifying directories and limits.
    /// * `collaborators` - Media retrieval, storage and delivery services.
    pub async fn initialize(
        config: AfterimageConfig,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let data_dir = &config.data_dir;
        let logs_dir = &config.logs_dir;

        // Setup directories
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))
            .map_err(AfterimageError::from)?;
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))
            .map_err(AfterimageError::from)?;

        // Only initialize tracing once
        init_tracing(logs_dir);

        tracing::debug!(target: "afterimage::initialize", "Logging initialized in directory: {:?}", logs_dir);

        let database = Arc::new(Database::new(data_dir.join("afterimage.sqlite")).await?);

        let (event_sender, event_receiver) = mpsc::channel(config.channel_size);
        let (shutdown_sender, shutdown_receiver) = mpsc::channel(1);

        let afterimage = Arc::new(Self::build(
            config,
            database,
            collaborators,
            event_sender,
            shutdown_sender,
        )?);

        let handle = Self::start_event_processing_loop(
            afterimage.clone(),
            event_receiver,
            shutdown_receiver,
        );
        if let Ok(mut task) = afterimage.processing_task.lock() {
            *task = Some(handle);
        }

        tracing::info!(
            target: "afterimage::initialize",
            "Afterimage ready, caching up to {} messages",
            afterimage.config.cache_capacity
        );

        Ok(afterimage)
    }

    fn build(
        config: AfterimageConfig,
        database: Arc<Database>,
        collaborators: Collaborators,
        event_sender: Sender<ProcessableEvent>,
        shutdown_sender: Sender<()>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::new(&config.media_dir)?);
        tracing::debug!(
            target: "afterimage::build",
            "Recovered media will be written to {:?}",
            storage.media_files.media_dir()
        );

        let recovery_store: Arc<dyn RecoveryStore> = match collaborators.recovery_store {
            Some(store) => store,
            None => Arc::new(SqliteRecoveryStore::new(database.clone())),
        };

        let resolver = Resolver::new(collaborators.media_fetcher, storage, config.task_timeout);
        let pipeline = RecoveryPipeline::new(
            resolver,
            recovery_store,
            collaborators.delivery_sink,
            config.destination.clone(),
            config.task_timeout,
        );

        Ok(Self {
            cache: Arc::new(Mutex::new(MessageCache::new(config.cache_capacity))),
            config,
            database,
            correlator: Correlator::new(),
            pipeline: Arc::new(pipeline),
            recovered: AtomicU64::new(0),
            missed: AtomicU64::new(0),
            event_sender,
            shutdown_sender,
            processing_task: std::sync::Mutex::new(None),
        })
    }

    /// Sender for pushing transport events into the processing loop
    pub fn event_sender(&self) -> Sender<ProcessableEvent> {
        self.event_sender.clone()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.lock().await;
        CacheStats {
            len: cache.len(),
            capacity: cache.capacity(),
            evicted: cache.evictions(),
            recovered: self.recovered.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
        }
    }

    /// Caches a content event.
    ///
    /// A control body arriving on the content stream (a revoke delivered as
    /// a message) is routed to deletion handling instead.
    pub async fn handle_content(&self, event: ContentEvent) -> Option<JoinHandle<RecoveryReport>> {
        match normalize(&event.envelope)? {
            Normalized::Content(content) => {
                let message = CachedMessage::new(content, event.envelope);
                let identity = message.identity.clone();
                let kind = message.kind.clone();

                let evicted = self.cache.lock().await.put(message);

                tracing::debug!(
                    target: "afterimage::handle_content",
                    "Cached {} message {}",
                    kind,
                    identity
                );
                if let Some(evicted) = evicted {
                    tracing::debug!(
                        target: "afterimage::handle_content",
                        "Cache full, evicted {}",
                        evicted.identity
                    );
                }
                None
            }
            Normalized::Control(control) => {
                let update = UpdateEvent::new(event.envelope.key, json!({ "message": control.body }));
                self.handle_update(update).await
            }
        }
    }

    /// Correlates an update with the cache and spawns recovery on a hit.
    pub async fn handle_update(&self, event: UpdateEvent) -> Option<JoinHandle<RecoveryReport>> {
        match self.correlator.correlate(&event, &self.cache).await {
            Correlation::NotDeletion => None,
            Correlation::Miss(_) => {
                self.missed.fetch_add(1, Ordering::Relaxed);
                None
            }
            Correlation::Hit(signal, message) => {
                self.recovered.fetch_add(1, Ordering::Relaxed);
                let pipeline = self.pipeline.clone();
                Some(tokio::spawn(async move {
                    pipeline.recover(*message, signal).await
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use crate::afterimage::database::recovered_messages::RecoveredRecord;
    use crate::afterimage::types::{MessageIdentity, MessageKey};
    use serde_json::json;

    mod config_tests {
        use super::*;

        #[test]
        fn test_afterimage_config_new() {
            let data_dir = std::path::Path::new("/test/data");
            let logs_dir = std::path::Path::new("/test/logs");

            let config = AfterimageConfig::new(data_dir, logs_dir);

            let suffix = if cfg!(debug_assertions) { "dev" } else { "release" };
            assert_eq!(config.data_dir, data_dir.join(suffix));
            assert_eq!(config.logs_dir, logs_dir.join(suffix));
            assert_eq!(config.media_dir, data_dir.join(suffix).join("recovered_media"));
            assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
            assert_eq!(config.task_timeout, DEFAULT_TASK_TIMEOUT);
            assert!(config.destination.is_none());
        }

        #[test]
        fn test_afterimage_config_builders_and_validation() {
            let config = AfterimageConfig::new(Path::new("/d"), Path::new("/l"))
                .with_cache_capacity(10)
                .with_destination("me@s.whatsapp.net")
                .with_media_dir(Path::new("/media"))
                .with_task_timeout(Duration::from_secs(3))
                .with_channel_size(8);

            assert!(config.validate().is_ok());
            assert_eq!(config.media_dir, PathBuf::from("/media"));
            assert_eq!(config.destination.as_deref(), Some("me@s.whatsapp.net"));

            let zero = config.clone().with_cache_capacity(0);
            assert!(matches!(
                zero.validate(),
                Err(AfterimageError::Configuration(_))
            ));

            let no_timeout = config.clone().with_task_timeout(Duration::ZERO);
            assert!(no_timeout.validate().is_err());

            let blank = config.with_destination("  ");
            assert!(blank.validate().is_err());
        }

        fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
            let map: std::collections::HashMap<String, String> = pairs
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            move |name| map.get(name).cloned()
        }

        #[test]
        fn test_afterimage_config_from_vars() {
            let config = AfterimageConfig::from_vars(vars(&[
                ("AFTERIMAGE_DATA_DIR", "/srv/afterimage"),
                ("AFTERIMAGE_LOGS_DIR", "/var/log/afterimage"),
                ("AFTERIMAGE_MEDIA_DIR", "/srv/media"),
                ("AFTERIMAGE_CACHE_CAPACITY", " 250 "),
                ("AFTERIMAGE_DESTINATION", "me@s.whatsapp.net"),
                ("AFTERIMAGE_TASK_TIMEOUT_SECS", "12"),
            ]))
            .unwrap();

            let suffix = if cfg!(debug_assertions) { "dev" } else { "release" };
            assert_eq!(config.data_dir, Path::new("/srv/afterimage").join(suffix));
            assert_eq!(config.logs_dir, Path::new("/var/log/afterimage").join(suffix));
            assert_eq!(config.media_dir, PathBuf::from("/srv/media"));
            assert_eq!(config.cache_capacity, 250);
            assert_eq!(config.destination.as_deref(), Some("me@s.whatsapp.net"));
            assert_eq!(config.task_timeout, Duration::from_secs(12));
        }

        #[test]
        fn test_afterimage_config_from_vars_defaults() {
            let config = AfterimageConfig::from_vars(vars(&[("AFTERIMAGE_DESTINATION", "   ")]))
                .unwrap();

            assert_eq!(config, AfterimageConfig::new(Path::new("./data"), Path::new("./logs")));
        }

        #[test]
        fn test_afterimage_config_from_vars_rejects_bad_values() {
            let not_a_number =
                AfterimageConfig::from_vars(vars(&[("AFTERIMAGE_CACHE_CAPACITY", "lots")]));
            assert!(matches!(
                not_a_number,
                Err(AfterimageError::Configuration(ref message)) if message.contains("AFTERIMAGE_CACHE_CAPACITY")
            ));

            let zero_timeout =
                AfterimageConfig::from_vars(vars(&[("AFTERIMAGE_TASK_TIMEOUT_SECS", "0")]));
            assert!(matches!(zero_timeout, Err(AfterimageError::Configuration(_))));
        }

        #[test]
        fn test_afterimage_config_debug() {
            let (config, _data_temp, _logs_temp) = create_test_config();
            let debug_str = format!("{:?}", config);
            assert!(debug_str.contains("data_dir"));
            assert!(debug_str.contains("cache_capacity"));
        }
    }

    mod initialization_tests {
        use super::*;

        #[tokio::test]
        async fn test_afterimage_initialization() {
            let (config, _data_temp, _logs_temp) = create_test_config();

            let afterimage = Afterimage::initialize(config.clone(), Collaborators::default())
                .await
                .unwrap();

            assert!(config.data_dir.exists());
            assert!(config.logs_dir.exists());
            assert!(config.media_dir.exists());
            assert!(config.data_dir.join("afterimage.sqlite").exists());

            let stats = afterimage.stats().await;
            assert_eq!(stats.len, 0);
            assert_eq!(stats.capacity, config.cache_capacity);
        }

        #[tokio::test]
        async fn test_initialization_rejects_invalid_config() {
            let (config, _data_temp, _logs_temp) = create_test_config();
            let result =
                Afterimage::initialize(config.with_cache_capacity(0), Collaborators::default()).await;
            assert!(matches!(result, Err(AfterimageError::Configuration(_))));
        }

        #[tokio::test]
        async fn test_afterimage_debug_format() {
            let mock = create_mock_afterimage().await;

            let debug_str = format!("{:?}", mock.afterimage);
            assert!(debug_str.contains("Afterimage"));
            assert!(debug_str.contains("config"));
            assert!(debug_str.contains("explicit_revoke"));
            assert!(debug_str.contains("<REDACTED>"));
        }
    }

    mod recovery_tests {
        use super::*;

        async fn recover(
            afterimage: &Afterimage,
            event: ProcessableEvent,
        ) -> Option<RecoveryReport> {
            let handle = afterimage.process_event(event).await?;
            Some(handle.await.unwrap())
        }

        #[tokio::test]
        async fn test_text_scenario() {
            let mock = create_mock_afterimage().await;
            let afterimage = &mock.afterimage;

            afterimage
                .process_event(ProcessableEvent::Content(content_event(text_envelope(
                    "123@g.us", "ABC", "hello",
                ))))
                .await;

            let report = recover(
                afterimage,
                ProcessableEvent::Update(revoke_update("123@g.us", "ABC")),
            )
            .await
            .unwrap();

            assert_eq!(report.record.text_content.as_deref(), Some("hello"));
            assert!(report.record.media_path.is_none());

            let records = mock.store.records();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].content_kind, "conversation");
            assert_eq!(mock.sink.sent().len(), 1);

            let stats = afterimage.stats().await;
            assert_eq!(stats.len, 0);
            assert_eq!(stats.recovered, 1);
        }

        #[tokio::test]
        async fn test_deletion_without_content_is_a_miss() {
            let mock = create_mock_afterimage().await;
            let afterimage = &mock.afterimage;

            afterimage
                .process_event(ProcessableEvent::Content(content_event(text_envelope(
                    "123@g.us", "KEEP", "still here",
                ))))
                .await;

            let result = recover(
                afterimage,
                ProcessableEvent::Update(revoke_update("123@g.us", "UNKNOWN")),
            )
            .await;

            assert!(result.is_none());
            assert!(mock.store.records().is_empty());
            let stats = afterimage.stats().await;
            assert_eq!(stats.len, 1);
            assert_eq!(stats.missed, 1);
        }

        #[tokio::test]
        async fn test_replayed_deletion_recovers_once() {
            let mock = create_mock_afterimage().await;
            let afterimage = &mock.afterimage;

            afterimage
                .process_event(ProcessableEvent::Content(content_event(text_envelope(
                    "123@g.us", "ABC", "hello",
                ))))
                .await;

            let first = recover(
                afterimage,
                ProcessableEvent::Update(revoke_update("123@g.us", "ABC")),
            )
            .await;
            let second = recover(
                afterimage,
                ProcessableEvent::Update(revoke_update("123@g.us", "ABC")),
            )
            .await;
            let third = recover(
                afterimage,
                ProcessableEvent::Update(stub_update("123@g.us", "ABC")),
            )
            .await;

            assert!(first.is_some());
            assert!(second.is_none());
            assert!(third.is_none());
            assert_eq!(mock.store.records().len(), 1);
        }

        #[tokio::test]
        async fn test_both_encodings_behave_the_same() {
            let explicit = create_mock_afterimage().await;
            let stub = create_mock_afterimage().await;

            for (mock, update) in [
                (&explicit, revoke_update("123@g.us", "ABC")),
                (&stub, stub_update("123@g.us", "ABC")),
            ] {
                mock.afterimage
                    .process_event(ProcessableEvent::Content(content_event(text_envelope(
                        "123@g.us", "ABC", "hello",
                    ))))
                    .await;
                recover(&mock.afterimage, ProcessableEvent::Update(update))
                    .await
                    .unwrap();
            }

            let a = &explicit.store.records()[0];
            let b = &stub.store.records()[0];
            assert_eq!(
                (&a.sender, &a.chat, &a.content_kind, &a.text_content, &a.media_path),
                (&b.sender, &b.chat, &b.content_kind, &b.text_content, &b.media_path)
            );
            assert_eq!(explicit.sink.sent().len(), stub.sink.sent().len());
        }

        #[tokio::test]
        async fn test_sender_key_distribution_with_video_is_retagged() {
            let mock = create_mock_afterimage_with_media(b"video bytes".to_vec()).await;
            let afterimage = &mock.afterimage;

            afterimage
                .process_event(ProcessableEvent::Content(content_event(envelope_with(
                    "123@g.us",
                    "VID",
                    json!({
                        "senderKeyDistributionMessage": { "groupId": "123@g.us" },
                        "videoMessage": { "mimetype": "video/mp4", "caption": "clip" }
                    }),
                ))))
                .await;

            let report = recover(
                afterimage,
                ProcessableEvent::Update(stub_update("123@g.us", "VID")),
            )
            .await
            .unwrap();

            assert_eq!(report.record.content_kind, "videoMessage");
            assert_eq!(report.record.text_content.as_deref(), Some("clip"));
            assert!(report.record.media_path.unwrap().exists());
        }

        #[tokio::test]
        async fn test_unreachable_image_degrades() {
            let mock = create_mock_afterimage().await;
            let afterimage = &mock.afterimage;

            afterimage
                .process_event(ProcessableEvent::Content(content_event(image_envelope(
                    "123@g.us",
                    "IMG",
                    Some("sunset"),
                ))))
                .await;

            let report = recover(
                afterimage,
                ProcessableEvent::Update(revoke_update("123@g.us", "IMG")),
            )
            .await
            .unwrap();

            assert!(report.record.media_path.is_none());
            assert_eq!(mock.store.records().len(), 1);

            let sent = mock.sink.sent();
            assert_eq!(sent.len(), 1);
            let composer::OutboundMessage::Text { text } = &sent[0].1 else {
                panic!("expected degraded text notification");
            };
            assert!(text.contains("could not be recovered"));
        }

        #[tokio::test]
        async fn test_capacity_one_drops_first_identity() {
            let mock = create_mock_afterimage_with_capacity(1).await;
            let afterimage = &mock.afterimage;

            for (id, text) in [("FIRST", "one"), ("SECOND", "two")] {
                afterimage
                    .process_event(ProcessableEvent::Content(content_event(text_envelope(
                        "123@g.us", id, text,
                    ))))
                    .await;
            }

            {
                let cache = afterimage.cache.lock().await;
                assert!(cache.get(&MessageIdentity::new("123@g.us", "FIRST")).is_none());
                assert!(cache.get(&MessageIdentity::new("123@g.us", "SECOND")).is_some());
            }

            let late = recover(
                afterimage,
                ProcessableEvent::Update(revoke_update("123@g.us", "FIRST")),
            )
            .await;
            assert!(late.is_none());
            assert_eq!(afterimage.stats().await.evicted, 1);
        }

        #[tokio::test]
        async fn test_revoke_on_content_stream_is_correlated() {
            let mock = create_mock_afterimage().await;
            let afterimage = &mock.afterimage;

            afterimage
                .process_event(ProcessableEvent::Content(content_event(text_envelope(
                    "123@g.us", "ABC", "hello",
                ))))
                .await;

            let revoke = envelope_with(
                "123@g.us",
                "REVOKE-1",
                json!({ "protocolMessage": {
                    "key": { "remoteJid": "123@g.us", "id": "ABC", "fromMe": false },
                    "type": "REVOKE"
                }}),
            );
            let report = recover(afterimage, ProcessableEvent::Content(content_event(revoke)))
                .await
                .unwrap();

            assert_eq!(report.record.text_content.as_deref(), Some("hello"));
            // The revoke itself is never cached
            assert_eq!(afterimage.stats().await.len, 0);
        }

        #[tokio::test]
        async fn test_revoke_behind_sender_key_on_content_stream() {
            let mock = create_mock_afterimage().await;
            let afterimage = &mock.afterimage;

            afterimage
                .process_event(ProcessableEvent::Content(content_event(text_envelope(
                    "123@g.us", "ABC", "hello",
                ))))
                .await;

            let revoke = envelope_with(
                "123@g.us",
                "REVOKE-1",
                json!({
                    "senderKeyDistributionMessage": { "groupId": "123@g.us" },
                    "protocolMessage": {
                        "key": { "remoteJid": "123@g.us", "id": "ABC", "fromMe": false },
                        "type": "REVOKE"
                    }
                }),
            );
            let report = recover(afterimage, ProcessableEvent::Content(content_event(revoke)))
                .await
                .unwrap();

            assert_eq!(report.record.text_content.as_deref(), Some("hello"));
            assert_eq!(afterimage.stats().await.len, 0);
            assert_eq!(mock.store.records().len(), 1);
        }

        #[tokio::test]
        async fn test_bare_sender_key_is_not_cached() {
            let mock = create_mock_afterimage().await;
            let afterimage = &mock.afterimage;

            let sender_key = envelope_with(
                "123@g.us",
                "SKD",
                json!({ "senderKeyDistributionMessage": { "groupId": "123@g.us" } }),
            );
            assert!(
                afterimage
                    .process_event(ProcessableEvent::Content(content_event(sender_key)))
                    .await
                    .is_none()
            );
            assert_eq!(afterimage.stats().await.len, 0);

            assert!(
                recover(afterimage, ProcessableEvent::Update(stub_update("123@g.us", "SKD")))
                    .await
                    .is_none()
            );
            assert!(mock.sink.sent().is_empty());
        }

        #[tokio::test]
        async fn test_private_chat_revoke_uses_update_conversation() {
            let mock = create_mock_afterimage().await;
            let afterimage = &mock.afterimage;

            afterimage
                .process_event(ProcessableEvent::Content(content_event(text_envelope(
                    "4915550001@s.whatsapp.net",
                    "ABC",
                    "see you at eight",
                ))))
                .await;

            let revoke = UpdateEvent::new(
                MessageKey::new("4915550001@s.whatsapp.net", "REVOKER"),
                json!({ "message": { "protocolMessage": {
                    "key": { "remoteJid": "4915550000@s.whatsapp.net", "fromMe": true, "id": "ABC" },
                    "type": "REVOKE"
                }}}),
            );
            let report = recover(afterimage, ProcessableEvent::Update(revoke))
                .await
                .unwrap();

            assert_eq!(report.record.text_content.as_deref(), Some("see you at eight"));
            assert_eq!(afterimage.stats().await.len, 0);
        }

        #[tokio::test]
        async fn test_wrapped_revoke_on_update_stream() {
            let mock = create_mock_afterimage().await;
            let afterimage = &mock.afterimage;

            afterimage
                .process_event(ProcessableEvent::Content(content_event(text_envelope(
                    "123@g.us", "ABC", "hello",
                ))))
                .await;

            let revoke = UpdateEvent::new(
                MessageKey::new("123@g.us", "REVOKER"),
                json!({ "message": { "ephemeralMessage": { "message": { "protocolMessage": {
                    "key": { "remoteJid": "123@g.us", "id": "ABC" },
                    "type": "REVOKE"
                }}}}}),
            );
            let report = recover(afterimage, ProcessableEvent::Update(revoke))
                .await
                .unwrap();

            assert_eq!(report.record.text_content.as_deref(), Some("hello"));
        }

        #[tokio::test]
        async fn test_malformed_events_are_dropped() {
            let mock = create_mock_afterimage().await;
            let afterimage = &mock.afterimage;

            let mut no_id = text_envelope("123@g.us", "", "hello");
            no_id.key.id = None;
            let empty_body = envelope_with("123@g.us", "EMPTY", json!({}));

            assert!(
                afterimage
                    .process_event(ProcessableEvent::Content(content_event(no_id)))
                    .await
                    .is_none()
            );
            assert!(
                afterimage
                    .process_event(ProcessableEvent::Content(content_event(empty_body)))
                    .await
                    .is_none()
            );
            assert_eq!(afterimage.stats().await.len, 0);
        }

        #[tokio::test]
        async fn test_default_store_writes_to_sqlite() {
            let (config, _data_temp, _logs_temp) = create_test_config();
            let config = config.with_destination(TEST_DESTINATION);
            let sink = Arc::new(RecordingSink::new());
            let collaborators =
                Collaborators::new(Arc::new(FailingMediaFetcher::new()), sink.clone());
            let afterimage = Afterimage::initialize(config, collaborators).await.unwrap();

            afterimage
                .process_event(ProcessableEvent::Content(content_event(text_envelope(
                    "status@broadcast",
                    "ST",
                    "my status",
                ))))
                .await;
            recover(
                &afterimage,
                ProcessableEvent::Update(revoke_update("status@broadcast", "ST")),
            )
            .await
            .unwrap();

            let stored = RecoveredRecord::all(afterimage.database()).await.unwrap();
            assert_eq!(stored.len(), 1);
            assert!(stored[0].is_status);
            assert_eq!(stored[0].text_content.as_deref(), Some("my status"));
            assert_eq!(sink.sent().len(), 1);
        }
    }
}
