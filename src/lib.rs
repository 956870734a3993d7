pub use crate::afterimage::collaborators::{
    DeliverySink, MediaFetcher, NoMediaFetcher, RecoveryStore, TracingDeliverySink,
};
pub use crate::afterimage::composer::OutboundMessage;
pub use crate::afterimage::content_kind::{ContentKind, MediaKind};
pub use crate::afterimage::database::{Database, recovered_messages::RecoveredRecord};
pub use crate::afterimage::error::{AfterimageError, CollaboratorError, Result};
pub use crate::afterimage::persistence::SqliteRecoveryStore;
pub use crate::afterimage::recovery::RecoveryReport;
pub use crate::afterimage::resolver::{MediaReference, media_reference};
pub use crate::afterimage::types::{
    ContentEvent, MessageEnvelope, MessageIdentity, MessageKey, ProcessableEvent, UpdateEvent,
};
pub use crate::afterimage::{Afterimage, AfterimageConfig, CacheStats, Collaborators};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

use std::sync::{Mutex, OnceLock};

pub mod afterimage;

static TRACING_GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber: stdout plus a daily rotating file in `logs_dir`.
///
/// Only the first call has an effect.
pub fn init_tracing(logs_dir: &std::path::Path) {
    TRACING_INIT.get_or_init(|| {
        let mut guards = Vec::with_capacity(2);

        let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(stdout_guard);

        let stdout_layer = Layer::new()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(true);

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("afterimage")
            .filename_suffix("log")
            .build(logs_dir);

        let file_layer = match file_appender {
            Ok(appender) => {
                let (non_blocking_file, file_guard) = tracing_appender::non_blocking(appender);
                guards.push(file_guard);
                Some(
                    Layer::new()
                        .with_writer(non_blocking_file)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Failed to create log file appender in {:?}: {}", logs_dir, e);
                None
            }
        };

        TRACING_GUARDS.set(Mutex::new(guards)).ok();

        // A subscriber may already be installed by the embedding application
        let _ = Registry::default()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(stdout_layer)
            .with(file_layer)
            .try_init();
    });
}
