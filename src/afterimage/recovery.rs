//! Per-deletion recovery pipeline
//!
//! Once the correlator has taken a message out of the cache, the pipeline
//! resolves it, composes the notifications and then fans out into two
//! independently spawned tasks: the store append and the sink delivery. A
//! failure in one is logged and never affects the other.

use std::{sync::Arc, time::Duration};

use crate::afterimage::{
    collaborators::{DeliverySink, RecoveryStore},
    composer::{OutboundMessage, compose},
    correlator::DeletionSignal,
    database::recovered_messages::RecoveredRecord,
    error::{AfterimageError, Result},
    message_cache::CachedMessage,
    resolver::Resolver,
};

/// Outcome of one recovery, for logging and tests
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub record: RecoveredRecord,
    /// Row id assigned by the store, `None` if the append failed
    pub stored_id: Option<i64>,
    /// Messages the sink accepted
    pub delivered: usize,
    /// Messages composed for the sink
    pub attempted: usize,
}

impl RecoveryReport {
    pub fn fully_delivered(&self) -> bool {
        self.attempted > 0 && self.delivered == self.attempted
    }
}

pub(crate) struct RecoveryPipeline {
    resolver: Resolver,
    store: Arc<dyn RecoveryStore>,
    sink: Arc<dyn DeliverySink>,
    destination: Option<String>,
    task_timeout: Duration,
}

impl RecoveryPipeline {
    pub(crate) fn new(
        resolver: Resolver,
        store: Arc<dyn RecoveryStore>,
        sink: Arc<dyn DeliverySink>,
        destination: Option<String>,
        task_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            store,
            sink,
            destination,
            task_timeout,
        }
    }

    pub(crate) async fn recover(&self, message: CachedMessage, signal: DeletionSignal) -> RecoveryReport {
        let resolved = self.resolver.resolve(&message, &signal).await;
        let outbound = compose(&resolved);
        let attempted = outbound.len();
        let mut record = resolved.record;

        tracing::info!(
            target: "afterimage::recovery::recover",
            "Recovered {} deleted by {:?} signal ({} bytes of media)",
            signal.target,
            signal.kind,
            resolved.media.as_ref().map_or(0, |m| m.bytes.len())
        );

        let store_task = tokio::spawn(store_record(
            self.store.clone(),
            record.clone(),
            self.task_timeout,
        ));
        let delivery_task = tokio::spawn(deliver(
            self.sink.clone(),
            self.destination.clone(),
            outbound,
            self.task_timeout,
        ));

        let stored_id = match store_task.await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    target: "afterimage::recovery::recover",
                    "Store task for {} aborted: {}",
                    signal.target,
                    e
                );
                None
            }
        };
        let delivered = match delivery_task.await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    target: "afterimage::recovery::recover",
                    "Delivery task for {} aborted: {}",
                    signal.target,
                    e
                );
                0
            }
        };

        record.id = stored_id;
        RecoveryReport {
            record,
            stored_id,
            delivered,
            attempted,
        }
    }
}

async fn store_record(
    store: Arc<dyn RecoveryStore>,
    record: RecoveredRecord,
    task_timeout: Duration,
) -> Option<i64> {
    let result: Result<i64> = match tokio::time::timeout(task_timeout, store.append(&record)).await {
        Ok(Ok(id)) => Ok(id),
        Ok(Err(e)) => Err(AfterimageError::RecoveryStore(e.to_string())),
        Err(_) => Err(AfterimageError::Timeout(task_timeout)),
    };

    match result {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::error!(
                target: "afterimage::recovery::store_record",
                "Failed to store recovered message from {} in {}: {}",
                record.sender,
                record.chat,
                e
            );
            None
        }
    }
}

/// Sends every message in order. A failed message does not stop the rest.
async fn deliver(
    sink: Arc<dyn DeliverySink>,
    destination: Option<String>,
    messages: Vec<OutboundMessage>,
    task_timeout: Duration,
) -> usize {
    let Some(destination) = destination else {
        tracing::warn!(
            target: "afterimage::recovery::deliver",
            "No delivery destination configured, skipping {} notification(s)",
            messages.len()
        );
        return 0;
    };

    let mut delivered = 0;
    for message in messages {
        let kind = if message.is_media() { "media" } else { "text" };
        match tokio::time::timeout(task_timeout, sink.send(&destination, message)).await {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(e)) => tracing::error!(
                target: "afterimage::recovery::deliver",
                "Failed to deliver {} notification to {}: {}",
                kind,
                destination,
                AfterimageError::Delivery(e.to_string())
            ),
            Err(_) => tracing::error!(
                target: "afterimage::recovery::deliver",
                "Delivering {} notification to {} timed out after {:?}",
                kind,
                destination,
                task_timeout
            ),
        }
    }
    delivered
}
