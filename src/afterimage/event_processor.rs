use std::sync::Arc;

use tokio::{sync::mpsc::Receiver, task::JoinHandle};

use crate::afterimage::{
    Afterimage,
    error::Result,
    recovery::RecoveryReport,
    types::ProcessableEvent,
};

impl Afterimage {
    /// Start the event processing loop in a background task
    pub(crate) fn start_event_processing_loop(
        afterimage: Arc<Afterimage>,
        receiver: Receiver<ProcessableEvent>,
        shutdown_receiver: Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            Self::process_events(afterimage, receiver, shutdown_receiver).await;
        })
    }

    /// Shutdown event processing gracefully.
    ///
    /// Events already queued are still processed and in-flight recoveries are
    /// awaited before this returns.
    pub async fn shutdown_event_processing(&self) -> Result<()> {
        // Err is expected if the processor already shut down
        let _ = self.shutdown_sender.send(()).await;

        let handle = self
            .processing_task
            .lock()
            .ok()
            .and_then(|mut task| task.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(
                target: "afterimage::event_processor::shutdown_event_processing",
                "Event processing loop ended abnormally: {}",
                e
            );
        }
        Ok(())
    }

    /// Main event processing loop
    async fn process_events(
        afterimage: Arc<Afterimage>,
        mut receiver: Receiver<ProcessableEvent>,
        mut shutdown: Receiver<()>,
    ) {
        tracing::debug!(
            target: "afterimage::event_processor::process_events",
            "Starting event processing loop"
        );

        let mut shutting_down = false;
        let mut in_flight: Vec<JoinHandle<RecoveryReport>> = Vec::new();

        loop {
            tokio::select! {
                Some(event) = receiver.recv() => {
                    tracing::trace!(
                        target: "afterimage::event_processor::process_events",
                        "Received event for processing"
                    );

                    if let Some(handle) = afterimage.process_event(event).await {
                        in_flight.retain(|task| !task.is_finished());
                        in_flight.push(handle);
                    }
                }
                Some(_) = shutdown.recv(), if !shutting_down => {
                    tracing::info!(
                        target: "afterimage::event_processor::process_events",
                        "Received shutdown signal, finishing current queue..."
                    );
                    shutting_down = true;
                    // Buffered events are still delivered, new sends are refused
                    receiver.close();
                }
                else => {
                    if shutting_down {
                        tracing::debug!(
                            target: "afterimage::event_processor::process_events",
                            "Queue flushed, shutting down event processor"
                        );
                    } else {
                        tracing::debug!(
                            target: "afterimage::event_processor::process_events",
                            "All channels closed, exiting event processing loop"
                        );
                    }
                    break;
                }
            }
        }

        for task in in_flight {
            if let Err(e) = task.await {
                tracing::error!(
                    target: "afterimage::event_processor::process_events",
                    "Recovery task failed: {}",
                    e
                );
            }
        }
    }

    /// Routes one event. Returns the recovery task when the event matched a
    /// cached deletion.
    pub async fn process_event(&self, event: ProcessableEvent) -> Option<JoinHandle<RecoveryReport>> {
        match event {
            ProcessableEvent::Content(content) => self.handle_content(content).await,
            ProcessableEvent::Update(update) => self.handle_update(update).await,
        }
    }
}
