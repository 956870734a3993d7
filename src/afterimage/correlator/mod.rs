//! Deletion correlation
//!
//! Update events are run through an ordered list of [`SignalDetector`]s; the
//! first detector that recognizes a deletion wins. Every encoding produces the
//! same [`DeletionSignal`], so everything downstream has a single path.

mod detectors;

pub use detectors::{ExplicitRevokeDetector, REVOKE_STUB_TYPE, SignalDetector, StubTypeDetector};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::afterimage::{
    message_cache::{CachedMessage, MessageCache},
    types::{MessageIdentity, UpdateEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    ExplicitRevoke,
    StubTypeCode,
}

/// "The message at `target` was revoked", whatever encoding announced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionSignal {
    pub target: MessageIdentity,
    pub kind: SignalKind,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum Correlation {
    /// The update is not a deletion
    NotDeletion,
    /// A deletion for something we never saw, or already recovered
    Miss(DeletionSignal),
    /// A deletion whose content was taken out of the cache
    Hit(DeletionSignal, Box<CachedMessage>),
}

pub struct Correlator {
    detectors: Vec<Box<dyn SignalDetector>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::with_detectors(vec![
            Box::new(ExplicitRevokeDetector),
            Box::new(StubTypeDetector),
        ])
    }

    pub fn with_detectors(detectors: Vec<Box<dyn SignalDetector>>) -> Self {
        Self { detectors }
    }

    /// Appends a detector. It is tried after all existing ones.
    pub fn push_detector(&mut self, detector: Box<dyn SignalDetector>) {
        self.detectors.push(detector);
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Extracts a deletion signal from an update, if any detector recognizes one.
    pub fn detect(&self, update: &UpdateEvent, observed_at: DateTime<Utc>) -> Option<DeletionSignal> {
        let matched = self.detectors.iter().find_map(|detector| {
            detector
                .detect(update, observed_at)
                .map(|signal| (detector.name(), signal))
        });

        match matched {
            Some((name, signal)) => {
                tracing::debug!(
                    target: "afterimage::correlator::detect",
                    "Detector {} matched deletion of {}",
                    name,
                    signal.target
                );
                Some(signal)
            }
            None => {
                tracing::trace!(
                    target: "afterimage::correlator::detect",
                    "Update for {:?} is not a deletion",
                    update.key
                );
                None
            }
        }
    }

    /// Detects a deletion and takes the matching entry out of the cache.
    ///
    /// The take happens under the cache lock, so a second signal for the same
    /// identity (replayed, or arriving through the other encoding) is a miss.
    pub async fn correlate(&self, update: &UpdateEvent, cache: &Mutex<MessageCache>) -> Correlation {
        let Some(signal) = self.detect(update, Utc::now()) else {
            return Correlation::NotDeletion;
        };

        let cached = cache.lock().await.take(&signal.target);
        match cached {
            Some(message) => Correlation::Hit(signal, Box::new(message)),
            None => {
                tracing::info!(
                    target: "afterimage::correlator::correlate",
                    "No cached content for deleted message {}, nothing to recover",
                    signal.target
                );
                Correlation::Miss(signal)
            }
        }
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}
