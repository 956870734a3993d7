//! Bounded, insertion-ordered cache of recently seen messages.
//!
//! The cache holds at most `capacity` entries. Entries are kept in arrival
//! order, so the oldest entry always sits at the front and is the one evicted
//! when an insert pushes the cache over capacity.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use crate::afterimage::{
    content_kind::ContentKind,
    normalizer::{NormalizedContent, WrapperKind},
    types::{MessageEnvelope, MessageIdentity},
};

pub const DEFAULT_CACHE_CAPACITY: usize = 5000;

/// A message retained for possible recovery. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMessage {
    pub identity: MessageIdentity,
    /// The raw envelope as delivered, owned by this entry
    pub envelope: MessageEnvelope,
    pub kind: ContentKind,
    pub body: Value,
    pub wrapper: Option<WrapperKind>,
    /// Monotonic insertion tick, assigned by the cache
    pub received_at: u64,
    /// Wall clock time the entry was cached
    pub cached_at: DateTime<Utc>,
    /// Time declared by the event itself
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl CachedMessage {
    pub fn new(content: NormalizedContent, envelope: MessageEnvelope) -> Self {
        let source_timestamp = envelope.source_timestamp();
        Self {
            identity: content.identity,
            envelope,
            kind: content.kind,
            body: content.body,
            wrapper: content.wrapper,
            received_at: 0,
            cached_at: Utc::now(),
            source_timestamp,
        }
    }

    /// Participant for group messages, the conversation otherwise
    pub fn sender(&self) -> &str {
        self.envelope
            .key
            .sender()
            .unwrap_or(&self.identity.conversation_id)
    }
}

#[derive(Debug)]
pub struct MessageCache {
    entries: IndexMap<MessageIdentity, CachedMessage>,
    capacity: usize,
    next_tick: u64,
    evictions: u64,
}

impl MessageCache {
    /// Creates an empty cache. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: IndexMap::with_capacity(capacity.min(DEFAULT_CACHE_CAPACITY) + 1),
            capacity,
            next_tick: 0,
            evictions: 0,
        }
    }

    /// Inserts a message, replacing any entry with the same identity.
    ///
    /// A replaced entry loses its place: the new one is appended with a fresh
    /// `received_at`. Returns the entry evicted to stay within capacity, if any.
    pub fn put(&mut self, mut message: CachedMessage) -> Option<CachedMessage> {
        message.received_at = self.next_tick;
        self.next_tick += 1;

        self.entries.shift_remove(&message.identity);
        self.entries.insert(message.identity.clone(), message);

        if self.entries.len() > self.capacity {
            let (_, evicted) = self.entries.shift_remove_index(0)?;
            self.evictions += 1;
            return Some(evicted);
        }
        None
    }

    pub fn get(&self, identity: &MessageIdentity) -> Option<&CachedMessage> {
        self.entries.get(identity)
    }

    pub fn contains(&self, identity: &MessageIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn remove(&mut self, identity: &MessageIdentity) -> Option<CachedMessage> {
        self.entries.shift_remove(identity)
    }

    /// Removes and returns the entry for a recovery pass.
    ///
    /// The entry is gone once this returns, so a repeated deletion signal for
    /// the same identity finds nothing.
    pub fn take(&mut self, identity: &MessageIdentity) -> Option<CachedMessage> {
        self.remove(identity)
    }

    /// The entry that would be evicted next
    pub fn oldest(&self) -> Option<&CachedMessage> {
        self.entries.first().map(|(_, message)| message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of capacity evictions since creation
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
