//! Session event fan-out.
//!
//! Sessions publish a fixed vocabulary of events through an [`EventHub`].
//! Every subscriber gets its own unbounded channel, so a slow UI never
//! blocks the session, and the hub keeps a bounded history of recent
//! events for late subscribers and for replay in tests.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Fixed-capacity circular buffer. O(1) insert, evicts oldest when full.
#[derive(Debug, Clone)]
pub struct EventRing<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> EventRing<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(item);
    }

    /// Newest first.
    pub fn list(&self) -> Vec<T> {
        self.buffer.iter().rev().cloned().collect()
    }

    pub fn list_chronological(&self) -> Vec<T> {
        self.buffer.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent<E> {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: E,
}

#[derive(Debug)]
struct HubInner<E> {
    subscribers: Vec<UnboundedSender<E>>,
    history: EventRing<RecordedEvent<E>>,
    next_sequence: u64,
}

#[derive(Debug)]
pub struct EventHub<E> {
    inner: Mutex<HubInner<E>>,
}

impl<E: Clone> EventHub<E> {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                subscribers: Vec::new(),
                history: EventRing::new(history_capacity),
                next_sequence: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receives every event emitted after this call.
    pub fn subscribe(&self) -> UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn emit(&self, event: E) {
        let mut inner = self.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.history.push(RecordedEvent {
            sequence,
            timestamp: Utc::now(),
            event: event.clone(),
        });
        inner
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Recent events, oldest first.
    pub fn history(&self) -> Vec<RecordedEvent<E>> {
        self.lock().history.list_chronological()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}
