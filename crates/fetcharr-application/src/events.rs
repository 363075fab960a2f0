// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::{Arc, Mutex};

use fetcharr_domain::{
    DomainEvent, ItemState, ItemTransitioned, ItemTransitionedPayload, MediaItem,
};
use serde::Serialize;
use serde_json::json;

/// Event publisher abstraction. Publishing is synchronous and cheap; sinks
/// that do real work (notifications, statistics) consume from their own
/// queue so a transition never blocks on delivery.
pub trait EventPublisher: Send + Sync {
    fn publish<T>(&self, event: &DomainEvent<T>)
    where
        T: Serialize + Send + Sync + 'static;
}

pub fn transition_event(item: &MediaItem, from: ItemState, to: ItemState) -> ItemTransitioned {
    DomainEvent::new(
        "item.transitioned",
        ItemTransitionedPayload {
            item_id: item.id,
            from_state: from,
            to_state: to,
            title: item.title.clone(),
        },
    )
}

/// A minimal in-memory event bus that stores serialized events.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    inner: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("Failed to acquire lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retrieve and clear all captured events
    pub fn drain(&self) -> Vec<serde_json::Value> {
        let mut guard = self.inner.lock().expect("Failed to acquire lock");
        std::mem::take(&mut *guard)
    }
}

/// Production bus: events are serialized once and pushed onto an unbounded
/// mpsc channel. A slow or absent consumer never blocks publication;
/// sending into a closed channel drops the event.
pub struct ChannelEventBus {
    tx: tokio::sync::mpsc::UnboundedSender<serde_json::Value>,
}

impl ChannelEventBus {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelEventBus {
    fn publish<T>(&self, event: &DomainEvent<T>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let value = json!({
            "name": event.name,
            "occurred_at": event.occurred_at,
            "payload": event.payload,
        });
        let _ = self.tx.send(value);
    }
}

impl EventPublisher for InMemoryEventBus {
    fn publish<T>(&self, event: &DomainEvent<T>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let value = json!({
            "name": event.name,
            "occurred_at": event.occurred_at,
            "payload": event.payload,
        });
        self.inner
            .lock()
            .expect("Failed to acquire lock")
            .push(value);
    }
}
