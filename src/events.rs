//! Channel-keyed local event fan-out
//!
//! Both the hub and client sessions re-emit bus traffic to in-process
//! listeners through an [`EventEmitter`].

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// An event as seen by local listeners
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub channel: String,
    pub source: Option<String>,
    pub values: Vec<Value>,
}

impl Event {
    pub fn new(channel: impl Into<String>, source: Option<String>, values: Vec<Value>) -> Self {
        Self {
            channel: channel.into(),
            source,
            values,
        }
    }
}

/// Handler for local events
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies a registered listener for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

#[derive(Clone)]
struct Entry {
    id: ListenerId,
    listener: Listener,
    once: bool,
}

/// Maps channel names to ordered listener lists
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<HashMap<String, Vec<Entry>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `listener` for every event on `channel`
    pub fn on<F>(&self, channel: &str, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(channel, Arc::new(listener), false)
    }

    /// Call `listener` for the next event on `channel` only
    pub fn once<F>(&self, channel: &str, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(channel, Arc::new(listener), true)
    }

    fn insert(&self, channel: &str, listener: Listener, once: bool) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.listeners
            .write()
            .entry(channel.to_string())
            .or_default()
            .push(Entry { id, listener, once });
        id
    }

    /// Remove one listener; returns false if it was not registered
    pub fn off(&self, channel: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(channel) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            listeners.remove(channel);
        }

        removed
    }

    /// Remove every listener on `channel`
    pub fn remove_all(&self, channel: &str) {
        self.listeners.write().remove(channel);
    }

    /// Deliver `event` to the listeners of its channel, in registration order
    ///
    /// Returns true if at least one listener ran. Listeners are called outside
    /// the lock, so they may register or remove listeners themselves.
    pub fn emit(&self, event: &Event) -> bool {
        let snapshot = {
            let mut listeners = self.listeners.write();
            let Some(entries) = listeners.get_mut(&event.channel) else {
                return false;
            };

            let snapshot = entries.clone();
            entries.retain(|e| !e.once);
            if entries.is_empty() {
                listeners.remove(&event.channel);
            }
            snapshot
        };

        for entry in &snapshot {
            (entry.listener)(event);
        }

        !snapshot.is_empty()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners.read().get(channel).map_or(0, Vec::len)
    }

    /// Channels with at least one listener
    pub fn channels(&self) -> Vec<String> {
        self.listeners.read().keys().cloned().collect()
    }
}
