//! Subscriber registry: the hub's table of open event streams

use crate::error::Result;
use crate::protocol::{encode, Envelope};
use bytes::Bytes;
use dashmap::DashMap;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

type SubscriberMap = DashMap<Uuid, Arc<Subscriber>>;

/// One peer's open inbound event stream
#[derive(Debug)]
pub struct Subscriber {
    /// Unique per stream instance
    pub id: Uuid,
    /// Identity claimed when the stream was opened
    pub source_id: Option<String>,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl Subscriber {
    /// Queue a frame on this stream; fails once the reading side is gone
    pub fn send(&self, frame: Bytes) -> std::result::Result<(), mpsc::error::SendError<Bytes>> {
        self.tx.send(frame)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Tracks every attached subscriber, keyed by stream instance
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<SubscriberMap>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return the body that feeds it
    ///
    /// Dropping the returned stream (the peer closed or the transport
    /// errored) removes the subscriber.
    pub fn add(&self, source_id: Option<String>) -> SubscriberStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Arc::new(Subscriber {
            id: Uuid::new_v4(),
            source_id,
            tx,
        });
        let id = subscriber.id;

        debug!(subscriber_id = %id, source = ?subscriber.source_id, "Subscriber attached");
        self.subscribers.insert(id, subscriber);

        SubscriberStream {
            id,
            rx,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Remove a subscriber; removing an absent entry is a no-op
    ///
    /// Removal drops the sending half, which ends the peer's stream.
    pub fn remove(&self, id: Uuid) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber_id = %id, "Subscriber removed");
        }
        removed
    }

    /// Deliver an envelope to every subscriber it is addressed to
    ///
    /// Returns the number of subscribers the frame was queued for.
    pub fn dispatch(&self, envelope: &Envelope) -> Result<usize> {
        let frame = encode(envelope)?;
        Ok(self.dispatch_frame(envelope, frame))
    }

    /// Like [`dispatch`](Self::dispatch) with a pre-encoded frame
    pub fn dispatch_frame(&self, envelope: &Envelope, frame: Bytes) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if !envelope.is_for(subscriber.source_id.as_deref()) {
                continue;
            }

            match subscriber.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    // Expected during disconnect races
                    debug!(subscriber_id = %subscriber.id, "Subscriber stream closed during dispatch");
                    dead.push(subscriber.id);
                }
            }
        }

        for id in dead {
            self.remove(id);
        }

        if delivered == 0 {
            debug!(
                channel = %envelope.channel,
                destination = ?envelope.destination,
                "No subscribers for envelope"
            );
        }

        delivered
    }

    /// True iff at least one subscriber is attached
    pub fn has_listeners(&self) -> bool {
        !self.subscribers.is_empty()
    }

    pub fn count(&self) -> usize {
        self.subscribers.len()
    }

    /// Subscribers registered under `source_id`
    pub fn find_by_source(&self, source_id: &str) -> Vec<Arc<Subscriber>> {
        self.subscribers
            .iter()
            .filter(|entry| entry.value().source_id.as_deref() == Some(source_id))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Close every stream registered under `source_id`
    pub fn close_source(&self, source_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .find_by_source(source_id)
            .into_iter()
            .map(|s| s.id)
            .collect();
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }

    /// Close every stream
    pub fn clear(&self) -> usize {
        let ids: Vec<Uuid> = self.subscribers.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }
}

/// The never-ending response body handed to a subscribing peer
///
/// Yields queued frames in dispatch order and ends once the subscriber is
/// removed from the registry.
pub struct SubscriberStream {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<Bytes>,
    registry: Weak<SubscriberMap>,
}

impl SubscriberStream {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Stream for SubscriberStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        if let Some(subscribers) = self.registry.upgrade() {
            if subscribers.remove(&self.id).is_some() {
                debug!(subscriber_id = %self.id, "Subscriber stream dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;
    use futures::StreamExt;
    use serde_json::json;

    fn drain(stream: &mut SubscriberStream) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(frame) = stream.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let registry = SubscriberRegistry::new();
        let mut a = registry.add(Some("a".into()));
        let mut b = registry.add(Some("b".into()));
        let mut anon = registry.add(None);

        let delivered = registry.dispatch(&Envelope::new("topic", vec![json!(1)])).unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(drain(&mut a).len(), 1);
        assert_eq!(drain(&mut b).len(), 1);
        assert_eq!(drain(&mut anon).len(), 1);
    }

    #[test]
    fn test_addressed_reaches_only_destination() {
        let registry = SubscriberRegistry::new();
        let mut a = registry.add(Some("a".into()));
        let mut b = registry.add(Some("b".into()));
        let mut anon = registry.add(None);

        let env = Envelope::new("topic", vec![json!("x")]).to_destination("b");
        assert_eq!(registry.dispatch(&env).unwrap(), 1);
        assert!(drain(&mut a).is_empty());
        assert_eq!(drain(&mut b).len(), 1);
        assert!(drain(&mut anon).is_empty());
    }

    #[test]
    fn test_addressed_without_match_is_noop() {
        let registry = SubscriberRegistry::new();
        let mut a = registry.add(Some("a".into()));

        let env = Envelope::new("topic", vec![]).to_destination("ghost");
        assert_eq!(registry.dispatch(&env).unwrap(), 0);
        assert!(drain(&mut a).is_empty());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let stream = registry.add(Some("a".into()));
        let id = stream.id();

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.count(), 0);
        assert!(!registry.has_listeners());

        // Dropping after removal is also harmless
        drop(stream);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_drop_removes_subscriber() {
        let registry = SubscriberRegistry::new();
        let stream = registry.add(Some("a".into()));
        let _other = registry.add(Some("b".into()));
        assert_eq!(registry.count(), 2);

        drop(stream);
        assert_eq!(registry.count(), 1);
        assert!(registry.find_by_source("a").is_empty());
        assert!(registry.has_listeners());
    }

    #[test]
    fn test_same_source_gets_distinct_entries() {
        let registry = SubscriberRegistry::new();
        let first = registry.add(Some("a".into()));
        let second = registry.add(Some("a".into()));

        assert_ne!(first.id(), second.id());
        assert_eq!(registry.find_by_source("a").len(), 2);
    }

    #[tokio::test]
    async fn test_close_source_ends_stream() {
        let registry = SubscriberRegistry::new();
        let mut stream = registry.add(Some("a".into()));
        let _b = registry.add(Some("b".into()));

        registry
            .dispatch(&Envelope::new("last", vec![]).to_destination("a"))
            .unwrap();
        assert_eq!(registry.close_source("a"), 1);
        assert_eq!(registry.count(), 1);

        // Queued frames are still delivered before the end
        let frame = stream.next().await.unwrap().unwrap();
        assert!(frame.starts_with(b"{\"channel\":\"last\""));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_frames_arrive_in_dispatch_order() {
        let registry = SubscriberRegistry::new();
        let stream = registry.add(None);

        for i in 0..10 {
            registry.dispatch(&Envelope::new("seq", vec![json!(i)])).unwrap();
        }
        registry.clear();

        let values: Vec<i64> = decode(stream)
            .map(|f| f.unwrap().values[0].as_i64().unwrap())
            .collect()
            .await;
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_closed_receiver_is_pruned_on_dispatch() {
        let registry = SubscriberRegistry::new();
        let mut stream = registry.add(Some("a".into()));
        let id = stream.id();

        // Closing the receiving half without dropping the stream
        stream.rx.close();
        assert!(registry.find_by_source("a")[0].is_closed());

        assert_eq!(registry.dispatch(&Envelope::new("c", vec![])).unwrap(), 0);
        assert!(!registry.remove(id));
    }
}
