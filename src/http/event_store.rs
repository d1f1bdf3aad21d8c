//! Resumable event log for SSE streams.
//!
//! Every frame written to an SSE stream is appended here first and its id is
//! sent as the SSE `id`. A client that reconnects with `Last-Event-ID` gets
//! the frames of that stream it has not yet seen.
//!
//! Event ids have the form `{stream_id}_{seq:020}`, where `seq` comes from a
//! store-wide counter. Zero padding makes ids of one stream sort in the
//! order they were stored.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::error::Result;
use crate::mcp::protocol::JsonRpcMessage;

/// Identifies one SSE stream within a session.
pub type StreamId = String;

/// Identifies one stored event.
pub type EventId = String;

/// Default number of events kept per stream.
pub const DEFAULT_EVENT_RETENTION: usize = 1000;

/// A stored message together with its id.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: EventId,
    pub message: JsonRpcMessage,
}

/// Receives replayed events in order.
pub type EventSink = mpsc::UnboundedSender<StoredEvent>;

/// Storage for resumable stream events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a message to a stream and return its new id.
    async fn store_event(&self, stream_id: &str, message: &JsonRpcMessage) -> Result<EventId>;

    /// Send every event stored after `last_event_id` on the same stream.
    ///
    /// Returns the stream the id belongs to, or `None` when the id is empty
    /// or not known; the caller should then start a fresh stream.
    async fn replay_events_after(
        &self,
        last_event_id: &str,
        sink: &EventSink,
    ) -> Result<Option<StreamId>>;
}

/// Split an event id into its stream id and sequence number.
pub fn parse_event_id(event_id: &str) -> Option<(&str, u64)> {
    let (stream_id, seq) = event_id.rsplit_once('_')?;
    if stream_id.is_empty() {
        return None;
    }
    Some((stream_id, seq.parse().ok()?))
}

#[derive(Debug, Default)]
struct Log {
    events: BTreeMap<EventId, (StreamId, JsonRpcMessage)>,
    /// Ids per stream, oldest first, for retention.
    streams: HashMap<StreamId, VecDeque<EventId>>,
    /// Last sequence number handed out.
    seq: u64,
}

/// In-process event store with bounded retention per stream.
#[derive(Debug)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
    /// Events kept per stream; 0 keeps everything.
    retention: usize,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_RETENTION)
    }
}

impl InMemoryEventStore {
    pub fn new(retention: usize) -> Self {
        Self {
            log: RwLock::new(Log::default()),
            retention,
        }
    }

    /// Number of events currently held.
    pub async fn len(&self) -> usize {
        self.log.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(&self, stream_id: &str, message: &JsonRpcMessage) -> Result<EventId> {
        // Numbered under the write lock, so ids follow insertion order.
        let mut log = self.log.write().await;
        log.seq += 1;
        let event_id = format!("{}_{:020}", stream_id, log.seq);
        log.events.insert(
            event_id.clone(),
            (stream_id.to_string(), message.clone()),
        );

        let ids = log.streams.entry(stream_id.to_string()).or_default();
        ids.push_back(event_id.clone());
        let mut evicted = Vec::new();
        if self.retention > 0 {
            while ids.len() > self.retention {
                if let Some(old) = ids.pop_front() {
                    evicted.push(old);
                }
            }
        }
        for old in evicted {
            log.events.remove(&old);
        }

        Ok(event_id)
    }

    async fn replay_events_after(
        &self,
        last_event_id: &str,
        sink: &EventSink,
    ) -> Result<Option<StreamId>> {
        if last_event_id.is_empty() {
            return Ok(None);
        }

        let log = self.log.read().await;
        let Some((stream_id, _)) = log.events.get(last_event_id) else {
            debug!(last_event_id, "Unknown event id, nothing to replay");
            return Ok(None);
        };

        let after = (Bound::Excluded(last_event_id.to_string()), Bound::Unbounded);
        for (id, (stream, message)) in log.events.range::<EventId, _>(after) {
            if stream != stream_id {
                continue;
            }
            let event = StoredEvent {
                id: id.clone(),
                message: message.clone(),
            };
            if sink.send(event).is_err() {
                break;
            }
        }

        Ok(Some(stream_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::JsonRpcNotification;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn note(n: i64) -> JsonRpcMessage {
        JsonRpcNotification::new("test/event", Some(serde_json::json!({ "n": n }))).into()
    }

    fn n_of(event: &StoredEvent) -> i64 {
        match &event.message {
            JsonRpcMessage::Notification(n) => n.params.as_ref().unwrap()["n"].as_i64().unwrap(),
            other => panic!("unexpected message {:?}", other),
        }
    }

    async fn replay(store: &InMemoryEventStore, id: &str) -> (Option<StreamId>, Vec<StoredEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = store.replay_events_after(id, &tx).await.unwrap();
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (stream, events)
    }

    #[test]
    fn test_parse_event_id() {
        assert_eq!(
            parse_event_id("standalone_00000000000000000007"),
            Some(("standalone", 7))
        );
        assert_eq!(parse_event_id("a_b_00000000000000000002"), Some(("a_b", 2)));
        assert_eq!(parse_event_id("nounderscore"), None);
        assert_eq!(parse_event_id("_1"), None);
        assert_eq!(parse_event_id("s_notanumber"), None);
    }

    #[tokio::test]
    async fn test_ids_are_prefixed_and_ordered() {
        let store = InMemoryEventStore::default();
        let first = store.store_event("s1", &note(1)).await.unwrap();
        let second = store.store_event("s1", &note(2)).await.unwrap();

        assert!(first.starts_with("s1_"));
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_concurrent_store_gives_unique_ids() {
        let store = Arc::new(InMemoryEventStore::new(0));
        let mut handles = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.store_event("s", &note(i)).await.unwrap()
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 64);
        assert_eq!(store.len().await, 64);
    }

    #[tokio::test]
    async fn test_replay_after_k_skips_other_streams() {
        let store = InMemoryEventStore::default();
        let mut ids = Vec::new();
        for n in 1..=5 {
            ids.push(store.store_event("a", &note(n)).await.unwrap());
            store.store_event("b", &note(100 + n)).await.unwrap();
        }

        let (stream, events) = replay(&store, &ids[1]).await;
        assert_eq!(stream.as_deref(), Some("a"));
        let seen: Vec<i64> = events.iter().map(n_of).collect();
        assert_eq!(seen, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_replay_of_last_event_is_empty() {
        let store = InMemoryEventStore::default();
        let id = store.store_event("a", &note(1)).await.unwrap();

        let (stream, events) = replay(&store, &id).await;
        assert_eq!(stream.as_deref(), Some("a"));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_or_empty_id_replays_nothing() {
        let store = InMemoryEventStore::default();
        store.store_event("a", &note(1)).await.unwrap();

        assert_eq!(replay(&store, "").await.0, None);
        assert_eq!(replay(&store, "a_00000000000000000099").await.0, None);
        assert_eq!(replay(&store, "garbage").await.0, None);
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest_per_stream() {
        let store = InMemoryEventStore::new(2);
        let first = store.store_event("a", &note(1)).await.unwrap();
        let second = store.store_event("a", &note(2)).await.unwrap();
        store.store_event("a", &note(3)).await.unwrap();
        store.store_event("b", &note(4)).await.unwrap();

        assert_eq!(store.len().await, 3);
        assert_eq!(replay(&store, &first).await.0, None);

        let (_, events) = replay(&store, &second).await;
        assert_eq!(events.iter().map(n_of).collect::<Vec<_>>(), vec![3]);
    }
}
