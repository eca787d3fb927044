use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex as StdMutex, PoisonError,
    },
};

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::debug;

use crate::broker::{Broker, BrokerError, BrokerStream};

const DEFAULT_CAPACITY: usize = 1024;
/// Publishes kept for inspection; older ones are forgotten.
const DEFAULT_LOG_CAPACITY: usize = 1024;

/// An in-process broker for tests. Share one instance (behind an `Arc`)
/// between several buses to simulate several worker processes. It never
/// leaves the process, so real deployments use
/// [MulticastBroker](super::MulticastBroker) or another [Broker].
#[derive(Debug)]
pub struct MemoryBroker {
    topics: StdMutex<HashMap<String, broadcast::Sender<Bytes>>>,
    published: Mutex<VecDeque<(String, Bytes)>>,
    log_capacity: usize,
    offline: AtomicBool,
    capacity: usize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Default::default()
    }

    /// `capacity` bounds how far a subscriber may fall behind before it
    /// sees [BrokerError::Lagged].
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Default::default(),
            published: Default::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            offline: AtomicBool::new(false),
            capacity,
        }
    }

    /// Keep at most `log_capacity` publishes for [published](Self::published).
    pub fn with_log_capacity(mut self, log_capacity: usize) -> Self {
        self.log_capacity = log_capacity;
        self
    }

    /// The most recent successful publishes, oldest first.
    pub async fn published(&self) -> MutexGuard<'_, VecDeque<(String, Bytes)>> {
        self.published.lock().await
    }

    /// Number of logged publishes to `topic`.
    pub async fn published_count(&self, topic: &str) -> usize {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }

    /// While offline both publish and subscribe fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), BrokerError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(BrokerError::Unavailable("memory broker is offline".into()))
        } else {
            Ok(())
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        self.check_online()?;
        let mut published = self.published.lock().await;
        if self.log_capacity > 0 {
            if published.len() == self.log_capacity {
                published.pop_front();
            }
            published.push_back((topic.to_owned(), payload.clone()));
        }
        // nobody listening is not an error
        if self.sender(topic).send(payload).is_err() {
            debug!(topic, "Published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BrokerStream, BrokerError> {
        self.check_online()?;
        let rx = self.sender(topic).subscribe();
        Ok(Box::pin(BroadcastStream::new(rx).map(|item| {
            item.map_err(|BroadcastStreamRecvError::Lagged(n)| BrokerError::Lagged(n))
        })))
    }
}
