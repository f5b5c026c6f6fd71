//! Transport seams: one-way publish, blocking receive, and the retry policy.
//!
//! Delivery is at-least-once. A publish attempt that times out may still be
//! delivered later, so a retry can produce a duplicate; receivers tolerate it.

use async_trait::async_trait;
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("Failed to bind {endpoint}: {message}")]
    Bind { endpoint: String, message: String },

    #[error("Publish to {endpoint} failed after {attempts} attempts: {last}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        last: String,
    },

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Transport closed")]
    Closed,
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPolicy {
    pub publish_timeout: Duration,
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(2),
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&meeboconf::TransportConfig> for TransportPolicy {
    fn from(config: &meeboconf::TransportConfig) -> Self {
        Self {
            publish_timeout: config.publish_timeout(),
            attempts: config.attempts.max(1),
            backoff: config.backoff(),
        }
    }
}

impl TransportPolicy {
    /// Sleep between attempts; no sleep after the last one.
    pub async fn pause_after(&self, attempt: u32) {
        if attempt < self.attempts {
            tokio::time::sleep(self.backoff).await;
        }
    }
}

/// Sends envelopes to one endpoint. Each task owns its own.
#[async_trait]
pub trait Outbound: Send {
    fn endpoint(&self) -> &str;

    /// Publish with bounded retries. Never blocks past `attempts * (timeout + backoff)`.
    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError>;
}

/// The single consuming end of a process.
#[async_trait]
pub trait Inbound: Send {
    /// Next well-formed envelope. Malformed messages are logged and skipped.
    async fn receive(&mut self) -> Result<Envelope, TransportError>;
}

/// Opens publishers on demand.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn Outbound>, TransportError>;
}

/// Reply targets kept open at once. The least recently answered goes first.
pub const DEFAULT_REPLY_PUBLISHERS: usize = 32;

/// Cached publishers per reply target, for the brain's answers.
pub struct ReplyPublishers {
    connector: Arc<dyn Connector>,
    publishers: LruCache<String, Box<dyn Outbound>>,
}

impl ReplyPublishers {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_capacity(connector, DEFAULT_REPLY_PUBLISHERS)
    }

    pub fn with_capacity(connector: Arc<dyn Connector>, capacity: usize) -> Self {
        Self {
            connector,
            publishers: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub async fn send_to(&mut self, target: &str, envelope: Envelope) -> Result<(), TransportError> {
        if !self.publishers.contains(target) {
            let publisher = self.connector.connect(target)?;
            debug!("opened reply publisher for {}", target);
            if let Some((evicted, _)) = self.publishers.push(target.to_string(), publisher) {
                debug!("closed idle reply publisher for {}", evicted);
            }
        }
        let Some(publisher) = self.publishers.get_mut(target) else {
            return Err(TransportError::Closed);
        };

        let result = publisher.send(envelope).await;
        if result.is_err() {
            // Drop the socket so the next reply starts from a fresh connection.
            self.publishers.pop(target);
        }
        result
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

#[derive(Default)]
struct BusState {
    queues: HashMap<String, mpsc::UnboundedSender<Envelope>>,
    unreachable: HashSet<String>,
    delivered: HashMap<String, usize>,
}

/// In-process bus with the same semantics as the ZMQ transport, for tests.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
    policy: TransportPolicy,
}

impl MemoryBus {
    pub fn new(policy: TransportPolicy) -> Self {
        Self {
            state: Arc::default(),
            policy,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start consuming at `endpoint`. A second bind replaces the first.
    pub fn bind(&self, endpoint: &str) -> MemoryInbound {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().queues.insert(endpoint.to_string(), tx);
        MemoryInbound { rx }
    }

    pub fn publisher(&self, endpoint: &str) -> MemoryPublisher {
        MemoryPublisher {
            bus: self.clone(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Simulate a peer going away (connection refused) or coming back.
    pub fn set_reachable(&self, endpoint: &str, reachable: bool) {
        let mut state = self.state();
        if reachable {
            state.unreachable.remove(endpoint);
        } else {
            state.unreachable.insert(endpoint.to_string());
        }
    }

    /// Envelopes successfully handed to `endpoint` so far.
    pub fn delivered(&self, endpoint: &str) -> usize {
        self.state().delivered.get(endpoint).copied().unwrap_or(0)
    }

    fn try_deliver(&self, endpoint: &str, envelope: Envelope) -> Result<(), String> {
        let mut state = self.state();
        if state.unreachable.contains(endpoint) {
            return Err("connection refused".to_string());
        }
        let queue = state
            .queues
            .get(endpoint)
            .ok_or_else(|| "no listener".to_string())?;
        queue.send(envelope).map_err(|_| "listener gone".to_string())?;
        *state.delivered.entry(endpoint.to_string()).or_default() += 1;
        Ok(())
    }
}

impl Connector for MemoryBus {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn Outbound>, TransportError> {
        Ok(Box::new(self.publisher(endpoint)))
    }
}

pub struct MemoryPublisher {
    bus: MemoryBus,
    endpoint: String,
}

#[async_trait]
impl Outbound for MemoryPublisher {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let policy = self.bus.policy.clone();
        let mut last = String::new();
        for attempt in 1..=policy.attempts {
            match self.bus.try_deliver(&self.endpoint, envelope.clone()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("publish to {} attempt {}/{} failed: {}", self.endpoint, attempt, policy.attempts, e);
                    last = e;
                }
            }
            policy.pause_after(attempt).await;
        }
        Err(TransportError::Exhausted {
            endpoint: self.endpoint.clone(),
            attempts: policy.attempts,
            last,
        })
    }
}

pub struct MemoryInbound {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait]
impl Inbound for MemoryInbound {
    async fn receive(&mut self) -> Result<Envelope, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

impl MemoryInbound {
    /// Non-blocking peek for tests that assert nothing was sent.
    pub fn try_receive(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Capability;

    fn quick() -> TransportPolicy {
        TransportPolicy {
            publish_timeout: Duration::from_millis(50),
            attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn memory_bus_delivers_in_order() {
        let bus = MemoryBus::new(quick());
        let mut inbound = bus.bind("brain");
        let mut publisher = bus.publisher("brain");

        for text in ["one", "two", "three"] {
            publisher
                .send(Envelope::text(Capability::Voice, "Porch", text))
                .await
                .unwrap();
        }

        for expected in ["one", "two", "three"] {
            let envelope = inbound.receive().await.unwrap();
            assert_eq!(envelope.as_text().unwrap(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_peer_exhausts_retries() {
        let bus = MemoryBus::new(quick());
        let _inbound = bus.bind("brain");
        bus.set_reachable("brain", false);

        let mut publisher = bus.publisher("brain");
        let err = publisher
            .send(Envelope::text(Capability::Voice, "Porch", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Exhausted { attempts: 3, .. }));
        assert_eq!(bus.delivered("brain"), 0);
    }

    #[tokio::test]
    async fn reply_publishers_cache_per_target() {
        let bus = MemoryBus::new(quick());
        let mut porch = bus.bind("porch");
        let _garage = bus.bind("garage");
        let mut replies = ReplyPublishers::new(Arc::new(bus.clone()));

        for _ in 0..2 {
            replies
                .send_to("porch", Envelope::text(Capability::Voice, "Central", "hi"))
                .await
                .unwrap();
        }
        replies
            .send_to("garage", Envelope::text(Capability::Voice, "Central", "hi"))
            .await
            .unwrap();

        assert_eq!(replies.len(), 2);
        assert!(porch.try_receive().is_some());
        assert!(porch.try_receive().is_some());
        assert!(porch.try_receive().is_none());
    }

    #[tokio::test]
    async fn reply_publishers_evict_least_recent_target() {
        let bus = MemoryBus::new(quick());
        let mut porch = bus.bind("porch");
        let _garage = bus.bind("garage");
        let _shed = bus.bind("shed");
        let mut replies = ReplyPublishers::with_capacity(Arc::new(bus.clone()), 2);
        let hi = || Envelope::text(Capability::Voice, "Central", "hi");

        replies.send_to("porch", hi()).await.unwrap();
        replies.send_to("garage", hi()).await.unwrap();
        replies.send_to("porch", hi()).await.unwrap();
        replies.send_to("shed", hi()).await.unwrap();

        assert_eq!(replies.len(), 2);
        // Garage was evicted, not porch; a later reply reopens it.
        replies.send_to("garage", hi()).await.unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(bus.delivered("garage"), 2);
        assert!(porch.try_receive().is_some());
        assert!(porch.try_receive().is_some());
    }
}
