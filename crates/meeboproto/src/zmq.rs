//! ZMQ transport over tmq.
//!
//! Every process binds one PULL socket for everything addressed to it and
//! opens PUSH sockets towards its peers, one per task. Sockets are never
//! shared between tasks, so multipart writes can't interleave on the wire.
//!
//! ## Socket options
//!
//! - `LINGER` 0 for clean shutdown
//! - `RECONNECT_IVL` 1s, capped at 60s by `RECONNECT_IVL_MAX`

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tmq::{Context, Multipart, TmqError};
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::frame::PROTOCOL_VERSION;
use crate::transport::{Connector, Inbound, Outbound, TransportError, TransportPolicy};

/// Default reconnect interval in milliseconds
pub const DEFAULT_RECONNECT_IVL_MS: i32 = 1000;

/// Maximum reconnect interval in milliseconds (60 seconds)
pub const DEFAULT_RECONNECT_IVL_MAX_MS: i32 = 60_000;

type BoxedSink = Pin<Box<dyn futures::Sink<Multipart, Error = TmqError> + Send>>;

type BoxedStream = Pin<Box<dyn futures::Stream<Item = Result<Multipart, TmqError>> + Send>>;

fn multipart_to_frames(mp: Multipart) -> Vec<Bytes> {
    mp.into_iter().map(|msg| Bytes::from(msg.to_vec())).collect()
}

fn frames_to_multipart(frames: &[Bytes]) -> Multipart {
    frames.iter().map(|f| f.to_vec()).collect::<Vec<_>>().into()
}

/// PUSH socket towards one endpoint.
pub struct ZmqPublisher {
    endpoint: String,
    sink: BoxedSink,
    policy: TransportPolicy,
}

impl ZmqPublisher {
    /// Connect lazily; ZMQ completes the handshake once the peer is up.
    pub fn connect(context: &Context, endpoint: &str, policy: TransportPolicy) -> Result<Self, TransportError> {
        let socket = tmq::push(context)
            .set_linger(0)
            .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
            .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
            .connect(endpoint)
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        debug!("PUSH connected to {}", endpoint);
        Ok(Self {
            endpoint: endpoint.to_string(),
            sink: Box::pin(socket),
            policy,
        })
    }
}

#[async_trait]
impl Outbound for ZmqPublisher {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let frames = envelope.to_frames();
        let mut last = String::new();

        for attempt in 1..=self.policy.attempts {
            let multipart = frames_to_multipart(&frames);
            match tokio::time::timeout(self.policy.publish_timeout, self.sink.send(multipart)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => last = e.to_string(),
                Err(_) => last = format!("timed out after {:?}", self.policy.publish_timeout),
            }
            warn!(
                "publish {:?} to {} attempt {}/{} failed: {}",
                envelope.capability, self.endpoint, attempt, self.policy.attempts, last
            );
            self.policy.pause_after(attempt).await;
        }

        Err(TransportError::Exhausted {
            endpoint: self.endpoint.clone(),
            attempts: self.policy.attempts,
            last,
        })
    }
}

/// PULL socket bound to this process's listen endpoint.
pub struct ZmqConsumer {
    endpoint: String,
    stream: BoxedStream,
}

impl ZmqConsumer {
    pub fn bind(context: &Context, endpoint: &str) -> Result<Self, TransportError> {
        let socket = tmq::pull(context)
            .set_linger(0)
            .bind(endpoint)
            .map_err(|e| TransportError::Bind {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        debug!("PULL bound on {}", endpoint);
        Ok(Self {
            endpoint: endpoint.to_string(),
            stream: Box::pin(socket),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Inbound for ZmqConsumer {
    async fn receive(&mut self) -> Result<Envelope, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(mp)) => {
                    let frames = multipart_to_frames(mp);
                    if !frames.iter().any(|f| f.as_ref() == PROTOCOL_VERSION) {
                        warn!("Received non-MEEBO1 message on {}, ignoring", self.endpoint);
                        continue;
                    }
                    match Envelope::from_frames(&frames) {
                        Ok(envelope) => return Ok(envelope),
                        Err(e) => warn!("Dropping malformed message on {}: {}", self.endpoint, e),
                    }
                }
                Some(Err(e)) => return Err(TransportError::Socket(e.to_string())),
                None => return Err(TransportError::Closed),
            }
        }
    }
}

/// Opens a fresh [`ZmqPublisher`] per call, sharing one context.
#[derive(Clone)]
pub struct ZmqConnector {
    context: Arc<Context>,
    policy: TransportPolicy,
}

impl ZmqConnector {
    pub fn new(context: Arc<Context>, policy: TransportPolicy) -> Self {
        Self { context, policy }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn publisher(&self, endpoint: &str) -> Result<ZmqPublisher, TransportError> {
        ZmqPublisher::connect(&self.context, endpoint, self.policy.clone())
    }
}

impl Connector for ZmqConnector {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn Outbound>, TransportError> {
        Ok(Box::new(self.publisher(endpoint)?))
    }
}
