//! A producer's single-slot outbound buffer.
//!
//! When the brain can't be reached, only the most recent undelivered envelope
//! is kept. A newer event overwrites it: a stale motion frame is not worth
//! sending late.

use meeboproto::{Envelope, Outbound};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Minimum gap between retries of the held envelope.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub struct Outbox {
    outbound: Box<dyn Outbound>,
    pending: Option<Envelope>,
    last_attempt: Option<Instant>,
    retry_interval: Duration,
}

impl Outbox {
    pub fn new(outbound: Box<dyn Outbound>) -> Self {
        Self {
            outbound,
            pending: None,
            last_attempt: None,
            retry_interval: RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Send now. On failure `envelope` replaces whatever was held.
    pub async fn send(&mut self, envelope: Envelope) -> bool {
        if let Some(stale) = self.pending.take() {
            debug!("dropping undelivered {} {}", stale.capability, stale.id);
        }
        self.attempt(envelope).await
    }

    /// Retry the held envelope, at most once per retry interval.
    pub async fn retry_pending(&mut self) -> bool {
        let due = self
            .last_attempt
            .map_or(true, |at| at.elapsed() >= self.retry_interval);
        if !due {
            return false;
        }
        match self.pending.take() {
            Some(envelope) => self.attempt(envelope).await,
            None => false,
        }
    }

    pub fn pending(&self) -> Option<&Envelope> {
        self.pending.as_ref()
    }

    async fn attempt(&mut self, envelope: Envelope) -> bool {
        self.last_attempt = Some(Instant::now());
        match self.outbound.send(envelope.clone()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("holding {} for {}: {}", envelope.capability, self.outbound.endpoint(), e);
                self.pending = Some(envelope);
                false
            }
        }
    }
}
