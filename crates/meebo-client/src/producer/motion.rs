use chrono::{DateTime, Utc};
use meeboproto::Cooldown;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ProducerContext, ProducerCore, ProducerState, READ_ERROR_PAUSE};
use crate::capability::{MotionCamera, MotionSample};
use crate::event::SensorEvent;
use crate::outbox::Outbox;

/// How often a disabled motion producer looks at the flag again.
pub const IDLE_RECHECK: Duration = Duration::from_secs(5);

pub struct MotionProducer {
    core: ProducerCore,
    camera: Box<dyn MotionCamera>,
}

impl MotionProducer {
    pub fn new(ctx: ProducerContext, camera: Box<dyn MotionCamera>, outbox: Outbox) -> Self {
        Self {
            core: ProducerCore::new("motion", ctx, outbox),
            camera,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.core.state
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(e) = self.camera.open().await {
            error!("motion producer stopped: {}", e);
            return;
        }
        info!("📷 motion producer armed");

        loop {
            if !self.core.ctx.env.motion_enabled() {
                self.core.enter(ProducerState::Idle);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(IDLE_RECHECK) => continue,
                }
            }
            self.core.enter(ProducerState::Armed);
            self.core.outbox.retry_pending().await;

            let sample = tokio::select! {
                _ = cancel.cancelled() => return,
                sample = self.camera.sample() => sample,
            };
            match sample {
                Ok(sample) => {
                    self.on_sample(sample, Utc::now()).await;
                }
                Err(e) if !e.is_fatal() => {
                    warn!("skipping motion sample: {}", e);
                    tokio::time::sleep(READ_ERROR_PAUSE).await;
                }
                Err(e) => {
                    error!("motion producer stopped: {}", e);
                    return;
                }
            }
        }
    }

    /// Act on one sample. Returns whether an event went out.
    pub async fn on_sample(&mut self, sample: MotionSample, now: DateTime<Utc>) -> bool {
        if !sample.motion {
            return false;
        }
        self.core.enter(ProducerState::Triggered);

        let env = self.core.ctx.env.clone();
        let timing = &self.core.ctx.timing;
        if !env.compare_and_swap_cooldown(Cooldown::MotionAlert, now, timing.motion_alert()) {
            debug!("motion inside alert interval");
            return false;
        }

        let event = match env.recognized_identity_at(now) {
            Some(identity) => {
                if env.talking() || !env.compare_and_swap_cooldown(Cooldown::Motion, now, timing.motion_cooldown()) {
                    debug!("{} still at the door, nothing new to say", identity);
                    None
                } else {
                    Some(SensorEvent::recognized(identity))
                }
            }
            None => Some(SensorEvent::motion(sample.jpeg)),
        };

        let sent = match event {
            Some(event) => self.core.emit(event).await,
            None => false,
        };
        self.core.enter(ProducerState::Cooldown);
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeDelta;
    use meeboconf::TimingConfig;
    use meeboproto::{
        Capability, ContentKind, Environment, EnvironmentSeed, Inbound, MemoryBus, MotionRequest, TransportPolicy,
    };
    use pretty_assertions::assert_eq;

    use crate::capability::SensorError;

    struct NoCamera;

    #[async_trait]
    impl MotionCamera for NoCamera {
        async fn open(&mut self) -> Result<(), SensorError> {
            Err(SensorError::Open {
                sensor: "motion",
                message: "no device".into(),
            })
        }

        async fn sample(&mut self) -> Result<MotionSample, SensorError> {
            Err(SensorError::Closed("motion"))
        }
    }

    fn producer(bus: &MemoryBus) -> (MotionProducer, Environment) {
        let env = Environment::new(EnvironmentSeed::default());
        let ctx = ProducerContext {
            env: env.clone(),
            timing: TimingConfig::default(),
            client: "FrontDoor".into(),
            reply_to: "front".into(),
        };
        let outbox = Outbox::new(Box::new(bus.publisher("brain")));
        (MotionProducer::new(ctx, Box::new(NoCamera), outbox), env)
    }

    /// Plays back a fixed list of samples, then reports the feed gone.
    struct Scripted(std::collections::VecDeque<Result<MotionSample, SensorError>>);

    #[async_trait]
    impl MotionCamera for Scripted {
        async fn open(&mut self) -> Result<(), SensorError> {
            Ok(())
        }

        async fn sample(&mut self) -> Result<MotionSample, SensorError> {
            self.0.pop_front().unwrap_or(Err(SensorError::Closed("motion")))
        }
    }

    fn moving() -> MotionSample {
        MotionSample {
            motion: true,
            jpeg: Bytes::from_static(b"jpeg"),
        }
    }

    #[tokio::test]
    async fn alert_interval_debounces_frames() {
        let bus = MemoryBus::new(TransportPolicy::default());
        let mut brain = bus.bind("brain");
        let (mut producer, _env) = producer(&bus);
        let t0 = Utc::now();

        assert!(!producer.on_sample(MotionSample { motion: false, jpeg: Bytes::new() }, t0).await);
        assert!(producer.on_sample(moving(), t0).await);
        assert!(!producer.on_sample(moving(), t0 + TimeDelta::seconds(1)).await);
        assert!(producer.on_sample(moving(), t0 + TimeDelta::seconds(3)).await);
        assert_eq!(producer.state(), ProducerState::Cooldown);

        let first = brain.receive().await.unwrap();
        assert_eq!((first.capability, first.content_kind), (Capability::Motion, ContentKind::Image));
        assert_eq!(first.reply_to, "front");
        assert_eq!(bus.delivered("brain"), 2);
    }

    #[tokio::test]
    async fn remembered_visitor_sends_recognized_once() {
        let bus = MemoryBus::new(TransportPolicy::default());
        let mut brain = bus.bind("brain");
        let (mut producer, env) = producer(&bus);
        let t0 = Utc::now();
        env.remember_identity("alice", t0, Duration::from_secs(60));

        assert!(producer.on_sample(moving(), t0).await);
        // Alert interval has passed, the dialogue cooldown has not.
        assert!(!producer.on_sample(moving(), t0 + TimeDelta::seconds(5)).await);

        let sent = brain.receive().await.unwrap();
        assert_eq!(
            sent.decode_json::<MotionRequest>().unwrap(),
            MotionRequest {
                recognized: "alice".into()
            }
        );
        assert!(brain.try_receive().is_none());
    }

    #[tokio::test]
    async fn remembered_visitor_is_quiet_while_talking() {
        let bus = MemoryBus::new(TransportPolicy::default());
        let _brain = bus.bind("brain");
        let (mut producer, env) = producer(&bus);
        let t0 = Utc::now();
        env.remember_identity("alice", t0, Duration::from_secs(60));
        let _talking = env.begin_talking().unwrap();

        assert!(!producer.on_sample(moving(), t0).await);
        assert_eq!(bus.delivered("brain"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_sample_is_skipped() {
        let bus = MemoryBus::new(TransportPolicy::default());
        let mut brain = bus.bind("brain");
        let (producer, _env) = producer(&bus);
        let feed = Scripted(
            vec![
                Err(SensorError::Read {
                    sensor: "motion",
                    message: "expected value at line 1 column 1".into(),
                }),
                Ok(moving()),
            ]
            .into(),
        );
        let producer = MotionProducer {
            camera: Box::new(feed),
            ..producer
        };

        // Ends once the feed reports itself closed.
        producer.run(CancellationToken::new()).await;

        let sent = brain.receive().await.unwrap();
        assert_eq!((sent.capability, sent.content_kind), (Capability::Motion, ContentKind::Image));
        assert!(brain.try_receive().is_none());
    }

    #[tokio::test]
    async fn sensor_that_cannot_open_ends_the_producer() {
        let bus = MemoryBus::new(TransportPolicy::default());
        let (producer, _env) = producer(&bus);
        // Returns on its own; no cancellation needed.
        producer.run(CancellationToken::new()).await;
    }
}
