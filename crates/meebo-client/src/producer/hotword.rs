use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{ProducerContext, ProducerCore, ProducerState, READ_ERROR_PAUSE};
use crate::capability::{HotwordDetector, SensorError};
use crate::event::SensorEvent;
use crate::outbox::Outbox;

/// Grace on top of the capture limit before a stuck recorder is abandoned.
const CAPTURE_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

pub struct HotwordProducer {
    core: ProducerCore,
    detector: Box<dyn HotwordDetector>,
}

impl HotwordProducer {
    pub fn new(ctx: ProducerContext, detector: Box<dyn HotwordDetector>, outbox: Outbox) -> Self {
        Self {
            core: ProducerCore::new("hotword", ctx, outbox),
            detector,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.core.state
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(e) = self.detector.open().await {
            error!("hotword producer stopped: {}", e);
            return;
        }
        info!("🎤 hotword producer armed");

        loop {
            let env = self.core.ctx.env.clone();
            if !env.microphone_free() {
                self.core.enter(ProducerState::Idle);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = env.microphone_released() => {}
                }
            }
            self.core.enter(ProducerState::Armed);
            self.core.outbox.retry_pending().await;

            let detected = tokio::select! {
                _ = cancel.cancelled() => return,
                detected = self.detector.detected() => detected,
            };
            match detected {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => {
                    warn!("skipping hotword reading: {}", e);
                    tokio::time::sleep(READ_ERROR_PAUSE).await;
                    continue;
                }
                Err(e) => {
                    error!("hotword producer stopped: {}", e);
                    return;
                }
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = self.on_detection() => outcome,
            };
            match outcome {
                Ok(_) => {}
                Err(e) if !e.is_fatal() => warn!("hotword capture failed: {}", e),
                Err(e) => {
                    error!("hotword producer stopped: {}", e);
                    return;
                }
            }
        }
    }

    /// Take the microphone, capture, let go, send. Returns whether an event went out.
    ///
    /// When the microphone is held elsewhere the detection is dropped and
    /// nothing is sent.
    pub async fn on_detection(&mut self) -> Result<bool, SensorError> {
        self.core.enter(ProducerState::Triggered);
        let Some(microphone) = self.core.ctx.env.try_acquire_microphone() else {
            info!("hotword ignored, microphone in use");
            return Ok(false);
        };

        let limit = self.core.ctx.timing.hotword_capture();
        let captured = tokio::time::timeout(limit + CAPTURE_GRACE, self.detector.capture(limit)).await;
        drop(microphone);

        let sent = match captured {
            Ok(Ok(wav)) => self.core.emit(SensorEvent::hotword(wav)).await,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!("recorder gave nothing within {:?}", limit + CAPTURE_GRACE);
                false
            }
        };
        self.core.enter(ProducerState::Cooldown);
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use meeboconf::TimingConfig;
    use meeboproto::{Capability, Environment, EnvironmentSeed, Inbound, MemoryBus, TransportPolicy};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fires once, straight away; records whether the microphone was held while capturing.
    struct EagerDetector {
        env: Environment,
        fired: bool,
        held_during_capture: Arc<AtomicBool>,
        fail_capture: bool,
    }

    #[async_trait]
    impl HotwordDetector for EagerDetector {
        async fn open(&mut self) -> Result<(), SensorError> {
            Ok(())
        }

        async fn detected(&mut self) -> Result<(), SensorError> {
            if self.fired {
                std::future::pending::<()>().await;
            }
            self.fired = true;
            Ok(())
        }

        async fn capture(&mut self, _limit: Duration) -> Result<Bytes, SensorError> {
            self.held_during_capture.store(!self.env.microphone_free(), Ordering::SeqCst);
            if self.fail_capture {
                return Err(SensorError::Closed("recorder"));
            }
            Ok(Bytes::from_static(b"RIFF"))
        }
    }

    fn producer(bus: &MemoryBus, fail_capture: bool) -> (HotwordProducer, Environment, Arc<AtomicBool>) {
        let env = Environment::new(EnvironmentSeed::default());
        let held = Arc::new(AtomicBool::new(false));
        let ctx = ProducerContext {
            env: env.clone(),
            timing: TimingConfig::default(),
            client: "FrontDoor".into(),
            reply_to: "front".into(),
        };
        let detector = EagerDetector {
            env: env.clone(),
            fired: false,
            held_during_capture: held.clone(),
            fail_capture,
        };
        let outbox = Outbox::new(Box::new(bus.publisher("brain")));
        (HotwordProducer::new(ctx, Box::new(detector), outbox), env, held)
    }

    #[tokio::test]
    async fn capture_holds_microphone_and_sends_audio() {
        let bus = MemoryBus::new(TransportPolicy::default());
        let mut brain = bus.bind("brain");
        let (mut producer, env, held) = producer(&bus, false);

        assert!(producer.on_detection().await.unwrap());

        assert!(held.load(Ordering::SeqCst));
        assert!(env.microphone_free());
        let sent = brain.receive().await.unwrap();
        assert_eq!(sent.capability, Capability::Voice);
        assert_eq!(sent.audio_bytes().unwrap().as_ref(), b"RIFF");
        assert_eq!(producer.state(), ProducerState::Cooldown);
    }

    #[tokio::test]
    async fn detection_while_microphone_held_is_suppressed() {
        let bus = MemoryBus::new(TransportPolicy::default());
        let _brain = bus.bind("brain");
        let (mut producer, env, held) = producer(&bus, false);
        let _conversation = env.try_acquire_microphone().unwrap();

        assert!(!producer.on_detection().await.unwrap());

        assert!(!env.microphone_free());
        assert!(!held.load(Ordering::SeqCst));
        assert_eq!(bus.delivered("brain"), 0);
    }

    #[tokio::test]
    async fn failed_capture_still_frees_microphone() {
        let bus = MemoryBus::new(TransportPolicy::default());
        let _brain = bus.bind("brain");
        let (mut producer, env, _held) = producer(&bus, true);

        assert!(producer.on_detection().await.is_err());
        assert!(env.microphone_free());
        assert_eq!(bus.delivered("brain"), 0);
    }

    #[tokio::test]
    async fn run_waits_for_the_microphone() {
        let bus = MemoryBus::new(TransportPolicy::default());
        let mut brain = bus.bind("brain");
        let (producer, env, _held) = producer(&bus, false);
        let guard = env.try_acquire_microphone().unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(producer.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bus.delivered("brain"), 0);

        drop(guard);
        let sent = tokio::time::timeout(Duration::from_secs(1), brain.receive()).await.unwrap().unwrap();
        assert_eq!(sent.capability, Capability::Voice);

        cancel.cancel();
        task.await.unwrap();
        assert!(env.microphone_free());
    }
}
