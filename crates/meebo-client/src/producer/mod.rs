//! Sensor producers.
//!
//! Each producer is its own task with its own outbox, walking
//! `Idle → Armed → Triggered → Cooldown → Armed`. They share nothing but the
//! Environment, and a producer whose sensor fails ends without touching the
//! others.

mod button;
mod hotword;
mod motion;

pub use button::ButtonProducer;
pub use hotword::HotwordProducer;
pub use motion::{MotionProducer, IDLE_RECHECK};

use meeboconf::{MeeboConfig, TimingConfig};
use meeboproto::{Connector, Environment};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::capability::{ButtonInput, CommandHotword, HotwordDetector, LineMotionFeed, MotionCamera, SysfsButton};
use crate::event::SensorEvent;
use crate::outbox::Outbox;

/// Pause after a skipped bad reading so a noisy sensor can't spin its task.
pub const READ_ERROR_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Idle,
    Armed,
    Triggered,
    Cooldown,
}

impl fmt::Display for ProducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProducerState::Idle => "idle",
            ProducerState::Armed => "armed",
            ProducerState::Triggered => "triggered",
            ProducerState::Cooldown => "cooldown",
        })
    }
}

/// What every producer needs besides its sensor.
#[derive(Debug, Clone)]
pub struct ProducerContext {
    pub env: Environment,
    pub timing: TimingConfig,
    /// Sender name on every envelope.
    pub client: String,
    /// Where the brain should answer.
    pub reply_to: String,
}

impl ProducerContext {
    pub fn from_config(env: Environment, config: &MeeboConfig) -> Self {
        Self {
            env,
            timing: config.bootstrap.timing.clone(),
            client: config.infra.client.name.clone(),
            reply_to: config.infra.client.reply_to.clone(),
        }
    }
}

/// Shared plumbing: state tracking and the outbox.
struct ProducerCore {
    name: &'static str,
    state: ProducerState,
    ctx: ProducerContext,
    outbox: Outbox,
}

impl ProducerCore {
    fn new(name: &'static str, ctx: ProducerContext, outbox: Outbox) -> Self {
        Self {
            name,
            state: ProducerState::Idle,
            ctx,
            outbox,
        }
    }

    fn enter(&mut self, next: ProducerState) {
        if self.state != next {
            debug!(producer = self.name, "{} -> {}", self.state, next);
            self.state = next;
        }
    }

    async fn emit(&mut self, event: SensorEvent) -> bool {
        let kind = event.kind();
        match event.into_envelope(&self.ctx.client, &self.ctx.reply_to) {
            Ok(envelope) => self.outbox.send(envelope).await,
            Err(e) => {
                warn!(producer = self.name, "could not encode {:?} event: {}", kind, e);
                false
            }
        }
    }
}

/// The sensors this client runs. `None` leaves a producer out.
#[derive(Default)]
pub struct Sensors {
    pub motion: Option<Box<dyn MotionCamera>>,
    pub hotword: Option<Box<dyn HotwordDetector>>,
    pub button: Option<Box<dyn ButtonInput>>,
    pub button_poll: Duration,
}

impl Sensors {
    pub fn from_config(config: &MeeboConfig) -> Self {
        let sensors = &config.infra.sensors;
        Self {
            motion: sensors
                .motion
                .then(|| Box::new(LineMotionFeed::new(&sensors.motion_command)) as Box<dyn MotionCamera>),
            hotword: sensors.hotword.then(|| {
                Box::new(CommandHotword::new(&sensors.hotword_command, &sensors.record_command))
                    as Box<dyn HotwordDetector>
            }),
            button: sensors
                .button
                .then(|| Box::new(SysfsButton::new(sensors.button_gpio)) as Box<dyn ButtonInput>),
            button_poll: Duration::from_millis(sensors.button_poll_ms.max(1)),
        }
    }
}

/// Start one task per configured sensor, each with its own publisher to `brain`.
pub fn spawn_producers(
    ctx: &ProducerContext,
    sensors: Sensors,
    connector: &dyn Connector,
    brain: &str,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let outbox = |name: &str| match connector.connect(brain) {
        Ok(outbound) => Some(Outbox::new(outbound)),
        Err(e) => {
            error!("{} producer has no way to the brain: {}", name, e);
            None
        }
    };

    if let Some(camera) = sensors.motion {
        if let Some(outbox) = outbox("motion") {
            let producer = MotionProducer::new(ctx.clone(), camera, outbox);
            handles.push(tokio::spawn(producer.run(cancel.clone())));
        }
    }
    if let Some(detector) = sensors.hotword {
        if let Some(outbox) = outbox("hotword") {
            let producer = HotwordProducer::new(ctx.clone(), detector, outbox);
            handles.push(tokio::spawn(producer.run(cancel.clone())));
        }
    }
    if let Some(button) = sensors.button {
        if let Some(outbox) = outbox("button") {
            let producer = ButtonProducer::new(ctx.clone(), button, outbox, sensors.button_poll);
            handles.push(tokio::spawn(producer.run(cancel.clone())));
        }
    }
    handles
}
