use chrono::{DateTime, Utc};
use meeboproto::Cooldown;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ProducerContext, ProducerCore, ProducerState};
use crate::capability::{ButtonInput, Level};
use crate::event::SensorEvent;
use crate::outbox::Outbox;

pub struct ButtonProducer {
    core: ProducerCore,
    button: Box<dyn ButtonInput>,
    poll: Duration,
    last: Level,
}

impl ButtonProducer {
    pub fn new(ctx: ProducerContext, button: Box<dyn ButtonInput>, outbox: Outbox, poll: Duration) -> Self {
        Self {
            core: ProducerCore::new("button", ctx, outbox),
            button,
            poll,
            last: Level::High,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.core.state
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(e) = self.button.open().await {
            error!("button producer stopped: {}", e);
            return;
        }
        // A button held down at startup is not a press.
        match self.button.level().await {
            Ok(level) => self.last = level,
            Err(e) => {
                error!("button producer stopped: {}", e);
                return;
            }
        }
        info!("🔔 button producer armed");
        self.core.enter(ProducerState::Armed);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.poll) => {}
            }
            self.core.outbox.retry_pending().await;

            match self.button.level().await {
                Ok(level) => {
                    self.on_level(level, Utc::now()).await;
                }
                Err(e) if !e.is_fatal() => warn!("skipping button reading: {}", e),
                Err(e) => {
                    error!("button producer stopped: {}", e);
                    return;
                }
            }
        }
    }

    /// Feed one reading. A high-to-low edge outside the debounce window sends a press.
    pub async fn on_level(&mut self, level: Level, now: DateTime<Utc>) -> bool {
        let pressed = self.last == Level::High && level == Level::Low;
        self.last = level;
        if !pressed {
            if level == Level::High && self.core.state == ProducerState::Cooldown {
                self.core.enter(ProducerState::Armed);
            }
            return false;
        }

        self.core.enter(ProducerState::Triggered);
        let debounce = self.core.ctx.timing.button_debounce();
        if !self.core.ctx.env.compare_and_swap_cooldown(Cooldown::Button, now, debounce) {
            debug!("button chatter ignored");
            self.core.enter(ProducerState::Cooldown);
            return false;
        }

        info!("doorbell pressed");
        let sent = self.core.emit(SensorEvent::button()).await;
        self.core.enter(ProducerState::Cooldown);
        sent
    }
}
