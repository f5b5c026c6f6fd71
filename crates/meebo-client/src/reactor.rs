//! The client's consuming loop: what to do with each answer from the brain.
//!
//! Replies are handled one at a time, and a conversation runs to completion
//! before the next reply is read. Motion and chat replies that arrive while
//! a conversation is running are dropped, not queued.

use chrono::{DateTime, Utc};
use meeboproto::{
    Capability, Cooldown, DetectionReport, EnvironSnapshot, Envelope, Environment, Inbound, Outbound,
    TransportError, VoiceReply, VoiceRequest,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::Conversation;

/// Pause after a socket error so a broken socket can't spin the loop.
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ReactorSettings {
    pub client: String,
    pub reply_to: String,
    pub secure_key: String,
    pub friendly_key: String,
    pub recognized_key: String,
    pub recognized_retention: Duration,
    pub motion_cooldown: Duration,
}

impl ReactorSettings {
    pub fn from_config(config: &meeboconf::MeeboConfig) -> Self {
        let dialogue = &config.bootstrap.dialogue;
        let timing = &config.bootstrap.timing;
        Self {
            client: config.infra.client.name.clone(),
            reply_to: config.infra.client.reply_to.clone(),
            secure_key: dialogue.secure_key.clone(),
            friendly_key: dialogue.friendly_key.clone(),
            recognized_key: dialogue.recognized_key.clone(),
            recognized_retention: timing.recognized_retention(),
            motion_cooldown: timing.motion_cooldown(),
        }
    }
}

pub struct Reactor {
    env: Environment,
    conversation: Conversation,
    outbound: Box<dyn Outbound>,
    settings: ReactorSettings,
}

impl Reactor {
    pub fn new(
        env: Environment,
        conversation: Conversation,
        outbound: Box<dyn Outbound>,
        settings: ReactorSettings,
    ) -> Self {
        Self {
            env,
            conversation,
            outbound,
            settings,
        }
    }

    /// Announce ourselves; the brain answers with its mode flags.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let hello = Envelope::text(Capability::Connect, self.settings.client.clone(), self.settings.client.clone())
            .with_reply_to(self.settings.reply_to.clone());
        self.outbound.send(hello).await
    }

    pub async fn run<I>(&mut self, inbound: &mut I, cancel: CancellationToken) -> Result<(), TransportError>
    where
        I: Inbound + ?Sized,
    {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                received = inbound.receive() => received,
            };
            let envelope = match received {
                Ok(envelope) => envelope,
                Err(TransportError::Closed) => return Err(TransportError::Closed),
                Err(e) => {
                    warn!("receive failed: {}", e);
                    tokio::time::sleep(RECEIVE_ERROR_PAUSE).await;
                    continue;
                }
            };

            // Dropping a conversation mid-line releases its guards.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = self.handle(&envelope) => {}
            }
        }
    }

    pub async fn handle(&mut self, envelope: &Envelope) {
        debug!(sender = %envelope.sender, "{} {}", envelope.capability, envelope.content_kind);
        match envelope.capability {
            Capability::Environ => match envelope.decode_json::<EnvironSnapshot>() {
                Ok(snapshot) => {
                    let merged = self.env.merge_snapshot(&snapshot);
                    info!("environ from {}: {} keys merged", envelope.sender, merged);
                }
                Err(e) => warn!("bad environ from {}: {}", envelope.sender, e),
            },
            Capability::Motion => match envelope.decode_json::<DetectionReport>() {
                Ok(report) => {
                    if let Some(key) = self.on_detection(&report, Utc::now()) {
                        self.request(&key).await;
                    }
                }
                Err(e) => warn!("bad detection report from {}: {}", envelope.sender, e),
            },
            Capability::Voice => match envelope.decode_json::<VoiceReply>() {
                Ok(VoiceReply::Chat(chat)) => {
                    let Some(talking) = self.env.begin_talking() else {
                        debug!("chat dropped, already talking");
                        return;
                    };
                    let next = self.conversation.run(&chat).await;
                    drop(talking);
                    self.env
                        .rearm_cooldown(Cooldown::Motion, Utc::now(), self.settings.motion_cooldown);
                    if let Some(key) = next {
                        self.request(&key).await;
                    }
                }
                Err(e) => warn!("bad chat from {}: {}", envelope.sender, e),
            },
            other => debug!("nothing to do for {} from {}", other, envelope.sender),
        }
    }

    /// Decide which dialogue, if any, a detection report calls for.
    pub fn on_detection(&self, report: &DetectionReport, now: DateTime<Utc>) -> Option<String> {
        if self.env.talking() {
            debug!("detection ignored while talking");
            return None;
        }

        if let Some(identity) = report.known_identities().next() {
            if self
                .env
                .remember_identity(identity, now, self.settings.recognized_retention)
            {
                info!("👋 recognized {}", identity);
                return Some(self.settings.recognized_key.clone());
            }
        }

        if report.person_count() == 0 {
            return None;
        }
        let key = if self.env.secure_mode() {
            &self.settings.secure_key
        } else if self.env.friend_mode() {
            &self.settings.friendly_key
        } else {
            debug!("person at the door, no mode wants to talk");
            return None;
        };
        if !self
            .env
            .compare_and_swap_cooldown(Cooldown::Motion, now, self.settings.motion_cooldown)
        {
            debug!("person at the door, dialogue cooling down");
            return None;
        }
        Some(key.clone())
    }

    async fn request(&mut self, key: &str) {
        let request = match Envelope::json(
            Capability::Voice,
            self.settings.client.clone(),
            &VoiceRequest::get_chat(key),
        ) {
            Ok(request) => request.with_reply_to(self.settings.reply_to.clone()),
            Err(e) => {
                warn!("could not encode request for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.outbound.send(request).await {
            warn!("request for {} lost: {}", key, e);
        }
    }
}
