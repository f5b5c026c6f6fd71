//! Speaking a chat reply, line by line.

use chatpath::{advance, render, Action, Advance, Next, RenderContext};
use chrono::Utc;
use meeboproto::{ChatReply, Environment, MicrophoneGuard};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::capability::{ResponseListener, Speaker};

#[derive(Debug, Clone, Copy)]
pub struct ConversationTiming {
    /// Longest wait for a spoken answer.
    pub response_listen: Duration,
    /// How long `pauseListen` keeps the microphone away from the hotword producer.
    pub pause_listen: Duration,
}

impl From<&meeboconf::TimingConfig> for ConversationTiming {
    fn from(timing: &meeboconf::TimingConfig) -> Self {
        Self {
            response_listen: timing.response_listen(),
            pause_listen: timing.pause_listen(),
        }
    }
}

/// Runs one reply to completion. The caller holds the talking guard.
#[derive(Clone)]
pub struct Conversation {
    env: Environment,
    speaker: Arc<dyn Speaker>,
    listener: Arc<dyn ResponseListener>,
    timing: ConversationTiming,
}

impl Conversation {
    pub fn new(
        env: Environment,
        speaker: Arc<dyn Speaker>,
        listener: Arc<dyn ResponseListener>,
        timing: ConversationTiming,
    ) -> Self {
        Self {
            env,
            speaker,
            listener,
            timing,
        }
    }

    /// Speak every line and perform its action. Returns the key to ask for
    /// next when the reply ends at a branch the visitor answered.
    pub async fn run(&self, reply: &ChatReply) -> Option<String> {
        // Keep the hotword producer off the microphone while we talk.
        let mut microphone = self.env.try_acquire_microphone();
        let name = self.env.recognized_identity_at(Utc::now());
        let ctx = RenderContext::now(name);
        let mut response: Option<String> = None;

        for line in &reply.list {
            let text = render(&line.text, &ctx);
            if !text.trim().is_empty() {
                if let Err(e) = self.speaker.say(&text).await {
                    warn!("could not say {:?}: {}", text, e);
                }
            }

            match Action::parse(&line.action) {
                Action::None => {}
                Action::Wait(pause) => tokio::time::sleep(pause).await,
                Action::YesNo | Action::Listen => response = Some(self.listen(&mut microphone).await),
                Action::PauseListen => {
                    if microphone.is_none() {
                        microphone = self.env.try_acquire_microphone();
                    }
                    if microphone.is_none() {
                        debug!("pausing without the microphone");
                    }
                    tokio::time::sleep(self.timing.pause_listen).await;
                }
            }
        }

        let raw = reply.branch.as_deref()?;
        let Next::Branch(candidates) = Next::parse(raw) else {
            debug!("reply branch {:?} has no candidates", raw);
            return None;
        };
        let response = match response {
            Some(response) => response,
            None => self.listen(&mut microphone).await,
        };
        drop(microphone);

        match advance(&candidates, &response) {
            Advance::Next(key) => {
                info!("visitor said {:?}, continuing at {}", response, key);
                Some(key)
            }
            Advance::Terminal => {
                info!("visitor said {:?}, conversation over", response);
                None
            }
        }
    }

    /// Listen only while holding the microphone. A holder that doesn't let go
    /// within the response window counts as silence.
    async fn listen(&self, microphone: &mut Option<MicrophoneGuard>) -> String {
        if microphone.is_none() {
            let env = self.env.clone();
            let claim = async move {
                loop {
                    env.microphone_released().await;
                    if let Some(guard) = env.try_acquire_microphone() {
                        return guard;
                    }
                }
            };
            match tokio::time::timeout(self.timing.response_listen, claim).await {
                Ok(guard) => *microphone = Some(guard),
                Err(_) => {
                    debug!("microphone busy for the whole response window, hearing silence");
                    return String::new();
                }
            }
        }

        match self.listener.listen(self.timing.response_listen).await {
            Ok(heard) => heard,
            Err(e) => {
                warn!("listening failed, treating as silence: {}", e);
                String::new()
            }
        }
    }
}
