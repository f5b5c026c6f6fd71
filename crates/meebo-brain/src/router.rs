//! The brain's consuming loop and per-capability handlers.
//!
//! One envelope is handled to completion before the next is received, and
//! every answer goes to the sender's own reply endpoint.

use chatpath::{DialogueGraph, DialogueTraversal};
use meeboproto::{
    ButtonPress, Capability, ChatLine, ChatReply, ContentKind, DetectionReport, Envelope,
    Environment, Inbound, MotionRequest, ReplyPublishers, TransportError, VoiceReply, VoiceRequest,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::Capabilities;
use crate::snapshot::SnapshotArchive;

/// Pause after a socket error so a broken socket can't spin the loop.
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Fixed answers the brain gives without consulting the graph.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Sender name on every reply.
    pub brain_name: String,
    /// Entry key for visitors a client already recognized.
    pub recognized_key: String,
    /// Doorbell sounds live in `<audio_dir>/<file>`.
    pub audio_dir: PathBuf,
    pub button_audio: String,
    pub button_phrase: String,
}

impl RouterSettings {
    pub fn from_config(config: &meeboconf::MeeboConfig) -> Self {
        Self {
            brain_name: config.infra.broker.brain_name.clone(),
            recognized_key: config.bootstrap.dialogue.recognized_key.clone(),
            audio_dir: config.infra.paths.media_dir.join("audio"),
            button_audio: config.bootstrap.button.audio.clone(),
            button_phrase: config.bootstrap.button.phrase.clone(),
        }
    }
}

pub struct Router {
    env: Environment,
    graph: Arc<DialogueGraph>,
    caps: Capabilities,
    snapshots: Option<SnapshotArchive>,
    settings: RouterSettings,
}

impl Router {
    pub fn new(env: Environment, graph: Arc<DialogueGraph>, caps: Capabilities, settings: RouterSettings) -> Self {
        Self {
            env,
            graph,
            caps,
            snapshots: None,
            settings,
        }
    }

    /// Archive every motion frame under `archive`.
    pub fn with_snapshots(mut self, archive: SnapshotArchive) -> Self {
        self.snapshots = Some(archive);
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Consume until cancelled or the inbound side closes.
    pub async fn run<I>(
        &self,
        inbound: &mut I,
        replies: &mut ReplyPublishers,
        cancel: CancellationToken,
    ) -> Result<(), TransportError>
    where
        I: Inbound + ?Sized,
    {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("router shutting down");
                    return Ok(());
                }
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

            let Some(reply) = self.dispatch(&envelope).await else {
                continue;
            };
            if envelope.reply_to.is_empty() {
                warn!(
                    "dropping {} reply to {}: no reply endpoint",
                    reply.capability, envelope.sender
                );
                continue;
            }
            if let Err(e) = replies.send_to(&envelope.reply_to, reply).await {
                warn!("reply to {} at {} failed: {}", envelope.sender, envelope.reply_to, e);
            }
        }
    }

    /// Handle one envelope. `None` when there is nothing to send back.
    pub async fn dispatch(&self, envelope: &Envelope) -> Option<Envelope> {
        debug!(
            id = %envelope.id,
            sender = %envelope.sender,
            "{} {}",
            envelope.capability,
            envelope.content_kind
        );

        match (envelope.capability, envelope.content_kind) {
            (Capability::Connect, _) => self.on_connect(envelope),
            (Capability::Motion | Capability::Camera, ContentKind::Image) => self.on_frame(envelope).await,
            (Capability::Motion, ContentKind::Json) => self.on_recognized(envelope),
            (Capability::Voice, ContentKind::Json) => self.on_chat_request(envelope),
            (Capability::Voice, ContentKind::Audio) => self.on_speech(envelope).await,
            (Capability::Voice, ContentKind::Text) => self.on_typed(envelope).await,
            (Capability::Button, _) => self.on_button(envelope),
            (Capability::Environ, _) => {
                info!("environ from {} needs no answer", envelope.sender);
                None
            }
            (capability, kind) => {
                warn!("no handler for {} {} from {}", capability, kind, envelope.sender);
                None
            }
        }
    }

    fn reply<T: serde::Serialize>(&self, capability: Capability, body: &T) -> Option<Envelope> {
        match Envelope::json(capability, self.settings.brain_name.clone(), body) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!("could not encode {} reply: {}", capability, e);
                None
            }
        }
    }

    fn on_connect(&self, envelope: &Envelope) -> Option<Envelope> {
        let name = envelope.as_text().map(str::to_string).unwrap_or_else(|_| envelope.sender.clone());
        info!("🔌 {} connected (replies to {})", name, envelope.reply_to);
        self.reply(Capability::Environ, &self.env.snapshot())
    }

    async fn on_frame(&self, envelope: &Envelope) -> Option<Envelope> {
        let jpeg = match envelope.image_bytes() {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!("undecodable frame from {}: {}", envelope.sender, e);
                return None;
            }
        };

        if let Some(archive) = &self.snapshots {
            match archive.store(&envelope.sender, &jpeg, chrono::Local::now()).await {
                Ok(path) => debug!("archived frame at {}", path.display()),
                Err(e) => warn!("could not archive frame from {}: {}", envelope.sender, e),
            }
        }

        let counts = self.caps.detector.detect_objects(&jpeg).await.unwrap_or_else(|e| {
            warn!("detection failed, reporting nothing: {}", e);
            BTreeMap::new()
        });
        let mut report = DetectionReport {
            counts,
            identities: Vec::new(),
        };

        if self.env.identify() && report.person_count() > 0 {
            report.identities = self.caps.faces.recognize_faces(&jpeg).await.unwrap_or_else(|e| {
                warn!("face recognition failed: {}", e);
                Vec::new()
            });
        }

        info!(
            "{} sees {:?}, faces {:?}",
            envelope.sender, report.counts, report.identities
        );
        self.reply(Capability::Motion, &report)
    }

    fn on_recognized(&self, envelope: &Envelope) -> Option<Envelope> {
        let request: MotionRequest = match envelope.decode_json() {
            Ok(request) => request,
            Err(e) => {
                warn!("bad motion request from {}: {}", envelope.sender, e);
                return None;
            }
        };
        info!("{} recognized {}", envelope.sender, request.recognized);
        self.chat(&self.settings.recognized_key)
    }

    fn on_chat_request(&self, envelope: &Envelope) -> Option<Envelope> {
        match envelope.decode_json::<VoiceRequest>() {
            Ok(VoiceRequest::GetChat { chat_item }) => self.chat(&chat_item),
            Err(e) => {
                warn!("bad voice request from {}: {}", envelope.sender, e);
                None
            }
        }
    }

    async fn on_speech(&self, envelope: &Envelope) -> Option<Envelope> {
        let wav = match envelope.audio_bytes() {
            Ok(wav) => wav,
            Err(e) => {
                warn!("bad audio from {}: {}", envelope.sender, e);
                return None;
            }
        };
        let transcript = self.caps.transcriber.transcribe(wav).await.unwrap_or_else(|e| {
            warn!("transcription failed, treating as silence: {}", e);
            String::new()
        });
        info!("{} said {:?}", envelope.sender, transcript);
        self.classify_and_chat(&transcript).await
    }

    async fn on_typed(&self, envelope: &Envelope) -> Option<Envelope> {
        match envelope.as_text() {
            Ok(text) => self.classify_and_chat(text).await,
            Err(e) => {
                warn!("bad text from {}: {}", envelope.sender, e);
                None
            }
        }
    }

    async fn classify_and_chat(&self, text: &str) -> Option<Envelope> {
        match self.caps.intents.classify_intent(text).await {
            Ok(key) => {
                debug!("intent for {:?} is {}", text, key);
                self.chat(&key)
            }
            Err(e) => {
                warn!("intent classification failed: {}", e);
                None
            }
        }
    }

    fn chat(&self, key: &str) -> Option<Envelope> {
        let traversal = self.graph.resolve(key);
        self.reply(Capability::Voice, &VoiceReply::Chat(chat_reply(&traversal)))
    }

    fn on_button(&self, envelope: &Envelope) -> Option<Envelope> {
        let press = match envelope.content_kind {
            ContentKind::Json => envelope.decode_json::<ButtonPress>().unwrap_or_else(|e| {
                warn!("bad button payload from {}, using defaults: {}", envelope.sender, e);
                ButtonPress::default()
            }),
            _ => ButtonPress::default(),
        };
        info!("🔔 doorbell pressed at {}", envelope.sender);

        let audio = non_empty(&press.audio).unwrap_or(self.settings.button_audio.as_str());
        match audio_path(&self.settings.audio_dir, audio) {
            Some(path) => {
                let player = self.caps.player.clone();
                tokio::spawn(async move {
                    if let Err(e) = player.play(&path).await {
                        warn!("could not play {}: {}", path.display(), e);
                    }
                });
            }
            None => warn!("refusing doorbell audio {:?}", audio),
        }

        let phrase = non_empty(&press.voice).unwrap_or(self.settings.button_phrase.as_str());
        self.reply(Capability::Voice, &VoiceReply::Chat(ChatReply::say(phrase)))
    }
}

/// Lines as they go on the wire, plus the raw branch the client will answer.
pub fn chat_reply(traversal: &DialogueTraversal) -> ChatReply {
    let list = traversal
        .lines
        .iter()
        .map(|node| ChatLine {
            text: node.text.clone(),
            action: node.action.to_string(),
            next: node.next.to_string(),
        })
        .collect();
    let branch = traversal
        .branch()
        .and_then(|_| traversal.lines.last())
        .map(|node| node.next.to_string());
    ChatReply { list, branch }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Only bare file names are played; anything with a directory part is refused.
fn audio_path(dir: &Path, file: &str) -> Option<PathBuf> {
    let name = Path::new(file).file_name()?;
    (name == file).then(|| dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn audio_path_rejects_directories() {
        let dir = Path::new("/srv/meebo/audio");
        assert_eq!(audio_path(dir, "doorbell.wav"), Some(dir.join("doorbell.wav")));
        assert_eq!(audio_path(dir, "../secret.wav"), None);
        assert_eq!(audio_path(dir, "/etc/passwd"), None);
    }

    #[test]
    fn chat_reply_carries_branch_only_at_a_branch() {
        let graph = DialogueGraph::from_toml_str(
            r#"
[[node]]
category = "ASK"
item = 1
text = "Are you here for a delivery?"
action = "yesNo"
next = "YES-DELIV-1|NO-BYE-1"

[[node]]
category = "BYE"
item = 1
text = "Goodbye."
"#,
            chatpath::GraphOptions::default(),
        )
        .unwrap();

        let asking = chat_reply(&graph.resolve("ASK-1"));
        assert_eq!(asking.branch.as_deref(), Some("YES-DELIV-1|NO-BYE-1"));
        assert_eq!(asking.list[0].action, "yesNo");

        let done = chat_reply(&graph.resolve("BYE-1"));
        assert_eq!(done.branch, None);
        assert_eq!(done.list.len(), 1);
    }
}
