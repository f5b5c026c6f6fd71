//! Router behaviour against fake capabilities and the in-memory bus.

use async_trait::async_trait;
use bytes::Bytes;
use chatpath::{DialogueGraph, GraphOptions, FALLBACK_TEXT};
use meebo_brain::{
    AudioPlayer, Capabilities, CapabilityError, FaceRecognizer, ObjectDetector, PatternIntents, Router,
    RouterSettings, SnapshotArchive, Transcriber, Unavailable,
};
use meeboproto::{
    ButtonPress, Capability, ContentKind, DetectionReport, Envelope, EnvironSnapshot, Environment,
    EnvironmentSeed, Inbound, MemoryBus, Outbound, MotionRequest, ReplyPublishers, TransportPolicy, VoiceReply,
    VoiceRequest,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SCRIPT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/doorbell.toml");

struct FixedDetector(BTreeMap<String, u32>);

#[async_trait]
impl ObjectDetector for FixedDetector {
    async fn detect_objects(&self, _jpeg: &[u8]) -> Result<BTreeMap<String, u32>, CapabilityError> {
        Ok(self.0.clone())
    }
}

struct CountingFaces {
    calls: AtomicUsize,
    identities: Vec<String>,
}

#[async_trait]
impl FaceRecognizer for CountingFaces {
    async fn recognize_faces(&self, _jpeg: &[u8]) -> Result<Vec<String>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.identities.clone())
    }
}

struct FixedTranscript(&'static str);

#[async_trait]
impl Transcriber for FixedTranscript {
    async fn transcribe(&self, _wav: &[u8]) -> Result<String, CapabilityError> {
        Ok(self.0.to_string())
    }
}

struct RecordingPlayer(mpsc::UnboundedSender<PathBuf>);

#[async_trait]
impl AudioPlayer for RecordingPlayer {
    async fn play(&self, path: &Path) -> Result<(), CapabilityError> {
        let _ = self.0.send(path.to_path_buf());
        Ok(())
    }
}

struct Harness {
    router: Router,
    faces: Arc<CountingFaces>,
    played: mpsc::UnboundedReceiver<PathBuf>,
}

fn settings() -> RouterSettings {
    RouterSettings {
        brain_name: "Central".into(),
        recognized_key: "RECOG-0".into(),
        audio_dir: PathBuf::from("/srv/meebo/audio"),
        button_audio: "doorbell.wav".into(),
        button_phrase: "I will let my masters know you are here.".into(),
    }
}

fn harness(seed: EnvironmentSeed, counts: &[(&str, u32)], identities: &[&str]) -> Harness {
    let graph = DialogueGraph::load(Path::new(SCRIPT), GraphOptions::default()).unwrap();
    let faces = Arc::new(CountingFaces {
        calls: AtomicUsize::new(0),
        identities: identities.iter().map(|s| s.to_string()).collect(),
    });
    let (tx, played) = mpsc::unbounded_channel();
    let caps = Capabilities {
        detector: Arc::new(FixedDetector(
            counts.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        )),
        faces: faces.clone(),
        transcriber: Arc::new(FixedTranscript("hi, I have a package for you")),
        intents: Arc::new(PatternIntents::new(graph.intents(), "GREETA-0")),
        player: Arc::new(RecordingPlayer(tx)),
    };
    let router = Router::new(Environment::new(seed), Arc::new(graph), caps, settings());
    Harness { router, faces, played }
}

fn chat_of(reply: &Envelope) -> meeboproto::ChatReply {
    assert_eq!(reply.capability, Capability::Voice);
    assert_eq!(reply.sender, "Central");
    let VoiceReply::Chat(chat) = reply.decode_json::<VoiceReply>().unwrap();
    chat
}

#[tokio::test]
async fn connect_answers_with_mode_flags() {
    let seed = EnvironmentSeed {
        secure_mode: true,
        friend_mode: false,
        ..EnvironmentSeed::default()
    };
    let h = harness(seed, &[], &[]);
    let connect = Envelope::text(Capability::Connect, "FrontDoor", "FrontDoor").with_reply_to("tcp://door:5671");

    let reply = h.router.dispatch(&connect).await.unwrap();

    assert_eq!(reply.capability, Capability::Environ);
    let snapshot: EnvironSnapshot = reply.decode_json().unwrap();
    assert_eq!(snapshot.get("secureMode"), Some(&serde_json::json!(true)));
    assert_eq!(snapshot.get("friendMode"), Some(&serde_json::json!(false)));
    assert_eq!(snapshot.get("clientName"), None);
}

#[tokio::test]
async fn motion_frame_with_person_gets_faces() {
    let h = harness(EnvironmentSeed::default(), &[("person", 1), ("dog", 1)], &["alice", "unknown"]);
    let frame = Envelope::image(Capability::Motion, "FrontDoor", b"\xff\xd8jpeg");

    let reply = h.router.dispatch(&frame).await.unwrap();

    assert_eq!(reply.capability, Capability::Motion);
    let report: DetectionReport = reply.decode_json().unwrap();
    assert_eq!(report.person_count(), 1);
    assert_eq!(report.counts.get("dog"), Some(&1));
    assert_eq!(report.known_identities().collect::<Vec<_>>(), vec!["alice"]);
    assert_eq!(h.faces.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn faces_skipped_without_person_or_identify() {
    let h = harness(EnvironmentSeed::default(), &[("cat", 2)], &["alice"]);
    let frame = Envelope::image(Capability::Camera, "FrontDoor", b"jpeg");
    let report: DetectionReport = h.router.dispatch(&frame).await.unwrap().decode_json().unwrap();
    assert!(report.identities.is_empty());

    let seed = EnvironmentSeed {
        identify: false,
        ..EnvironmentSeed::default()
    };
    let h2 = harness(seed, &[("person", 1)], &["alice"]);
    let report: DetectionReport = h2.router.dispatch(&frame).await.unwrap().decode_json().unwrap();
    assert_eq!(report.person_count(), 1);
    assert!(report.identities.is_empty());

    assert_eq!(h.faces.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h2.faces.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_detection_reports_nothing() {
    let graph = DialogueGraph::load(Path::new(SCRIPT), GraphOptions::default()).unwrap();
    let router = Router::new(
        Environment::new(EnvironmentSeed::default()),
        Arc::new(graph),
        Capabilities::unavailable("GREETA-0"),
        settings(),
    );

    let frame = Envelope::image(Capability::Motion, "FrontDoor", b"jpeg");
    let report: DetectionReport = router.dispatch(&frame).await.unwrap().decode_json().unwrap();

    assert_eq!(report, DetectionReport::default());
}

#[tokio::test]
async fn get_chat_resolves_until_branch() {
    let h = harness(EnvironmentSeed::default(), &[], &[]);
    let request = Envelope::json(Capability::Voice, "FrontDoor", &VoiceRequest::get_chat("GREETA-1")).unwrap();

    let chat = chat_of(&h.router.dispatch(&request).await.unwrap());

    let texts: Vec<_> = chat.list.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["Good {time-of-day}! Welcome.", "Are you here to drop off a package?"]
    );
    assert_eq!(chat.list[1].action, "yesNo");
    assert_eq!(chat.branch.as_deref(), Some("YES-DELIV-1|NO-VISIT-1"));
}

#[tokio::test]
async fn unknown_key_speaks_fallback() {
    let h = harness(EnvironmentSeed::default(), &[], &[]);
    let request = Envelope::json(Capability::Voice, "FrontDoor", &VoiceRequest::get_chat("NOPE-3")).unwrap();

    let chat = chat_of(&h.router.dispatch(&request).await.unwrap());

    assert_eq!(chat.list.len(), 1);
    assert_eq!(chat.list[0].text, FALLBACK_TEXT);
    assert_eq!(chat.list[0].next, "");
    assert_eq!(chat.branch, None);
}

#[tokio::test]
async fn speech_is_transcribed_and_classified() {
    let h = harness(EnvironmentSeed::default(), &[], &[]);
    let speech = Envelope::audio(Capability::Voice, "FrontDoor", Bytes::from_static(b"RIFF....WAVE"));

    let chat = chat_of(&h.router.dispatch(&speech).await.unwrap());

    assert_eq!(chat.list[0].text, "Please leave it by the door.");
    assert_eq!(chat.list[1].text, "Thank you, have a nice {time-of-day}.");
}

#[tokio::test]
async fn typed_text_is_classified() {
    let h = harness(EnvironmentSeed::default(), &[], &[]);
    let typed = Envelope::text(Capability::Voice, "FrontDoor", "is this the right parcel drop?");

    let chat = chat_of(&h.router.dispatch(&typed).await.unwrap());

    assert_eq!(chat.list[0].text, "Please leave it by the door.");
}

#[tokio::test]
async fn recognized_visitor_gets_recognized_chat() {
    let h = harness(EnvironmentSeed::default(), &[], &[]);
    let request = Envelope::json(
        Capability::Motion,
        "FrontDoor",
        &MotionRequest {
            recognized: "alice".into(),
        },
    )
    .unwrap();

    let chat = chat_of(&h.router.dispatch(&request).await.unwrap());

    assert_eq!(chat.list[0].text, "Welcome back, {name}!");
}

#[tokio::test]
async fn button_plays_audio_and_says_phrase() {
    let mut h = harness(EnvironmentSeed::default(), &[], &[]);
    let press = Envelope::json(Capability::Button, "FrontDoor", &ButtonPress::default()).unwrap();

    let chat = chat_of(&h.router.dispatch(&press).await.unwrap());
    assert_eq!(chat.list[0].text, "I will let my masters know you are here.");

    let played = tokio::time::timeout(Duration::from_secs(1), h.played.recv()).await.unwrap();
    assert_eq!(played, Some(PathBuf::from("/srv/meebo/audio/doorbell.wav")));

    let custom = Envelope::json(
        Capability::Button,
        "FrontDoor",
        &ButtonPress {
            audio: "chime.wav".into(),
            voice: "Coming!".into(),
        },
    )
    .unwrap();
    let chat = chat_of(&h.router.dispatch(&custom).await.unwrap());
    assert_eq!(chat.list[0].text, "Coming!");
    let played = tokio::time::timeout(Duration::from_secs(1), h.played.recv()).await.unwrap();
    assert_eq!(played, Some(PathBuf::from("/srv/meebo/audio/chime.wav")));
}

#[tokio::test]
async fn environ_and_garbage_get_no_reply() {
    let h = harness(EnvironmentSeed::default(), &[], &[]);

    let environ = Envelope::json(Capability::Environ, "FrontDoor", &EnvironSnapshot::default()).unwrap();
    assert!(h.router.dispatch(&environ).await.is_none());

    let garbage = Envelope::new(
        Capability::Voice,
        ContentKind::Json,
        "FrontDoor",
        Bytes::from_static(b"{not json"),
    );
    assert!(h.router.dispatch(&garbage).await.is_none());
}

#[tokio::test]
async fn frames_are_archived_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(EnvironmentSeed::default(), &[("person", 1)], &[]);
    let router = h.router.with_snapshots(SnapshotArchive::new(dir.path()));

    let frame = Envelope::image(Capability::Motion, "FrontDoor", b"jpeg-bytes");
    router.dispatch(&frame).await.unwrap();

    assert_eq!(std::fs::read(dir.path().join("FrontDoor.jpg")).unwrap(), b"jpeg-bytes");
    assert_eq!(std::fs::read_dir(dir.path().join("FrontDoor")).unwrap().count(), 1);
}

#[tokio::test]
async fn run_replies_to_each_senders_endpoint() {
    let bus = MemoryBus::new(TransportPolicy {
        publish_timeout: Duration::from_millis(50),
        attempts: 1,
        backoff: Duration::from_millis(1),
    });
    let mut brain_inbound = bus.bind("brain");
    let mut front = bus.bind("front");
    let mut back = bus.bind("back");

    let h = harness(EnvironmentSeed::default(), &[], &[]);
    let router = h.router;
    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let connector = bus.clone();
    let task = tokio::spawn(async move {
        let mut replies = ReplyPublishers::new(Arc::new(connector));
        router.run(&mut brain_inbound, &mut replies, stop).await
    });

    let mut to_brain = bus.publisher("brain");
    let no_target = Envelope::json(Capability::Voice, "Nowhere", &VoiceRequest::get_chat("RECOG-1")).unwrap();
    to_brain.send(no_target).await.unwrap();
    let from_back = Envelope::json(Capability::Voice, "BackDoor", &VoiceRequest::get_chat("VISIT-1"))
        .unwrap()
        .with_reply_to("back");
    to_brain.send(from_back).await.unwrap();
    let from_front = Envelope::text(Capability::Connect, "FrontDoor", "FrontDoor").with_reply_to("front");
    to_brain.send(from_front).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(1), back.receive()).await.unwrap().unwrap();
    assert_eq!(chat_of(&reply).list[0].text, "Who would you like to see?");

    let reply = tokio::time::timeout(Duration::from_secs(1), front.receive()).await.unwrap().unwrap();
    assert_eq!(reply.capability, Capability::Environ);

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert!(back.try_receive().is_none());
    assert!(front.try_receive().is_none());
}

#[test]
fn unavailable_is_usable_as_every_capability() {
    let _: Arc<dyn ObjectDetector> = Arc::new(Unavailable("detector"));
    let _: Arc<dyn FaceRecognizer> = Arc::new(Unavailable("faces"));
    let _: Arc<dyn Transcriber> = Arc::new(Unavailable("transcriber"));
    let _: Arc<dyn AudioPlayer> = Arc::new(Unavailable("player"));
}
