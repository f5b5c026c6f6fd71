//! External capabilities the brain leans on.
//!
//! Detection, face recognition, transcription and intent classification are
//! all outside this process. Each sits behind a trait so the router can be
//! driven by fakes in tests and by helper processes in production.

use async_trait::async_trait;
use chatpath::IntentRow;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound on one helper invocation.
pub const HELPER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error("{capability} failed: {message}")]
    Failed {
        capability: &'static str,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Class name to count for one JPEG frame.
    async fn detect_objects(&self, jpeg: &[u8]) -> Result<BTreeMap<String, u32>, CapabilityError>;
}

#[async_trait]
pub trait FaceRecognizer: Send + Sync {
    /// One identity per face, `"unknown"` for faces that can't be placed.
    async fn recognize_faces(&self, jpeg: &[u8]) -> Result<Vec<String>, CapabilityError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: &[u8]) -> Result<String, CapabilityError>;
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Dialogue key to answer `text` with.
    async fn classify_intent(&self, text: &str) -> Result<String, CapabilityError>;
}

#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, path: &Path) -> Result<(), CapabilityError>;
}

/// Stand-in for a capability nobody configured. Every call fails.
#[derive(Debug, Clone, Copy)]
pub struct Unavailable(pub &'static str);

#[async_trait]
impl ObjectDetector for Unavailable {
    async fn detect_objects(&self, _jpeg: &[u8]) -> Result<BTreeMap<String, u32>, CapabilityError> {
        Err(CapabilityError::Unavailable(self.0))
    }
}

#[async_trait]
impl FaceRecognizer for Unavailable {
    async fn recognize_faces(&self, _jpeg: &[u8]) -> Result<Vec<String>, CapabilityError> {
        Err(CapabilityError::Unavailable(self.0))
    }
}

#[async_trait]
impl Transcriber for Unavailable {
    async fn transcribe(&self, _wav: &[u8]) -> Result<String, CapabilityError> {
        Err(CapabilityError::Unavailable(self.0))
    }
}

#[async_trait]
impl AudioPlayer for Unavailable {
    async fn play(&self, _path: &Path) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unavailable(self.0))
    }
}

/// A helper process run once per call: input on stdin, answer on stdout.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    name: &'static str,
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandCapability {
    /// `None` when the command line is empty.
    pub fn new(name: &'static str, command_line: &str) -> Option<Self> {
        let argv: Vec<String> = command_line.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return None;
        }
        Some(Self {
            name,
            argv,
            timeout: HELPER_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, input: &[u8]) -> Result<Vec<u8>, CapabilityError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(CapabilityError::Unavailable(self.name));
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let exchange = async {
            if let Some(mut stdin) = child.stdin.take() {
                // A helper may answer without reading everything.
                if let Err(e) = stdin.write_all(input).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| self.failed(format!("no answer within {:?}", self.timeout)))??;

        if !output.status.success() {
            return Err(self.failed(format!("{} exited with {}", program, output.status)));
        }
        debug!("{} answered {} bytes", self.name, output.stdout.len());
        Ok(output.stdout)
    }

    fn failed(&self, message: String) -> CapabilityError {
        CapabilityError::Failed {
            capability: self.name,
            message,
        }
    }
}

#[async_trait]
impl ObjectDetector for CommandCapability {
    async fn detect_objects(&self, jpeg: &[u8]) -> Result<BTreeMap<String, u32>, CapabilityError> {
        let stdout = self.run(jpeg).await?;
        serde_json::from_slice(&stdout).map_err(|e| self.failed(e.to_string()))
    }
}

#[async_trait]
impl FaceRecognizer for CommandCapability {
    async fn recognize_faces(&self, jpeg: &[u8]) -> Result<Vec<String>, CapabilityError> {
        let stdout = self.run(jpeg).await?;
        serde_json::from_slice(&stdout).map_err(|e| self.failed(e.to_string()))
    }
}

#[async_trait]
impl Transcriber for CommandCapability {
    async fn transcribe(&self, wav: &[u8]) -> Result<String, CapabilityError> {
        let stdout = self.run(wav).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

/// Keyword intents taken from the dialogue script.
///
/// The first intent with a pattern that occurs as a whole word wins. Text
/// that matches nothing gets the fallback key.
#[derive(Debug, Clone)]
pub struct PatternIntents {
    patterns: Vec<(Regex, String)>,
    fallback: String,
}

impl PatternIntents {
    pub fn new(intents: &[IntentRow], fallback: impl Into<String>) -> Self {
        let mut patterns = Vec::new();
        for intent in intents {
            for pattern in intent.patterns.iter().filter(|p| !p.trim().is_empty()) {
                let source = format!(r"(?i)\b{}\b", regex::escape(pattern.trim()));
                match Regex::new(&source) {
                    Ok(re) => patterns.push((re, intent.key.clone())),
                    Err(e) => warn!("skipping pattern {:?} of intent {}: {}", pattern, intent.tag, e),
                }
            }
        }
        Self {
            patterns,
            fallback: fallback.into(),
        }
    }

    pub fn classify(&self, text: &str) -> &str {
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map_or(self.fallback.as_str(), |(_, key)| key.as_str())
    }
}

#[async_trait]
impl IntentClassifier for PatternIntents {
    async fn classify_intent(&self, text: &str) -> Result<String, CapabilityError> {
        Ok(self.classify(text).to_string())
    }
}

/// Plays files through an external player such as `aplay`.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl AudioPlayer for CommandPlayer {
    async fn play(&self, path: &Path) -> Result<(), CapabilityError> {
        let status = Command::new(&self.program)
            .arg(path)
            .stdin(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(CapabilityError::Failed {
                capability: "player",
                message: format!("{} exited with {}", self.program, status),
            });
        }
        Ok(())
    }
}

/// Everything the router can call out to.
#[derive(Clone)]
pub struct Capabilities {
    pub detector: Arc<dyn ObjectDetector>,
    pub faces: Arc<dyn FaceRecognizer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub intents: Arc<dyn IntentClassifier>,
    pub player: Arc<dyn AudioPlayer>,
}

impl Capabilities {
    /// Helpers from `[capabilities]`, keyword intents from the script.
    pub fn from_config(config: &meeboconf::MeeboConfig, intents: &[IntentRow]) -> Self {
        let helpers = &config.infra.capabilities;
        let fallback = config.bootstrap.dialogue.fallback_key.clone();

        let detector: Arc<dyn ObjectDetector> = match CommandCapability::new("detector", &helpers.detect_command) {
            Some(helper) => Arc::new(helper),
            None => Arc::new(Unavailable("detector")),
        };
        let faces: Arc<dyn FaceRecognizer> = match CommandCapability::new("faces", &helpers.faces_command) {
            Some(helper) => Arc::new(helper),
            None => Arc::new(Unavailable("faces")),
        };
        let transcriber: Arc<dyn Transcriber> =
            match CommandCapability::new("transcriber", &helpers.transcribe_command) {
                Some(helper) => Arc::new(helper),
                None => Arc::new(Unavailable("transcriber")),
            };

        Self {
            detector,
            faces,
            transcriber,
            intents: Arc::new(PatternIntents::new(intents, fallback)),
            player: Arc::new(CommandPlayer::new(config.infra.speech.player.clone())),
        }
    }

    /// Nothing available; intents always answer `fallback`.
    pub fn unavailable(fallback: impl Into<String>) -> Self {
        Self {
            detector: Arc::new(Unavailable("detector")),
            faces: Arc::new(Unavailable("faces")),
            transcriber: Arc::new(Unavailable("transcriber")),
            intents: Arc::new(PatternIntents::new(&[], fallback)),
            player: Arc::new(Unavailable("player")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn intent(tag: &str, patterns: &[&str], key: &str) -> IntentRow {
        IntentRow {
            tag: tag.into(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            key: key.into(),
        }
    }

    #[test]
    fn first_matching_intent_wins() {
        let intents = PatternIntents::new(
            &[
                intent("delivery", &["package", "parcel"], "DELIV-1"),
                intent("greeting", &["hello", "hi"], "GREETA-0"),
            ],
            "FALLBK-0",
        );

        assert_eq!(intents.classify("Hello, I have a PACKAGE for you"), "DELIV-1");
        assert_eq!(intents.classify("hi there"), "GREETA-0");
        assert_eq!(intents.classify("this is about nothing"), "FALLBK-0");
    }

    #[test]
    fn patterns_match_whole_words_only() {
        let intents = PatternIntents::new(&[intent("greeting", &["hi"], "GREETA-0")], "FALLBK-0");
        assert_eq!(intents.classify("this is it"), "FALLBK-0");
        assert_eq!(intents.classify(""), "FALLBK-0");
    }

    #[test]
    fn empty_command_line_is_not_a_helper() {
        assert!(CommandCapability::new("detector", "   ").is_none());
        assert!(CommandCapability::new("detector", "detect --json").is_some());
    }

    #[tokio::test]
    async fn unavailable_reports_its_name() {
        let err = Unavailable("detector").detect_objects(b"jpeg").await.unwrap_err();
        assert_eq!(err.to_string(), "detector is not configured");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helper_stdout_becomes_the_answer() {
        let echo = CommandCapability::new("transcriber", "cat").unwrap();
        assert_eq!(echo.transcribe(b"  good morning \n").await.unwrap(), "good morning");

        let counts = CommandCapability::new("detector", "cat").unwrap();
        let parsed = counts.detect_objects(br#"{"person": 2}"#).await.unwrap();
        assert_eq!(parsed.get("person"), Some(&2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_helper_is_a_capability_error() {
        let helper = CommandCapability::new("faces", "false").unwrap();
        let err = helper.recognize_faces(b"jpeg").await.unwrap_err();
        assert!(matches!(err, CapabilityError::Failed { capability: "faces", .. }));
    }
}
