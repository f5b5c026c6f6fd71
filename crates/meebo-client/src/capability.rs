//! Devices and speech engines the client drives.
//!
//! Speech synthesis and response listening are capabilities: a failure is
//! logged and the conversation carries on. Sensors are hardware: a bad
//! reading is skipped, but a sensor that won't open or goes away takes its
//! producer down, and only its producer.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("{capability} failed: {message}")]
    Failed {
        capability: &'static str,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("cannot open {sensor}: {message}")]
    Open { sensor: &'static str, message: String },

    #[error("{sensor} read failed: {message}")]
    Read { sensor: &'static str, message: String },

    #[error("{0} stopped producing")]
    Closed(&'static str),
}

impl SensorError {
    /// A bad reading is worth skipping; a sensor that won't open or has gone away is not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SensorError::Read { .. })
    }

    fn read(sensor: &'static str, err: impl std::fmt::Display) -> Self {
        SensorError::Read {
            sensor,
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait Speaker: Send + Sync {
    async fn say(&self, text: &str) -> Result<(), CapabilityError>;
}

#[async_trait]
pub trait ResponseListener: Send + Sync {
    /// What the visitor said, or an empty string if nothing was heard within `limit`.
    async fn listen(&self, limit: Duration) -> Result<String, CapabilityError>;
}

/// One look through the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionSample {
    /// The changed region exceeded the area threshold.
    pub motion: bool,
    pub jpeg: Bytes,
}

#[async_trait]
pub trait MotionCamera: Send {
    async fn open(&mut self) -> Result<(), SensorError>;
    async fn sample(&mut self) -> Result<MotionSample, SensorError>;
}

#[async_trait]
pub trait HotwordDetector: Send {
    async fn open(&mut self) -> Result<(), SensorError>;

    /// Resolves at the next hotword.
    async fn detected(&mut self) -> Result<(), SensorError>;

    /// Record until silence, at most `limit`.
    async fn capture(&mut self, limit: Duration) -> Result<Bytes, SensorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    High,
    Low,
}

#[async_trait]
pub trait ButtonInput: Send {
    async fn open(&mut self) -> Result<(), SensorError>;
    async fn level(&mut self) -> Result<Level, SensorError>;
}

/// Upper-case the first letter of every sentence. Everything else is left alone.
pub fn sentence_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_start = true;
    for c in text.chars() {
        if at_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            at_start = false;
        } else {
            if matches!(c, '.' | '!' | '?') {
                at_start = true;
            } else if !c.is_whitespace() {
                at_start = false;
            }
            out.push(c);
        }
    }
    out
}

/// pico2wave into a scratch file, then the configured player.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    language: String,
    player: String,
    scratch: PathBuf,
}

impl CommandSpeaker {
    pub fn new(language: impl Into<String>, player: impl Into<String>) -> Self {
        let scratch = std::env::temp_dir().join(format!("meebo-speech-{}.wav", std::process::id()));
        Self {
            language: language.into(),
            player: player.into(),
            scratch,
        }
    }

    async fn run<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> Result<(), CapabilityError> {
        let status = Command::new(program).args(args).stdin(Stdio::null()).status().await?;
        if !status.success() {
            return Err(CapabilityError::Failed {
                capability: "speaker",
                message: format!("{program} exited with {status}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn say(&self, text: &str) -> Result<(), CapabilityError> {
        let text = sentence_case(text.trim());
        if text.is_empty() {
            return Ok(());
        }
        debug!("saying {:?}", text);
        let language = format!("--lang={}", self.language);
        let wave = format!("--wave={}", self.scratch.display());
        self.run("pico2wave", &[language, wave, text]).await?;
        self.run(&self.player, &[self.scratch.as_os_str()]).await
    }
}

/// For doorbells without speech recognition: nobody ever answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentListener;

#[async_trait]
impl ResponseListener for SilentListener {
    async fn listen(&self, _limit: Duration) -> Result<String, CapabilityError> {
        Ok(String::new())
    }
}

/// Extra time a listen helper gets on top of the listen limit.
const LISTEN_GRACE: Duration = Duration::from_secs(2);

/// Records an answer through a helper that prints what it heard.
///
/// The helper gets `-d <secs>` like the recorder and writes the transcript to stdout.
#[derive(Debug, Clone)]
pub struct CommandListener {
    argv: Vec<String>,
}

impl CommandListener {
    /// `None` when the command line is empty.
    pub fn new(command_line: &str) -> Option<Self> {
        let argv: Vec<String> = command_line.split_whitespace().map(str::to_string).collect();
        (!argv.is_empty()).then_some(Self { argv })
    }

    fn failed(message: String) -> CapabilityError {
        CapabilityError::Failed {
            capability: "listen",
            message,
        }
    }
}

#[async_trait]
impl ResponseListener for CommandListener {
    async fn listen(&self, limit: Duration) -> Result<String, CapabilityError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Ok(String::new());
        };
        let seconds = limit.as_secs().max(1).to_string();
        let heard = Command::new(program)
            .args(args)
            .args(["-d", seconds.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(limit + LISTEN_GRACE, heard)
            .await
            .map_err(|_| Self::failed(format!("no answer within {:?}", limit + LISTEN_GRACE)))??;
        if !output.status.success() {
            return Err(Self::failed(format!("{program} exited with {}", output.status)));
        }
        let heard = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("heard {:?}", heard);
        Ok(heard)
    }
}

/// Doorbell button on a sysfs GPIO line. Pressed reads low.
#[derive(Debug, Clone)]
pub struct SysfsButton {
    path: PathBuf,
}

impl SysfsButton {
    pub fn new(gpio: u32) -> Self {
        Self::at(format!("/sys/class/gpio/gpio{gpio}/value"))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ButtonInput for SysfsButton {
    async fn open(&mut self) -> Result<(), SensorError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map(|_| ())
            .map_err(|e| SensorError::Open {
                sensor: "button",
                message: format!("{}: {}", self.path.display(), e),
            })
    }

    async fn level(&mut self) -> Result<Level, SensorError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SensorError::read("button", e))?;
        Ok(if raw.trim() == "0" { Level::Low } else { Level::High })
    }
}

/// A long-running helper whose stdout is read line by line.
struct LineHelper {
    sensor: &'static str,
    argv: Vec<String>,
    // Held so the helper is killed with us.
    _child: Option<Child>,
    lines: Option<Lines<BufReader<ChildStdout>>>,
}

impl LineHelper {
    fn new(sensor: &'static str, command_line: &str) -> Self {
        Self {
            sensor,
            argv: command_line.split_whitespace().map(str::to_string).collect(),
            _child: None,
            lines: None,
        }
    }

    fn spawn(&mut self) -> Result<(), SensorError> {
        let open_err = |message: String| SensorError::Open {
            sensor: self.sensor,
            message,
        };
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| open_err("no command configured".to_string()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| open_err(format!("{program}: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| open_err("helper has no stdout".to_string()))?;
        self.lines = Some(BufReader::new(stdout).lines());
        self._child = Some(child);
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, SensorError> {
        let Some(lines) = self.lines.as_mut() else {
            return Err(SensorError::Closed(self.sensor));
        };
        match lines.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(SensorError::Closed(self.sensor)),
            Err(e) => Err(SensorError::read(self.sensor, e)),
        }
    }
}

#[derive(Deserialize)]
struct MotionLine {
    motion: bool,
    #[serde(default)]
    jpeg: String,
}

/// Motion samples from a helper printing `{"motion": bool, "jpeg": "<base64>"}` lines.
pub struct LineMotionFeed {
    helper: LineHelper,
}

impl LineMotionFeed {
    pub fn new(command_line: &str) -> Self {
        Self {
            helper: LineHelper::new("motion", command_line),
        }
    }
}

#[async_trait]
impl MotionCamera for LineMotionFeed {
    async fn open(&mut self) -> Result<(), SensorError> {
        self.helper.spawn()
    }

    async fn sample(&mut self) -> Result<MotionSample, SensorError> {
        let line = self.helper.next_line().await?;
        let parsed: MotionLine = serde_json::from_str(&line).map_err(|e| SensorError::read("motion", e))?;
        let jpeg = base64::engine::general_purpose::STANDARD
            .decode(parsed.jpeg.trim())
            .map_err(|e| SensorError::read("motion", e))?;
        Ok(MotionSample {
            motion: parsed.motion,
            jpeg: Bytes::from(jpeg),
        })
    }
}

/// Hotwords as lines from a helper; speech captured through a recorder command.
pub struct CommandHotword {
    helper: LineHelper,
    recorder: Vec<String>,
}

impl CommandHotword {
    pub fn new(hotword_command: &str, record_command: &str) -> Self {
        Self {
            helper: LineHelper::new("hotword", hotword_command),
            recorder: record_command.split_whitespace().map(str::to_string).collect(),
        }
    }
}

#[async_trait]
impl HotwordDetector for CommandHotword {
    async fn open(&mut self) -> Result<(), SensorError> {
        if self.recorder.is_empty() {
            return Err(SensorError::Open {
                sensor: "hotword",
                message: "no record command configured".to_string(),
            });
        }
        self.helper.spawn()
    }

    async fn detected(&mut self) -> Result<(), SensorError> {
        let line = self.helper.next_line().await?;
        debug!("hotword helper: {}", line.trim());
        Ok(())
    }

    async fn capture(&mut self, limit: Duration) -> Result<Bytes, SensorError> {
        let Some((program, args)) = self.recorder.split_first() else {
            return Err(SensorError::Closed("recorder"));
        };
        let seconds = limit.as_secs().max(1).to_string();
        let output = Command::new(program)
            .args(args)
            .args(["-d", seconds.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SensorError::read("recorder", e))?;
        if !output.status.success() {
            return Err(SensorError::read("recorder", format!("{program} exited with {}", output.status)));
        }
        Ok(Bytes::from(output.stdout))
    }
}
