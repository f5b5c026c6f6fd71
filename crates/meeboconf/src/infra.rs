//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn data_dir(rest: &str) -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".local/share/meebo").join(rest))
        .unwrap_or_else(|| PathBuf::from(".local/share/meebo").join(rest))
}

/// Filesystem paths for state, media and the dialogue script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for runtime state. Never overwritten by the brain.
    /// Default: ~/.local/share/meebo
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,

    /// Static media (doorbell chimes and other audio).
    /// Default: ~/.local/share/meebo/static
    #[serde(default = "PathsConfig::default_media_dir")]
    pub media_dir: PathBuf,

    /// Dialogue script (TOML rows).
    /// Default: ~/.local/share/meebo/chat.toml
    #[serde(default = "PathsConfig::default_script")]
    pub script: PathBuf,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        data_dir("")
    }

    fn default_media_dir() -> PathBuf {
        data_dir("static")
    }

    fn default_script() -> PathBuf {
        data_dir("chat.toml")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            media_dir: Self::default_media_dir(),
            script: Self::default_script(),
        }
    }
}

/// Where the brain listens and how clients reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Endpoint clients push events to.
    /// Default: tcp://127.0.0.1:5670
    #[serde(default = "BrokerConfig::default_endpoint")]
    pub endpoint: String,

    /// Endpoint the brain binds its PULL socket on.
    /// Default: tcp://0.0.0.0:5670
    #[serde(default = "BrokerConfig::default_bind")]
    pub bind: String,

    /// Sender id the brain stamps on its replies.
    /// Default: Central
    #[serde(default = "BrokerConfig::default_brain_name")]
    pub brain_name: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

impl BrokerConfig {
    fn default_endpoint() -> String {
        "tcp://127.0.0.1:5670".to_string()
    }

    fn default_bind() -> String {
        "tcp://0.0.0.0:5670".to_string()
    }

    fn default_brain_name() -> String {
        "Central".to_string()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            bind: Self::default_bind(),
            brain_name: Self::default_brain_name(),
            username: String::new(),
            password: String::new(),
        }
    }
}

/// Client identity and its reply path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client name, used as the sender id on every envelope.
    /// Default: ClientDefault
    #[serde(default = "ClientConfig::default_name")]
    pub name: String,

    /// Endpoint the client binds to receive brain replies.
    /// Default: tcp://0.0.0.0:5671
    #[serde(default = "ClientConfig::default_listen")]
    pub listen: String,

    /// Endpoint the brain should reply to (reachable form of `listen`).
    /// Default: tcp://127.0.0.1:5671
    #[serde(default = "ClientConfig::default_reply_to")]
    pub reply_to: String,
}

impl ClientConfig {
    fn default_name() -> String {
        "ClientDefault".to_string()
    }

    fn default_listen() -> String {
        "tcp://0.0.0.0:5671".to_string()
    }

    fn default_reply_to() -> String {
        "tcp://127.0.0.1:5671".to_string()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            listen: Self::default_listen(),
            reply_to: Self::default_reply_to(),
        }
    }
}

/// Publish retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Upper bound on a single publish attempt.
    /// Default: 2000
    #[serde(default = "TransportConfig::default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Attempts before a send is reported as failed.
    /// Default: 3
    #[serde(default = "TransportConfig::default_attempts")]
    pub attempts: u32,

    /// Fixed pause between attempts.
    /// Default: 500
    #[serde(default = "TransportConfig::default_backoff_ms")]
    pub backoff_ms: u64,
}

impl TransportConfig {
    fn default_publish_timeout_ms() -> u64 {
        2000
    }

    fn default_attempts() -> u32 {
        3
    }

    fn default_backoff_ms() -> u64 {
        500
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: Self::default_publish_timeout_ms(),
            attempts: Self::default_attempts(),
            backoff_ms: Self::default_backoff_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Which sensors a client runs, and the helpers that drive them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorsConfig {
    #[serde(default = "SensorsConfig::default_true")]
    pub motion: bool,

    #[serde(default)]
    pub hotword: bool,

    #[serde(default)]
    pub button: bool,

    /// Helper printing one JSON sample per line: {"motion": bool, "image": "<base64 jpeg>"}.
    /// Default: meebo-motion
    #[serde(default = "SensorsConfig::default_motion_command")]
    pub motion_command: String,

    /// Helper printing a line each time the hotword is heard.
    /// Default: meebo-hotword
    #[serde(default = "SensorsConfig::default_hotword_command")]
    pub hotword_command: String,

    /// Recorder that writes a WAV to stdout and exits on silence.
    /// Default: arecord -q -f S16_LE -r 16000 -t wav
    #[serde(default = "SensorsConfig::default_record_command")]
    pub record_command: String,

    /// GPIO line of the doorbell button.
    /// Default: 12
    #[serde(default = "SensorsConfig::default_button_gpio")]
    pub button_gpio: u32,

    /// Default: 100
    #[serde(default = "SensorsConfig::default_button_poll_ms")]
    pub button_poll_ms: u64,
}

impl SensorsConfig {
    fn default_true() -> bool {
        true
    }

    fn default_motion_command() -> String {
        "meebo-motion".to_string()
    }

    fn default_hotword_command() -> String {
        "meebo-hotword".to_string()
    }

    fn default_record_command() -> String {
        "arecord -q -f S16_LE -r 16000 -t wav".to_string()
    }

    fn default_button_gpio() -> u32 {
        12
    }

    fn default_button_poll_ms() -> u64 {
        100
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            motion: true,
            hotword: false,
            button: false,
            motion_command: Self::default_motion_command(),
            hotword_command: Self::default_hotword_command(),
            record_command: Self::default_record_command(),
            button_gpio: Self::default_button_gpio(),
            button_poll_ms: Self::default_button_poll_ms(),
        }
    }
}

/// Speech output helpers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// pico2wave language.
    /// Default: en-US
    #[serde(default = "SpeechConfig::default_language")]
    pub language: String,

    /// Audio player used for speech and chimes.
    /// Default: aplay
    #[serde(default = "SpeechConfig::default_player")]
    pub player: String,

    /// Records a visitor's answer and prints the transcript. Gets `-d <secs>`.
    /// Empty means nobody is ever heard.
    #[serde(default)]
    pub listen_command: String,
}

impl SpeechConfig {
    fn default_language() -> String {
        "en-US".to_string()
    }

    fn default_player() -> String {
        "aplay".to_string()
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: Self::default_language(),
            player: Self::default_player(),
            listen_command: String::new(),
        }
    }
}

/// Brain-side archive of motion images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Default: ~/.local/share/meebo/snapshots
    #[serde(default = "SnapshotsConfig::default_dir")]
    pub dir: PathBuf,
}

impl SnapshotsConfig {
    fn default_dir() -> PathBuf {
        data_dir("snapshots")
    }
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: Self::default_dir(),
        }
    }
}

/// External helpers behind the brain's capabilities. Empty means unavailable.
///
/// Each helper gets the input on stdin. `detect` prints a JSON object of
/// class counts, `faces` a JSON array of identities, `transcribe` plain text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    #[serde(default)]
    pub detect_command: String,

    #[serde(default)]
    pub faces_command: String,

    #[serde(default)]
    pub transcribe_command: String,
}

/// Complete infrastructure configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub sensors: SensorsConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub snapshots: SnapshotsConfig,

    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}
