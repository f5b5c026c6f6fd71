//! Bootstrap configuration - seeds the Environment, then runtime owns it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Initial mode flags. The brain shares these with clients on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModesConfig {
    /// Warn strangers off instead of greeting them.
    #[serde(default)]
    pub secure_mode: bool,

    /// Greet people who show up at the door.
    #[serde(default = "ModesConfig::default_true")]
    pub friend_mode: bool,

    /// Run face recognition on frames that contain a person.
    #[serde(default = "ModesConfig::default_true")]
    pub identify: bool,

    /// Motion sensing switch; the producer idles while this is off.
    #[serde(default = "ModesConfig::default_true")]
    pub motion: bool,
}

impl ModesConfig {
    fn default_true() -> bool {
        true
    }
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            secure_mode: false,
            friend_mode: true,
            identify: true,
            motion: true,
        }
    }
}

/// Cooldown, debounce and listening windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Minimum gap between two uploaded motion frames.
    #[serde(default = "TimingConfig::default_motion_alert_secs")]
    pub motion_alert_secs: u64,

    /// Minimum gap between two motion-started conversations.
    #[serde(default = "TimingConfig::default_motion_cooldown_secs")]
    pub motion_cooldown_secs: u64,

    #[serde(default = "TimingConfig::default_button_debounce_ms")]
    pub button_debounce_ms: u64,

    /// How long a recognized visitor is remembered.
    #[serde(default = "TimingConfig::default_recognized_retention_secs")]
    pub recognized_retention_secs: u64,

    /// Hard limit on one hotword capture.
    #[serde(default = "TimingConfig::default_hotword_capture_secs")]
    pub hotword_capture_secs: u64,

    /// Hard limit on waiting for a spoken answer.
    #[serde(default = "TimingConfig::default_response_listen_secs")]
    pub response_listen_secs: u64,

    /// How long `pauseListen` keeps the microphone to itself.
    #[serde(default = "TimingConfig::default_pause_listen_secs")]
    pub pause_listen_secs: u64,
}

impl TimingConfig {
    fn default_motion_alert_secs() -> u64 {
        3
    }

    fn default_motion_cooldown_secs() -> u64 {
        60
    }

    fn default_button_debounce_ms() -> u64 {
        1000
    }

    fn default_recognized_retention_secs() -> u64 {
        60
    }

    fn default_hotword_capture_secs() -> u64 {
        8
    }

    fn default_response_listen_secs() -> u64 {
        6
    }

    fn default_pause_listen_secs() -> u64 {
        5
    }

    pub fn motion_alert(&self) -> Duration {
        Duration::from_secs(self.motion_alert_secs)
    }

    pub fn motion_cooldown(&self) -> Duration {
        Duration::from_secs(self.motion_cooldown_secs)
    }

    pub fn button_debounce(&self) -> Duration {
        Duration::from_millis(self.button_debounce_ms)
    }

    pub fn recognized_retention(&self) -> Duration {
        Duration::from_secs(self.recognized_retention_secs)
    }

    pub fn hotword_capture(&self) -> Duration {
        Duration::from_secs(self.hotword_capture_secs)
    }

    pub fn response_listen(&self) -> Duration {
        Duration::from_secs(self.response_listen_secs)
    }

    pub fn pause_listen(&self) -> Duration {
        Duration::from_secs(self.pause_listen_secs)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            motion_alert_secs: Self::default_motion_alert_secs(),
            motion_cooldown_secs: Self::default_motion_cooldown_secs(),
            button_debounce_ms: Self::default_button_debounce_ms(),
            recognized_retention_secs: Self::default_recognized_retention_secs(),
            hotword_capture_secs: Self::default_hotword_capture_secs(),
            response_listen_secs: Self::default_response_listen_secs(),
            pause_listen_secs: Self::default_pause_listen_secs(),
        }
    }
}

/// Dialogue entry points and traversal limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Language id prefixed to two-part keys.
    #[serde(default = "DialogueConfig::default_language")]
    pub language: String,

    #[serde(default = "DialogueConfig::default_secure_key")]
    pub secure_key: String,

    #[serde(default = "DialogueConfig::default_friendly_key")]
    pub friendly_key: String,

    #[serde(default = "DialogueConfig::default_recognized_key")]
    pub recognized_key: String,

    /// Where an unclassified utterance lands.
    #[serde(default = "DialogueConfig::default_fallback_key")]
    pub fallback_key: String,

    /// Guard against cyclic `next` pointers.
    #[serde(default = "DialogueConfig::default_max_hops")]
    pub max_hops: usize,
}

impl DialogueConfig {
    fn default_language() -> String {
        "0".to_string()
    }

    fn default_secure_key() -> String {
        "SECURITY-0".to_string()
    }

    fn default_friendly_key() -> String {
        "GREETA-0".to_string()
    }

    fn default_recognized_key() -> String {
        "RECOG-0".to_string()
    }

    fn default_fallback_key() -> String {
        "GREETA-0".to_string()
    }

    fn default_max_hops() -> usize {
        32
    }
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            language: Self::default_language(),
            secure_key: Self::default_secure_key(),
            friendly_key: Self::default_friendly_key(),
            recognized_key: Self::default_recognized_key(),
            fallback_key: Self::default_fallback_key(),
            max_hops: Self::default_max_hops(),
        }
    }
}

/// What happens when somebody rings the bell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonConfig {
    /// Chime under `paths.media_dir/audio`.
    #[serde(default = "ButtonConfig::default_audio")]
    pub audio: String,

    #[serde(default = "ButtonConfig::default_phrase")]
    pub phrase: String,
}

impl ButtonConfig {
    fn default_audio() -> String {
        "doorbell.wav".to_string()
    }

    fn default_phrase() -> String {
        "Hi, my name is Meebo. I will let my masters know you are here.".to_string()
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            audio: Self::default_audio(),
            phrase: Self::default_phrase(),
        }
    }
}

/// Complete bootstrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub modes: ModesConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub dialogue: DialogueConfig,

    #[serde(default)]
    pub button: ButtonConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_defaults() {
        let timing = TimingConfig::default();
        assert_eq!(timing.motion_cooldown(), Duration::from_secs(60));
        assert_eq!(timing.recognized_retention(), Duration::from_secs(60));
        assert_eq!(timing.button_debounce(), Duration::from_secs(1));
        assert!(timing.motion_alert() < timing.motion_cooldown());
    }

    #[test]
    fn test_dialogue_defaults() {
        let dialogue = DialogueConfig::default();
        assert_eq!(dialogue.secure_key, "SECURITY-0");
        assert_eq!(dialogue.recognized_key, "RECOG-0");
        assert_eq!(dialogue.max_hops, 32);
    }
}
