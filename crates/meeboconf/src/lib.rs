//! Layered configuration for the Meebo brain and its doorbell clients.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): fixed for the life of the process -
//!   paths, endpoints, client identity, retry policy, which sensors run.
//!
//! - **Bootstrap** (`BootstrapConfig`): initial values that seed the shared
//!   Environment. After startup the Environment is the source of truth, and the
//!   brain may push new mode flags to clients.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/meebo/config.toml` (system)
//! 2. `~/.config/meebo/config.toml` (user)
//! 3. `./meebo.toml` or the `--config` path (local override)
//! 4. Environment variables (`MEEBO_*`, `RUST_LOG`)
//!
//! Files are merged table by table, so each one only needs the keys it changes.
//!
//! # Example Config
//!
//! ```toml
//! [broker]
//! endpoint = "tcp://192.168.0.50:5670"
//!
//! [client]
//! name = "FrontDoor"
//! reply_to = "tcp://192.168.0.61:5671"
//!
//! [sensors]
//! button = true
//!
//! [bootstrap.modes]
//! secure_mode = true
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BootstrapConfig, ButtonConfig, DialogueConfig, ModesConfig, TimingConfig};
pub use infra::{
    BrokerConfig, CapabilitiesConfig, ClientConfig, InfraConfig, PathsConfig, SensorsConfig, SnapshotsConfig,
    SpeechConfig, TelemetryConfig, TransportConfig,
};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Merged configuration is invalid: {0}")]
    Merge(String),
}

/// Complete Meebo configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MeeboConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Bootstrap - seeds the Environment.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl MeeboConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over `./meebo.toml`.
    /// System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::finish(merged)?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize the effective config to a TOML string.
    pub fn to_toml(&self) -> String {
        let infra = &self.infra;
        let boot = &self.bootstrap;
        let mut out = String::new();

        // Writing into a String cannot fail.
        let _ = writeln!(out, "# Meebo Configuration\n");

        let _ = writeln!(out, "[paths]");
        let _ = writeln!(out, "state_dir = {:?}", infra.paths.state_dir.display().to_string());
        let _ = writeln!(out, "media_dir = {:?}", infra.paths.media_dir.display().to_string());
        let _ = writeln!(out, "script = {:?}", infra.paths.script.display().to_string());

        let _ = writeln!(out, "\n[broker]");
        let _ = writeln!(out, "endpoint = {:?}", infra.broker.endpoint);
        let _ = writeln!(out, "bind = {:?}", infra.broker.bind);
        let _ = writeln!(out, "brain_name = {:?}", infra.broker.brain_name);
        let _ = writeln!(out, "username = {:?}", infra.broker.username);
        if !infra.broker.password.is_empty() {
            let _ = writeln!(out, "# password is set");
        }

        let _ = writeln!(out, "\n[client]");
        let _ = writeln!(out, "name = {:?}", infra.client.name);
        let _ = writeln!(out, "listen = {:?}", infra.client.listen);
        let _ = writeln!(out, "reply_to = {:?}", infra.client.reply_to);

        let _ = writeln!(out, "\n[transport]");
        let _ = writeln!(out, "publish_timeout_ms = {}", infra.transport.publish_timeout_ms);
        let _ = writeln!(out, "attempts = {}", infra.transport.attempts);
        let _ = writeln!(out, "backoff_ms = {}", infra.transport.backoff_ms);

        let _ = writeln!(out, "\n[telemetry]");
        let _ = writeln!(out, "log_level = {:?}", infra.telemetry.log_level);

        let _ = writeln!(out, "\n[sensors]");
        let _ = writeln!(out, "motion = {}", infra.sensors.motion);
        let _ = writeln!(out, "hotword = {}", infra.sensors.hotword);
        let _ = writeln!(out, "button = {}", infra.sensors.button);
        let _ = writeln!(out, "motion_command = {:?}", infra.sensors.motion_command);
        let _ = writeln!(out, "hotword_command = {:?}", infra.sensors.hotword_command);
        let _ = writeln!(out, "record_command = {:?}", infra.sensors.record_command);
        let _ = writeln!(out, "button_gpio = {}", infra.sensors.button_gpio);
        let _ = writeln!(out, "button_poll_ms = {}", infra.sensors.button_poll_ms);

        let _ = writeln!(out, "\n[speech]");
        let _ = writeln!(out, "language = {:?}", infra.speech.language);
        let _ = writeln!(out, "player = {:?}", infra.speech.player);
        let _ = writeln!(out, "listen_command = {:?}", infra.speech.listen_command);

        let _ = writeln!(out, "\n[snapshots]");
        let _ = writeln!(out, "enabled = {}", infra.snapshots.enabled);
        let _ = writeln!(out, "dir = {:?}", infra.snapshots.dir.display().to_string());

        let _ = writeln!(out, "\n[capabilities]");
        let _ = writeln!(out, "detect_command = {:?}", infra.capabilities.detect_command);
        let _ = writeln!(out, "faces_command = {:?}", infra.capabilities.faces_command);
        let _ = writeln!(out, "transcribe_command = {:?}", infra.capabilities.transcribe_command);

        let _ = writeln!(out, "\n[bootstrap.modes]");
        let _ = writeln!(out, "secure_mode = {}", boot.modes.secure_mode);
        let _ = writeln!(out, "friend_mode = {}", boot.modes.friend_mode);
        let _ = writeln!(out, "identify = {}", boot.modes.identify);
        let _ = writeln!(out, "motion = {}", boot.modes.motion);

        let _ = writeln!(out, "\n[bootstrap.timing]");
        let _ = writeln!(out, "motion_alert_secs = {}", boot.timing.motion_alert_secs);
        let _ = writeln!(out, "motion_cooldown_secs = {}", boot.timing.motion_cooldown_secs);
        let _ = writeln!(out, "button_debounce_ms = {}", boot.timing.button_debounce_ms);
        let _ = writeln!(
            out,
            "recognized_retention_secs = {}",
            boot.timing.recognized_retention_secs
        );
        let _ = writeln!(out, "hotword_capture_secs = {}", boot.timing.hotword_capture_secs);
        let _ = writeln!(out, "response_listen_secs = {}", boot.timing.response_listen_secs);
        let _ = writeln!(out, "pause_listen_secs = {}", boot.timing.pause_listen_secs);

        let _ = writeln!(out, "\n[bootstrap.dialogue]");
        let _ = writeln!(out, "language = {:?}", boot.dialogue.language);
        let _ = writeln!(out, "secure_key = {:?}", boot.dialogue.secure_key);
        let _ = writeln!(out, "friendly_key = {:?}", boot.dialogue.friendly_key);
        let _ = writeln!(out, "recognized_key = {:?}", boot.dialogue.recognized_key);
        let _ = writeln!(out, "fallback_key = {:?}", boot.dialogue.fallback_key);
        let _ = writeln!(out, "max_hops = {}", boot.dialogue.max_hops);

        let _ = writeln!(out, "\n[bootstrap.button]");
        let _ = writeln!(out, "audio = {:?}", boot.button.audio);
        let _ = writeln!(out, "phrase = {:?}", boot.button.phrase);

        out
    }
}
