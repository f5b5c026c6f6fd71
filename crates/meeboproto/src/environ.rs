//! Per-process shared state.
//!
//! One [`Environment`] handle is cloned into every task of a process. All
//! access goes through atomic accessors on a single lock; nothing hands out
//! references into the state, and no lock is held across an `.await`.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use crate::message::EnvironSnapshot;

/// Deadlines that gate repeated triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cooldown {
    /// Gates starting a motion conversation (motionCooldownUntil).
    Motion,
    /// Gates uploading another motion frame.
    MotionAlert,
    /// Button debounce.
    Button,
}

impl Cooldown {
    pub const ALL: [Cooldown; 3] = [Cooldown::Motion, Cooldown::MotionAlert, Cooldown::Button];
}

/// Every key the Environment knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvKey {
    ClientName,
    BrokerEndpoint,
    ReplyEndpoint,
    StateDir,
    SecureMode,
    FriendMode,
    Identify,
    MotionEnabled,
    Talking,
    MicrophoneFree,
    RecognizedIdentity,
    RecognizedUntil,
    Cooldown(Cooldown),
}

impl EnvKey {
    pub const ALL: [EnvKey; 15] = [
        EnvKey::ClientName,
        EnvKey::BrokerEndpoint,
        EnvKey::ReplyEndpoint,
        EnvKey::StateDir,
        EnvKey::SecureMode,
        EnvKey::FriendMode,
        EnvKey::Identify,
        EnvKey::MotionEnabled,
        EnvKey::Talking,
        EnvKey::MicrophoneFree,
        EnvKey::RecognizedIdentity,
        EnvKey::RecognizedUntil,
        EnvKey::Cooldown(Cooldown::Motion),
        EnvKey::Cooldown(Cooldown::MotionAlert),
        EnvKey::Cooldown(Cooldown::Button),
    ];

    pub fn name(self) -> &'static str {
        match self {
            EnvKey::ClientName => "clientName",
            EnvKey::BrokerEndpoint => "brokerEndpoint",
            EnvKey::ReplyEndpoint => "replyEndpoint",
            EnvKey::StateDir => "stateDir",
            EnvKey::SecureMode => "secureMode",
            EnvKey::FriendMode => "friendMode",
            EnvKey::Identify => "identify",
            EnvKey::MotionEnabled => "motion",
            EnvKey::Talking => "talking",
            EnvKey::MicrophoneFree => "microphoneFree",
            EnvKey::RecognizedIdentity => "recognizedIdentity",
            EnvKey::RecognizedUntil => "recognizedUntil",
            EnvKey::Cooldown(Cooldown::Motion) => "motionCooldownUntil",
            EnvKey::Cooldown(Cooldown::MotionAlert) => "motionAlertUntil",
            EnvKey::Cooldown(Cooldown::Button) => "buttonCooldownUntil",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        EnvKey::ALL.into_iter().find(|key| key.name() == name)
    }

    /// Local identity and paths; a snapshot from the brain never overwrites these.
    pub fn is_protected(self) -> bool {
        matches!(
            self,
            EnvKey::ClientName | EnvKey::BrokerEndpoint | EnvKey::ReplyEndpoint | EnvKey::StateDir
        )
    }

    /// Mode flags the brain shares with its clients.
    pub fn is_shared(self) -> bool {
        matches!(
            self,
            EnvKey::SecureMode | EnvKey::FriendMode | EnvKey::Identify | EnvKey::MotionEnabled
        )
    }

    /// Only changed through their RAII guards.
    fn is_guarded(self) -> bool {
        matches!(self, EnvKey::Talking | EnvKey::MicrophoneFree)
    }
}

/// A value read from or written to the Environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Flag(bool),
    Text(Option<String>),
    Deadline(Option<DateTime<Utc>>),
}

impl EnvValue {
    pub fn to_json(&self) -> Value {
        match self {
            EnvValue::Flag(b) => Value::Bool(*b),
            EnvValue::Text(Some(s)) => Value::String(s.clone()),
            EnvValue::Deadline(Some(t)) => Value::String(t.to_rfc3339()),
            EnvValue::Text(None) | EnvValue::Deadline(None) => Value::Null,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("{key} expects a {expected} value")]
    TypeMismatch {
        key: &'static str,
        expected: &'static str,
    },
    #[error("{0} can only change through its guard")]
    Guarded(&'static str),
}

/// Seed values for a fresh Environment.
#[derive(Debug, Clone)]
pub struct EnvironmentSeed {
    pub client_name: String,
    pub broker_endpoint: String,
    pub reply_endpoint: String,
    pub state_dir: String,
    pub secure_mode: bool,
    pub friend_mode: bool,
    pub identify: bool,
    pub motion_enabled: bool,
}

impl Default for EnvironmentSeed {
    fn default() -> Self {
        Self {
            client_name: "ClientDefault".to_string(),
            broker_endpoint: String::new(),
            reply_endpoint: String::new(),
            state_dir: String::new(),
            secure_mode: false,
            friend_mode: true,
            identify: true,
            motion_enabled: true,
        }
    }
}

impl EnvironmentSeed {
    /// Seed for a client process.
    pub fn client(config: &meeboconf::MeeboConfig) -> Self {
        Self::from_config(config, &config.infra.client.name, &config.infra.client.reply_to)
    }

    /// Seed for the brain; it never needs a reply endpoint of its own.
    pub fn brain(config: &meeboconf::MeeboConfig) -> Self {
        Self::from_config(config, &config.infra.broker.brain_name, "")
    }

    fn from_config(config: &meeboconf::MeeboConfig, name: &str, reply_to: &str) -> Self {
        let modes = &config.bootstrap.modes;
        Self {
            client_name: name.to_string(),
            broker_endpoint: config.infra.broker.endpoint.clone(),
            reply_endpoint: reply_to.to_string(),
            state_dir: path_string(&config.infra.paths.state_dir),
            secure_mode: modes.secure_mode,
            friend_mode: modes.friend_mode,
            identify: modes.identify,
            motion_enabled: modes.motion,
        }
    }
}

fn path_string(path: &Path) -> String {
    path.display().to_string()
}

#[derive(Debug)]
struct State {
    client_name: String,
    broker_endpoint: String,
    reply_endpoint: String,
    state_dir: String,
    secure_mode: bool,
    friend_mode: bool,
    identify: bool,
    motion_enabled: bool,
    talking: bool,
    microphone_free: bool,
    recognized_identity: Option<String>,
    recognized_until: Option<DateTime<Utc>>,
    cooldowns: BTreeMap<Cooldown, DateTime<Utc>>,
    extras: BTreeMap<String, Value>,
}

impl State {
    fn flag_mut(&mut self, key: EnvKey) -> Option<&mut bool> {
        match key {
            EnvKey::SecureMode => Some(&mut self.secure_mode),
            EnvKey::FriendMode => Some(&mut self.friend_mode),
            EnvKey::Identify => Some(&mut self.identify),
            EnvKey::MotionEnabled => Some(&mut self.motion_enabled),
            _ => None,
        }
    }

    fn get(&self, key: EnvKey) -> EnvValue {
        match key {
            EnvKey::ClientName => EnvValue::Text(Some(self.client_name.clone())),
            EnvKey::BrokerEndpoint => EnvValue::Text(Some(self.broker_endpoint.clone())),
            EnvKey::ReplyEndpoint => EnvValue::Text(Some(self.reply_endpoint.clone())),
            EnvKey::StateDir => EnvValue::Text(Some(self.state_dir.clone())),
            EnvKey::SecureMode => EnvValue::Flag(self.secure_mode),
            EnvKey::FriendMode => EnvValue::Flag(self.friend_mode),
            EnvKey::Identify => EnvValue::Flag(self.identify),
            EnvKey::MotionEnabled => EnvValue::Flag(self.motion_enabled),
            EnvKey::Talking => EnvValue::Flag(self.talking),
            EnvKey::MicrophoneFree => EnvValue::Flag(self.microphone_free),
            EnvKey::RecognizedIdentity => EnvValue::Text(self.recognized_identity.clone()),
            EnvKey::RecognizedUntil => EnvValue::Deadline(self.recognized_until),
            EnvKey::Cooldown(c) => EnvValue::Deadline(self.cooldowns.get(&c).copied()),
        }
    }
}

struct Inner {
    state: Mutex<State>,
    microphone_released: Notify,
}

/// Handle to the process-wide Environment. Cheap to clone.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("state", &*self.state())
            .finish()
    }
}

/// `now + duration`, saturating instead of overflowing.
pub fn deadline_after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Environment {
    pub fn new(seed: EnvironmentSeed) -> Self {
        let state = State {
            client_name: seed.client_name,
            broker_endpoint: seed.broker_endpoint,
            reply_endpoint: seed.reply_endpoint,
            state_dir: seed.state_dir,
            secure_mode: seed.secure_mode,
            friend_mode: seed.friend_mode,
            identify: seed.identify,
            motion_enabled: seed.motion_enabled,
            talking: false,
            microphone_free: true,
            recognized_identity: None,
            recognized_until: None,
            cooldowns: BTreeMap::new(),
            extras: BTreeMap::new(),
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                microphone_released: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic elsewhere must not take the whole process's state down with it.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: EnvKey) -> EnvValue {
        self.state().get(key)
    }

    /// Read by wire name. Unknown names read as `null`.
    pub fn get_named(&self, name: &str) -> Value {
        match EnvKey::from_name(name) {
            Some(key) => self.get(key).to_json(),
            None => self.state().extras.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    pub fn set(&self, key: EnvKey, value: EnvValue) -> Result<(), EnvError> {
        if key.is_guarded() {
            return Err(EnvError::Guarded(key.name()));
        }
        let mismatch = |expected| EnvError::TypeMismatch {
            key: key.name(),
            expected,
        };

        let mut state = self.state();
        match (key, value) {
            (EnvKey::RecognizedIdentity, EnvValue::Text(v)) => state.recognized_identity = v,
            (EnvKey::RecognizedUntil, EnvValue::Deadline(v)) => state.recognized_until = v,
            (EnvKey::Cooldown(c), EnvValue::Deadline(Some(t))) => {
                state.cooldowns.insert(c, t);
            }
            (EnvKey::Cooldown(c), EnvValue::Deadline(None)) => {
                state.cooldowns.remove(&c);
            }
            (EnvKey::ClientName, EnvValue::Text(Some(v))) => state.client_name = v,
            (EnvKey::BrokerEndpoint, EnvValue::Text(Some(v))) => state.broker_endpoint = v,
            (EnvKey::ReplyEndpoint, EnvValue::Text(Some(v))) => state.reply_endpoint = v,
            (EnvKey::StateDir, EnvValue::Text(Some(v))) => state.state_dir = v,
            (EnvKey::ClientName | EnvKey::BrokerEndpoint | EnvKey::ReplyEndpoint | EnvKey::StateDir, _) => {
                return Err(mismatch("text"));
            }
            (EnvKey::RecognizedIdentity, _) => return Err(mismatch("text")),
            (EnvKey::RecognizedUntil | EnvKey::Cooldown(_), _) => return Err(mismatch("deadline")),
            (key, EnvValue::Flag(v)) => match state.flag_mut(key) {
                Some(slot) => *slot = v,
                None => return Err(mismatch("flag")),
            },
            (_, _) => return Err(mismatch("flag")),
        }
        Ok(())
    }

    /// If `now` has reached the cooldown's deadline, move the deadline to
    /// `now + duration` and return true. Exactly one of any number of racing
    /// callers wins.
    pub fn compare_and_swap_cooldown(&self, cooldown: Cooldown, now: DateTime<Utc>, duration: Duration) -> bool {
        let mut state = self.state();
        let elapsed = state.cooldowns.get(&cooldown).map_or(true, |deadline| now >= *deadline);
        if elapsed {
            state.cooldowns.insert(cooldown, deadline_after(now, duration));
        }
        elapsed
    }

    /// Push a cooldown out to `now + duration` unconditionally.
    pub fn rearm_cooldown(&self, cooldown: Cooldown, now: DateTime<Utc>, duration: Duration) {
        self.state().cooldowns.insert(cooldown, deadline_after(now, duration));
    }

    pub fn cooldown_elapsed(&self, cooldown: Cooldown, now: DateTime<Utc>) -> bool {
        self.state().cooldowns.get(&cooldown).map_or(true, |deadline| now >= *deadline)
    }

    /// The remembered visitor, if the retention window is still open at `now`.
    pub fn recognized_identity_at(&self, now: DateTime<Utc>) -> Option<String> {
        let state = self.state();
        match state.recognized_until {
            Some(until) if until > now => state.recognized_identity.clone(),
            _ => None,
        }
    }

    /// Remember `identity` for `retention`, unless someone is already remembered.
    pub fn remember_identity(&self, identity: &str, now: DateTime<Utc>, retention: Duration) -> bool {
        let mut state = self.state();
        if matches!(state.recognized_until, Some(until) if until > now) {
            return false;
        }
        state.recognized_identity = Some(identity.to_string());
        state.recognized_until = Some(deadline_after(now, retention));
        true
    }

    /// Claim the microphone. `None` when another holder has it.
    pub fn try_acquire_microphone(&self) -> Option<MicrophoneGuard> {
        let mut state = self.state();
        if !state.microphone_free {
            return None;
        }
        state.microphone_free = false;
        Some(MicrophoneGuard { env: self.clone() })
    }

    /// Resolves once the microphone is free. Does not claim it.
    pub async fn microphone_released(&self) {
        loop {
            let notified = self.inner.microphone_released.notified();
            tokio::pin!(notified);
            // Register before checking, so a release between the check and the await is seen.
            notified.as_mut().enable();
            if self.microphone_free() {
                return;
            }
            notified.await;
        }
    }

    /// Mark speech in progress. `None` when a conversation is already running.
    pub fn begin_talking(&self) -> Option<TalkingGuard> {
        let mut state = self.state();
        if state.talking {
            return None;
        }
        state.talking = true;
        Some(TalkingGuard { env: self.clone() })
    }

    pub fn talking(&self) -> bool {
        self.state().talking
    }

    pub fn microphone_free(&self) -> bool {
        self.state().microphone_free
    }

    pub fn secure_mode(&self) -> bool {
        self.state().secure_mode
    }

    pub fn friend_mode(&self) -> bool {
        self.state().friend_mode
    }

    pub fn identify(&self) -> bool {
        self.state().identify
    }

    pub fn motion_enabled(&self) -> bool {
        self.state().motion_enabled
    }

    pub fn client_name(&self) -> String {
        self.state().client_name.clone()
    }

    pub fn reply_endpoint(&self) -> String {
        self.state().reply_endpoint.clone()
    }

    pub fn broker_endpoint(&self) -> String {
        self.state().broker_endpoint.clone()
    }

    /// Shareable keys plus any extras picked up along the way.
    pub fn snapshot(&self) -> EnvironSnapshot {
        let state = self.state();
        let mut snapshot = EnvironSnapshot::default();
        for (name, value) in &state.extras {
            snapshot.insert(name.clone(), value.clone());
        }
        for key in EnvKey::ALL.into_iter().filter(|k| k.is_shared()) {
            snapshot.insert(key.name(), state.get(key).to_json());
        }
        snapshot
    }

    /// Fold a snapshot from the brain into local state. Returns how many keys changed.
    ///
    /// Protected keys are skipped, as are runtime keys (talking, the microphone,
    /// timers) that only this process may drive. Unknown names are kept as extras.
    pub fn merge_snapshot(&self, snapshot: &EnvironSnapshot) -> usize {
        let mut state = self.state();
        let mut merged = 0;
        for (name, value) in &snapshot.0 {
            match EnvKey::from_name(name) {
                Some(key) if key.is_shared() => match (state.flag_mut(key), value.as_bool()) {
                    (Some(slot), Some(flag)) => {
                        *slot = flag;
                        merged += 1;
                    }
                    _ => debug!("ignoring non-boolean {} in environ", name),
                },
                Some(key) => debug!("environ may not set {}", key.name()),
                None => {
                    state.extras.insert(name.clone(), value.clone());
                    merged += 1;
                }
            }
        }
        merged
    }
}

/// Held while a task owns the microphone. Dropping it frees the microphone.
#[must_use = "the microphone is released as soon as the guard is dropped"]
pub struct MicrophoneGuard {
    env: Environment,
}

impl Drop for MicrophoneGuard {
    fn drop(&mut self) {
        self.env.state().microphone_free = true;
        self.env.inner.microphone_released.notify_waiters();
    }
}

impl std::fmt::Debug for MicrophoneGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MicrophoneGuard")
    }
}

/// Held while a conversation is being spoken. Dropping it clears `talking`.
#[must_use = "talking ends as soon as the guard is dropped"]
pub struct TalkingGuard {
    env: Environment,
}

impl Drop for TalkingGuard {
    fn drop(&mut self) {
        self.env.state().talking = false;
    }
}

impl std::fmt::Debug for TalkingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TalkingGuard")
    }
}
