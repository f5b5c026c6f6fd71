//! Side effects a dialogue line can ask the client to perform.

use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Longest pause a `wait(N)` line may ask for.
pub const MAX_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    None,
    /// `wait(N)`: pause N seconds after speaking.
    Wait(Duration),
    /// `yesNo`: listen for a yes/no style answer.
    YesNo,
    /// `listen`: listen for a free-form answer.
    Listen,
    /// `pauseListen`: keep the microphone quiet for a moment.
    PauseListen,
}

impl Action {
    /// Parse an action name. Names this build doesn't know are logged and ignored.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Action::None;
        }

        if let Some(arg) = raw
            .strip_prefix("wait(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let pause = arg
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .filter(|pause| *pause <= MAX_WAIT);
            return match pause {
                Some(pause) => Action::Wait(pause),
                None => {
                    warn!("ignoring wait action with bad duration: {:?}", raw);
                    Action::None
                }
            };
        }

        match raw.to_ascii_lowercase().as_str() {
            "yesno" => Action::YesNo,
            "listen" => Action::Listen,
            "pauselisten" => Action::PauseListen,
            _ => {
                warn!("ignoring unknown dialogue action {:?}", raw);
                Action::None
            }
        }
    }

    /// Actions that end with a captured response.
    pub fn captures_response(&self) -> bool {
        matches!(self, Action::YesNo | Action::Listen)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::None => Ok(()),
            Action::Wait(d) => write!(f, "wait({})", d.as_secs_f64()),
            Action::YesNo => f.write_str("yesNo"),
            Action::Listen => f.write_str("listen"),
            Action::PauseListen => f.write_str("pauseListen"),
        }
    }
}
