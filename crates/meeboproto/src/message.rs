//! Typed payloads carried inside envelopes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Face recognizers label faces they cannot place with this.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// JSON request on the voice capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum VoiceRequest {
    /// Resolve a dialogue key and send back the traversal.
    #[serde(rename = "getChat")]
    GetChat {
        #[serde(rename = "chatItem")]
        chat_item: String,
    },
}

impl VoiceRequest {
    pub fn get_chat(key: impl Into<String>) -> Self {
        VoiceRequest::GetChat {
            chat_item: key.into(),
        }
    }
}

/// One spoken line of a traversal, as it crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub text: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub next: String,
}

/// JSON reply on the voice capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum VoiceReply {
    #[serde(rename = "chat")]
    Chat(ChatReply),
}

/// A resolved traversal plus the branch it stopped at, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatReply {
    pub list: Vec<ChatLine>,
    /// Raw `token-key|token-key` candidates the client answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl ChatReply {
    /// A reply that just says one thing.
    pub fn say(text: impl Into<String>) -> Self {
        Self {
            list: vec![ChatLine {
                text: text.into(),
                action: String::new(),
                next: String::new(),
            }],
            branch: None,
        }
    }
}

/// JSON request on the motion capability: a visitor the client already knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionRequest {
    pub recognized: String,
}

/// What the brain saw in a frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Class name to count, e.g. {"person": 2, "dog": 1}
    #[serde(default)]
    pub counts: BTreeMap<String, u32>,
    /// One entry per face; unplaced faces are "unknown".
    #[serde(default)]
    pub identities: Vec<String>,
}

impl DetectionReport {
    pub fn person_count(&self) -> u32 {
        self.counts.get("person").copied().unwrap_or(0)
    }

    /// Identities with the "unknown" placeholders filtered out, in report order.
    pub fn known_identities(&self) -> impl Iterator<Item = &str> {
        self.identities
            .iter()
            .map(String::as_str)
            .filter(|id| !id.eq_ignore_ascii_case(UNKNOWN_IDENTITY) && !id.is_empty())
    }
}

/// JSON request on the button capability. Empty fields defer to the brain's config.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ButtonPress {
    #[serde(default)]
    pub audio: String,
    #[serde(default)]
    pub voice: String,
}

/// Shareable Environment keys, as exchanged on connect and environ.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironSnapshot(pub BTreeMap<String, serde_json::Value>);

impl EnvironSnapshot {
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.0.insert(name.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn get_chat_wire_shape() {
        let request = VoiceRequest::get_chat("SECURITY-0");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"action": "getChat", "chatItem": "SECURITY-0"})
        );
    }

    #[test]
    fn chat_reply_wire_shape() {
        let reply = VoiceReply::Chat(ChatReply {
            list: vec![ChatLine {
                text: "Are you here for a delivery?".into(),
                action: "yesNo".into(),
                next: "YES-DELIV-1|NO-DELIV-2".into(),
            }],
            branch: Some("YES-DELIV-1|NO-DELIV-2".into()),
        });
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["action"], "chat");
        assert_eq!(value["list"][0]["action"], "yesNo");
        assert_eq!(value["branch"], "YES-DELIV-1|NO-DELIV-2");

        let back: VoiceReply = serde_json::from_value(value).unwrap();
        assert_eq!(back, reply);
    }

    #[test]
    fn chat_reply_without_branch_omits_it() {
        let value = serde_json::to_value(VoiceReply::Chat(ChatReply::say("Hello"))).unwrap();
        assert!(value.get("branch").is_none());
    }

    #[test]
    fn known_identities_drop_unknown() {
        let report = DetectionReport {
            counts: [("person".to_string(), 2)].into_iter().collect(),
            identities: vec!["alice".into(), "unknown".into(), "Unknown".into()],
        };
        assert_eq!(report.person_count(), 2);
        assert_eq!(report.known_identities().collect::<Vec<_>>(), vec!["alice"]);
    }

    #[test]
    fn missing_person_count_is_zero() {
        let report: DetectionReport = serde_json::from_value(json!({"counts": {"cat": 1}})).unwrap();
        assert_eq!(report.person_count(), 0);
        assert!(report.identities.is_empty());
    }
}
