//! Sensor events and how they travel to the brain.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use meeboproto::{ButtonPress, Capability, Envelope, MotionRequest, PayloadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Motion,
    /// Motion while a remembered visitor is still at the door.
    Recognized,
    Hotword,
    Button,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Image(Bytes),
    Identity(String),
    Audio(Bytes),
    Press(ButtonPress),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    pub captured_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl SensorEvent {
    pub fn motion(jpeg: Bytes) -> Self {
        Self::now(EventPayload::Image(jpeg))
    }

    pub fn recognized(identity: impl Into<String>) -> Self {
        Self::now(EventPayload::Identity(identity.into()))
    }

    pub fn hotword(wav: Bytes) -> Self {
        Self::now(EventPayload::Audio(wav))
    }

    pub fn button() -> Self {
        Self::now(EventPayload::Press(ButtonPress::default()))
    }

    fn now(payload: EventPayload) -> Self {
        Self {
            captured_at: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Image(_) => EventKind::Motion,
            EventPayload::Identity(_) => EventKind::Recognized,
            EventPayload::Audio(_) => EventKind::Hotword,
            EventPayload::Press(_) => EventKind::Button,
        }
    }

    /// Wrap for the bus, asking for answers at `reply_to`.
    pub fn into_envelope(self, sender: &str, reply_to: &str) -> Result<Envelope, PayloadError> {
        let envelope = match self.payload {
            EventPayload::Image(jpeg) => Envelope::image(Capability::Motion, sender, &jpeg),
            EventPayload::Identity(recognized) => {
                Envelope::json(Capability::Motion, sender, &MotionRequest { recognized })?
            }
            EventPayload::Audio(wav) => Envelope::audio(Capability::Voice, sender, wav),
            EventPayload::Press(press) => Envelope::json(Capability::Button, sender, &press)?,
        };
        Ok(envelope.with_reply_to(reply_to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meeboproto::ContentKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn each_kind_has_its_wire_shape() {
        let motion = SensorEvent::motion(Bytes::from_static(b"jpeg"))
            .into_envelope("FrontDoor", "tcp://door:5671")
            .unwrap();
        assert_eq!((motion.capability, motion.content_kind), (Capability::Motion, ContentKind::Image));
        assert_eq!(motion.reply_to, "tcp://door:5671");
        assert_eq!(motion.image_bytes().unwrap(), b"jpeg".to_vec());

        let recognized = SensorEvent::recognized("alice").into_envelope("FrontDoor", "r").unwrap();
        assert_eq!((recognized.capability, recognized.content_kind), (Capability::Motion, ContentKind::Json));
        assert_eq!(
            recognized.decode_json::<MotionRequest>().unwrap(),
            MotionRequest {
                recognized: "alice".into()
            }
        );

        let hotword = SensorEvent::hotword(Bytes::from_static(b"RIFF")).into_envelope("FrontDoor", "r").unwrap();
        assert_eq!((hotword.capability, hotword.content_kind), (Capability::Voice, ContentKind::Audio));

        let button = SensorEvent::button().into_envelope("FrontDoor", "r").unwrap();
        assert_eq!(button.capability, Capability::Button);
        assert_eq!(button.decode_json::<ButtonPress>().unwrap(), ButtonPress::default());
    }

    #[test]
    fn kind_follows_payload() {
        assert_eq!(SensorEvent::recognized("bob").kind(), EventKind::Recognized);
        assert_eq!(SensorEvent::button().kind(), EventKind::Button);
    }
}
