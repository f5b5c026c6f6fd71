//! The envelope every event and reply travels in.

use base64::Engine as _;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::frame::{Capability, ContentKind};

/// Errors reading or building a payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Content kind mismatch: expected {expected:?}, got {actual:?}")]
    KindMismatch {
        expected: ContentKind,
        actual: ContentKind,
    },
    #[error("JSON payload error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Base64 image payload error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Text payload is not valid UTF-8")]
    Utf8,
}

/// One message on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: Uuid,
    pub sender: String,
    pub capability: Capability,
    pub content_kind: ContentKind,
    pub payload: Bytes,
    /// Endpoint the receiver should answer on. Empty when no answer is wanted.
    pub reply_to: String,
}

impl Envelope {
    pub fn new(
        capability: Capability,
        content_kind: ContentKind,
        sender: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            capability,
            content_kind,
            payload,
            reply_to: String::new(),
        }
    }

    /// JSON payload from any serializable value.
    pub fn json<T: Serialize>(
        capability: Capability,
        sender: impl Into<String>,
        value: &T,
    ) -> Result<Self, PayloadError> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(capability, ContentKind::Json, sender, Bytes::from(body)))
    }

    /// Image payload; the compressed bytes are base64-encoded for the wire.
    pub fn image(capability: Capability, sender: impl Into<String>, jpeg: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
        Self::new(capability, ContentKind::Image, sender, Bytes::from(encoded))
    }

    pub fn audio(capability: Capability, sender: impl Into<String>, wav: Bytes) -> Self {
        Self::new(capability, ContentKind::Audio, sender, wav)
    }

    pub fn text(capability: Capability, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(capability, ContentKind::Text, sender, Bytes::from(text.into()))
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = reply_to.into();
        self
    }

    fn expect_kind(&self, expected: ContentKind) -> Result<(), PayloadError> {
        if self.content_kind != expected {
            return Err(PayloadError::KindMismatch {
                expected,
                actual: self.content_kind,
            });
        }
        Ok(())
    }

    /// Decode a JSON payload (checks content kind).
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        self.expect_kind(ContentKind::Json)?;
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Decoded image bytes (checks content kind).
    pub fn image_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        self.expect_kind(ContentKind::Image)?;
        // Tolerate trailing newlines from line-oriented producers.
        let trimmed = self.payload.trim_ascii();
        Ok(base64::engine::general_purpose::STANDARD.decode(trimmed)?)
    }

    pub fn audio_bytes(&self) -> Result<&Bytes, PayloadError> {
        self.expect_kind(ContentKind::Audio)?;
        Ok(&self.payload)
    }

    pub fn as_text(&self) -> Result<&str, PayloadError> {
        self.expect_kind(ContentKind::Text)?;
        std::str::from_utf8(&self.payload).map_err(|_| PayloadError::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ButtonPress;

    #[test]
    fn image_is_base64_on_the_wire() {
        let jpeg = [0xffu8, 0xd8, 0xff, 0xe0, 0x00];
        let envelope = Envelope::image(Capability::Motion, "Porch", &jpeg);

        assert_eq!(envelope.payload.as_ref(), b"/9j/4AA=");
        assert_eq!(envelope.image_bytes().unwrap(), jpeg.to_vec());
    }

    #[test]
    fn json_decode_checks_kind() {
        let envelope = Envelope::text(Capability::Button, "Porch", "{}");
        let result: Result<ButtonPress, _> = envelope.decode_json();
        assert!(matches!(
            result,
            Err(PayloadError::KindMismatch {
                expected: ContentKind::Json,
                actual: ContentKind::Text,
            })
        ));
    }

    #[test]
    fn garbage_json_is_an_error_not_a_panic() {
        let envelope = Envelope::new(
            Capability::Voice,
            ContentKind::Json,
            "Porch",
            Bytes::from_static(b"{not json"),
        );
        let result: Result<serde_json::Value, _> = envelope.decode_json();
        assert!(matches!(result, Err(PayloadError::Json(_))));
    }

    #[test]
    fn every_envelope_gets_a_fresh_id() {
        let a = Envelope::text(Capability::Voice, "Porch", "a");
        let b = Envelope::text(Capability::Voice, "Porch", "a");
        assert_ne!(a.id, b.id);
        assert!(a.reply_to.is_empty());
    }
}
