//! MEEBO1 Frame Protocol
//!
//! Every envelope crosses the bus as a 7-frame ZMQ multipart message, so the
//! router can dispatch on capability without touching the payload.
//!
//! ## Wire Format
//!
//! ```text
//! Frame 0: Protocol version    "MEEBO1" (6 bytes)
//! Frame 1: Capability          2 bytes (big-endian u16)
//! Frame 2: Content kind        2 bytes (big-endian u16)
//! Frame 3: Message ID          16 bytes (UUID)
//! ─── fixed-width above / variable-width below ───
//! Frame 4: Sender id           UTF-8 string
//! Frame 5: Correlation target  UTF-8 string (endpoint to reply to, or empty)
//! Frame 6: Payload             bytes (interpretation per content kind)
//! ```
//!
//! Anything in front of the "MEEBO1" marker is ignored, which keeps the
//! format usable behind sockets that prepend routing frames.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::envelope::Envelope;

/// Protocol version - bump on breaking changes
pub const PROTOCOL_VERSION: &[u8] = b"MEEBO1";

/// Number of frames in a MEEBO1 message
pub const FRAME_COUNT: usize = 7;

/// What an envelope is about. Selects the handler on both ends.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Client (re)joins and asks for the current mode flags
    Connect = 0x0001,
    /// Motion frame or recognized-visitor event, and the brain's detection report
    Motion = 0x0002,
    /// Dialogue requests, captured speech, and chat replies
    Voice = 0x0003,
    /// Doorbell press
    Button = 0x0004,
    /// On-demand camera frame, handled like motion
    Camera = 0x0005,
    /// Environment snapshot pushed from brain to client
    Environ = 0x0006,
}

impl Capability {
    pub fn from_u16(value: u16) -> Result<Self, FrameError> {
        match value {
            0x0001 => Ok(Capability::Connect),
            0x0002 => Ok(Capability::Motion),
            0x0003 => Ok(Capability::Voice),
            0x0004 => Ok(Capability::Button),
            0x0005 => Ok(Capability::Camera),
            0x0006 => Ok(Capability::Environ),
            other => Err(FrameError::InvalidCapability(other)),
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Connect => "connect",
            Capability::Motion => "motion",
            Capability::Voice => "voice",
            Capability::Button => "button",
            Capability::Camera => "camera",
            Capability::Environ => "environ",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the payload bytes are encoded.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// UTF-8 JSON object
    Json = 0x0001,
    /// Base64 text of a compressed image
    Image = 0x0002,
    /// Raw waveform bytes
    Audio = 0x0003,
    /// Plain UTF-8
    Text = 0x0004,
}

impl ContentKind {
    pub fn from_u16(value: u16) -> Result<Self, FrameError> {
        match value {
            0x0001 => Ok(ContentKind::Json),
            0x0002 => Ok(ContentKind::Image),
            0x0003 => Ok(ContentKind::Audio),
            0x0004 => Ok(ContentKind::Text),
            other => Err(FrameError::InvalidContentKind(other)),
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Json => "json",
            ContentKind::Image => "image",
            ContentKind::Audio => "audio",
            ContentKind::Text => "text",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors during frame parsing. Any of these makes a message malformed.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid protocol version: expected MEEBO1")]
    InvalidProtocol,
    #[error("Missing frame: {0}")]
    MissingFrame(&'static str),
    #[error("Invalid capability: {0:#06x}")]
    InvalidCapability(u16),
    #[error("Invalid content kind: {0:#06x}")]
    InvalidContentKind(u16),
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("Invalid UUID in message ID")]
    InvalidUuid,
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
}

fn read_u16(frame: &Bytes) -> Result<u16, FrameError> {
    if frame.len() < 2 {
        return Err(FrameError::FrameTooShort {
            expected: 2,
            actual: frame.len(),
        });
    }
    Ok(u16::from_be_bytes([frame[0], frame[1]]))
}

fn read_utf8(frame: &Bytes, what: &'static str) -> Result<String, FrameError> {
    std::str::from_utf8(frame)
        .map(str::to_string)
        .map_err(|_| FrameError::InvalidUtf8(what))
}

impl Envelope {
    /// Parse a list of frame bytes into an Envelope.
    ///
    /// Scans for the MEEBO1 marker first, so routing prefixes are skipped.
    pub fn from_frames(frames: &[Bytes]) -> Result<Self, FrameError> {
        let proto_idx = frames
            .iter()
            .position(|f| f.as_ref() == PROTOCOL_VERSION)
            .ok_or(FrameError::InvalidProtocol)?;

        let frames = &frames[proto_idx..];
        if frames.len() < FRAME_COUNT {
            return Err(FrameError::MissingFrame("insufficient frames after MEEBO1"));
        }

        let capability = Capability::from_u16(read_u16(&frames[1])?)?;
        let content_kind = ContentKind::from_u16(read_u16(&frames[2])?)?;

        let id_frame = &frames[3];
        if id_frame.len() < 16 {
            return Err(FrameError::FrameTooShort {
                expected: 16,
                actual: id_frame.len(),
            });
        }
        let id = Uuid::from_slice(&id_frame[..16]).map_err(|_| FrameError::InvalidUuid)?;

        let sender = read_utf8(&frames[4], "sender")?;
        let reply_to = read_utf8(&frames[5], "correlation target")?;

        Ok(Envelope {
            id,
            sender,
            capability,
            content_kind,
            payload: frames[6].clone(),
            reply_to,
        })
    }

    /// Serialize to a list of frame bytes (7 frames)
    pub fn to_frames(&self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(FRAME_COUNT);

        frames.push(Bytes::from_static(PROTOCOL_VERSION));

        let mut cap_buf = BytesMut::with_capacity(2);
        cap_buf.put_u16(self.capability.to_u16());
        frames.push(cap_buf.freeze());

        let mut kind_buf = BytesMut::with_capacity(2);
        kind_buf.put_u16(self.content_kind.to_u16());
        frames.push(kind_buf.freeze());

        frames.push(Bytes::copy_from_slice(self.id.as_bytes()));
        frames.push(Bytes::from(self.sender.clone()));
        frames.push(Bytes::from(self.reply_to.clone()));
        frames.push(self.payload.clone());

        frames
    }
}
