//! Wire protocol and shared state for the Meebo doorbell bus.
//!
//! - [`frame`]: MEEBO1 multipart framing, capabilities and content kinds
//! - [`envelope`]: the message every event and reply travels in
//! - [`message`]: typed JSON payloads
//! - [`environ`]: the per-process Environment store
//! - [`transport`]: publish/receive seams, retry policy, in-memory bus
//! - [`zmq`]: PUSH/PULL transport over tmq (feature `zmq`)

pub mod environ;
pub mod envelope;
pub mod frame;
pub mod message;
pub mod transport;

#[cfg(feature = "zmq")]
pub mod zmq;

pub use environ::{
    deadline_after, Cooldown, EnvError, EnvKey, EnvValue, Environment, EnvironmentSeed,
    MicrophoneGuard, TalkingGuard,
};
pub use envelope::{Envelope, PayloadError};
pub use frame::{Capability, ContentKind, FrameError, FRAME_COUNT, PROTOCOL_VERSION};
pub use message::{
    ButtonPress, ChatLine, ChatReply, DetectionReport, EnvironSnapshot, MotionRequest,
    VoiceReply, VoiceRequest, UNKNOWN_IDENTITY,
};
pub use transport::{
    Connector, Inbound, MemoryBus, MemoryInbound, MemoryPublisher, Outbound, ReplyPublishers,
    TransportError, TransportPolicy, DEFAULT_REPLY_PUBLISHERS,
};
