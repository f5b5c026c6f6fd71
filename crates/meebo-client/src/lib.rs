//! The Meebo doorbell client.
//!
//! Sensor producers push motion frames, speech and button presses to the
//! brain; the reactor speaks whatever the brain answers and asks for the next
//! dialogue when the visitor responds.

pub mod capability;
pub mod conversation;
pub mod event;
pub mod outbox;
pub mod producer;
pub mod reactor;
pub mod telemetry;

pub use capability::{
    sentence_case, ButtonInput, CapabilityError, CommandHotword, CommandListener, CommandSpeaker, HotwordDetector, Level,
    LineMotionFeed, MotionCamera, MotionSample, ResponseListener, SensorError, SilentListener, Speaker,
    SysfsButton,
};
pub use conversation::{Conversation, ConversationTiming};
pub use event::{EventKind, EventPayload, SensorEvent};
pub use outbox::Outbox;
pub use producer::{
    spawn_producers, ButtonProducer, HotwordProducer, MotionProducer, ProducerContext, ProducerState, Sensors,
};
pub use reactor::{Reactor, ReactorSettings};
