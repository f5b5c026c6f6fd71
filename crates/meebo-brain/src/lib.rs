//! The Meebo brain.
//!
//! Clients push motion frames, speech and button presses; the brain answers
//! each one on the sender's reply endpoint with a detection report or a chat.
//!
//! - [`router`]: the consuming loop and its handlers
//! - [`capability`]: detector, recognizer, transcriber, intents and player seams
//! - [`snapshot`]: per-client archive of motion frames

pub mod capability;
pub mod router;
pub mod snapshot;
pub mod telemetry;

pub use capability::{
    AudioPlayer, Capabilities, CapabilityError, CommandCapability, CommandPlayer, FaceRecognizer,
    IntentClassifier, ObjectDetector, PatternIntents, Transcriber, Unavailable,
};
pub use router::{chat_reply, Router, RouterSettings};
pub use snapshot::SnapshotArchive;
