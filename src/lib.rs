//! Interaction orchestration engine for an autonomous robot character.
//!
//! Sensor, voice, and conversational events arrive as [`RawEvent`]s, are
//! normalized into [`TriggerData`], admitted (or not) by the
//! [`TriggerGate`]'s pause/override rules, and drive a single active
//! [`Interaction`] through its lifecycle. The [`Character`] facade composes
//! the pieces and exposes the command surface and the multicast
//! notification channels skill code subscribes to.

pub mod bus;
pub mod character;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod machine;
pub mod state;
pub mod traits;
pub mod trigger;

pub use bus::{EventChannels, Multicast, SubscriptionToken};
pub use character::Character;
pub use config::CharacterConfig;
pub use error::EngineError;
pub use gate::{GateDecision, TriggerGate};
pub use machine::InteractionMachine;
pub use state::{CharacterState, Interaction};
pub use traits::{
    AssetLists, AssetStore, ContentStore, ConversationScript, InteractionScript, SpeechPipeline,
};
pub use trigger::{normalize, RawEvent, TriggerData, TriggerSource};
