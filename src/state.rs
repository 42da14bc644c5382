use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Point-in-time snapshot of the character's status.
///
/// The engine keeps three views of this record: the live state (the only
/// one that mutates), the state captured when the last interaction
/// completed, and the state captured when the current interaction's
/// behavior began. The frozen views are taken by value and never touched
/// again, so readers can hold them without observing later mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    /// Playback volume, already clamped to the device range.
    pub volume: u8,
    /// Id of the active conversation, if any.
    pub conversation_id: Option<String>,
    /// Script id of the current interaction, if any.
    pub interaction_id: Option<String>,
    /// Whether a listening cycle is in flight.
    pub listening: bool,
    /// Whether speech playback is in flight.
    pub speaking: bool,
    /// The most recently dispatched speech intent.
    pub last_intent: Option<String>,
    /// When this record was last written.
    pub taken_at: DateTime<Utc>,
}

impl CharacterState {
    /// Valid baseline established by `Character::initialize`.
    pub fn baseline(volume: u8) -> Self {
        Self {
            volume,
            conversation_id: None,
            interaction_id: None,
            listening: false,
            speaking: false,
            last_intent: None,
            taken_at: Utc::now(),
        }
    }

    /// Stamp the record after a mutation.
    pub(crate) fn touch(&mut self) {
        self.taken_at = Utc::now();
    }
}

/// One unit of scripted behavior within a conversation.
///
/// At most one interaction is current at any time; starting a new one ends
/// the previous one first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Script id, stable across restarts of the same interaction.
    pub id: String,
    /// Per-run instance id; a restart issues a fresh one.
    pub instance: Uuid,
    /// Id of the owning conversation.
    pub conversation_id: String,
    /// `false` once the interaction has ended.
    pub running: bool,
    /// When this instance began.
    pub started_at: DateTime<Utc>,
}

impl Interaction {
    pub(crate) fn begin(id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instance: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            running: true,
            started_at: Utc::now(),
        }
    }
}
