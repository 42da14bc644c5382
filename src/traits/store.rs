use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Image and audio name index loaded from storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetLists {
    pub images: Vec<String>,
    pub audio: Vec<String>,
}

/// Asset storage collaborator.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Reload the asset name index. May be called while idle or
    /// mid-interaction; it never touches interaction state.
    async fn refresh_asset_lists(&self) -> Result<AssetLists>;
}

/// One interaction's script within a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionScript {
    pub id: String,
    /// Line spoken when the interaction starts.
    pub greeting: Option<String>,
    /// Recognized intent -> follow-up interaction id.
    pub on_intent: HashMap<String, String>,
}

/// Loadable content for one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationScript {
    pub id: String,
    pub default_interaction: String,
    pub interactions: Vec<InteractionScript>,
    /// Line spoken before `ConversationEnded` when a stop requests speech.
    pub farewell: Option<String>,
}

impl ConversationScript {
    pub fn interaction(&self, id: &str) -> Option<&InteractionScript> {
        self.interactions.iter().find(|i| i.id == id)
    }
}

/// Conversation/content storage collaborator.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Resolve a conversation id to its script. `None` id means the
    /// store's default conversation. A `None` result is reported by the
    /// engine as a not-found failure.
    async fn resolve(&self, conversation_id: Option<&str>) -> Result<Option<ConversationScript>>;
}
