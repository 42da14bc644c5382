mod speech;
mod store;

pub use speech::SpeechPipeline;
pub use store::{AssetLists, AssetStore, ContentStore, ConversationScript, InteractionScript};
