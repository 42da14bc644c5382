use anyhow::Result;
use async_trait::async_trait;

/// Speech pipeline collaborator: audio capture, speech-to-text, and
/// text-to-speech playback.
///
/// The engine treats failures as data, not as fatal: an error from any
/// method surfaces as a failure payload on the matching completion event.
/// Timeouts are the pipeline's responsibility, not the engine's.
#[async_trait]
pub trait SpeechPipeline: Send + Sync {
    /// Record one utterance worth of audio.
    async fn capture_audio(&self) -> Result<Vec<u8>>;

    /// Transcribe a captured clip.
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;

    /// Play `text` at `volume`. Resolves once playback completes.
    async fn speak(&self, text: &str, volume: u8) -> Result<()>;

    /// Request cancellation of any in-flight playback. Fire-and-continue;
    /// the pending `speak` call still resolves on its own.
    async fn cancel_speech(&self);
}
