use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{ConversationNotice, EventChannels};
use crate::dispatcher::{speak_with_events, SpeechSession};
use crate::error::EngineError;
use crate::state::{CharacterState, Interaction};
use crate::traits::{ContentStore, ConversationScript, SpeechPipeline};

#[derive(Debug, Default)]
struct MachineInner {
    live: Option<CharacterState>,
    previous: Option<CharacterState>,
    at_animation_start: Option<CharacterState>,
    current: Option<Interaction>,
    script: Option<ConversationScript>,
}

/// Owner of the current interaction and the three character-state views.
///
/// Every transition runs under the engine's single transition mutex, which
/// the facade also holds across trigger admission, so "at most one current
/// interaction" and the pause semantics cannot race. The state views live
/// behind an `RwLock`: the machine is the only writer, readers always see
/// a consistent snapshot.
pub struct InteractionMachine {
    channels: Arc<EventChannels>,
    content: Arc<dyn ContentStore>,
    speech: Arc<dyn SpeechPipeline>,
    op: Arc<Mutex<()>>,
    session: Arc<SpeechSession>,
    inner: RwLock<MachineInner>,
}

impl InteractionMachine {
    pub(crate) fn new(
        channels: Arc<EventChannels>,
        content: Arc<dyn ContentStore>,
        speech: Arc<dyn SpeechPipeline>,
        op: Arc<Mutex<()>>,
        session: Arc<SpeechSession>,
    ) -> Self {
        Self {
            channels,
            content,
            speech,
            op,
            session,
            inner: RwLock::new(MachineInner::default()),
        }
    }

    /// Establish the live baseline state. Called from `initialize`; the
    /// frozen views start out equal to the baseline.
    pub(crate) fn reset_baseline(&self, state: CharacterState) {
        let mut inner = self.inner.write().unwrap();
        inner.previous = Some(state.clone());
        inner.at_animation_start = Some(state.clone());
        inner.live = Some(state);
        inner.current = None;
        inner.script = None;
    }

    /// The live state. `None` before initialize.
    pub fn current_state(&self) -> Option<CharacterState> {
        self.inner.read().unwrap().live.clone()
    }

    /// State captured when the last interaction completed.
    pub fn previous_state(&self) -> Option<CharacterState> {
        self.inner.read().unwrap().previous.clone()
    }

    /// State captured when the current interaction's behavior began.
    pub fn state_at_animation_start(&self) -> Option<CharacterState> {
        self.inner.read().unwrap().at_animation_start.clone()
    }

    /// The current interaction, if a conversation is active.
    pub fn current_interaction(&self) -> Option<Interaction> {
        self.inner.read().unwrap().current.clone()
    }

    /// Follow-up interaction the current script maps `intent` to, if any.
    pub(crate) fn next_interaction_for_intent(&self, intent: &str) -> Option<String> {
        let inner = self.inner.read().unwrap();
        let current = inner.current.as_ref()?;
        let script = inner.script.as_ref()?;
        script
            .interaction(&current.id)
            .and_then(|i| i.on_intent.get(intent).cloned())
    }

    pub(crate) fn record_intent(&self, intent: &str) {
        let mut inner = self.inner.write().unwrap();
        if let Some(live) = inner.live.as_mut() {
            live.last_intent = Some(intent.to_string());
            live.touch();
        }
    }

    pub(crate) fn set_listening(&self, listening: bool) {
        let mut inner = self.inner.write().unwrap();
        if let Some(live) = inner.live.as_mut() {
            live.listening = listening;
            live.touch();
        }
    }

    pub(crate) fn set_speaking(&self, speaking: bool) {
        let mut inner = self.inner.write().unwrap();
        if let Some(live) = inner.live.as_mut() {
            live.speaking = speaking;
            live.touch();
        }
    }

    pub(crate) fn set_volume(&self, volume: u8) {
        let mut inner = self.inner.write().unwrap();
        if let Some(live) = inner.live.as_mut() {
            live.volume = volume;
            live.touch();
        }
    }

    fn live_volume(&self) -> u8 {
        self.inner
            .read()
            .unwrap()
            .live
            .as_ref()
            .map(|l| l.volume)
            .unwrap_or(0)
    }

    /// Start a conversation and its first interaction.
    ///
    /// `cancel` is honored at exactly one suspension point: after
    /// `ConversationStarted` and before the interaction begins. Once
    /// `InteractionStarted` has been raised the call runs to completion.
    pub async fn start_conversation(
        &self,
        conversation_id: Option<&str>,
        interaction_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let _permit = self.op.lock().await;
        if let Some(current) = self.inner.read().unwrap().current.as_ref() {
            return Err(EngineError::AlreadyActive(current.conversation_id.clone()));
        }

        let script = self
            .content
            .resolve(conversation_id)
            .await
            .map_err(|e| EngineError::collaborator("resolve conversation", e))?
            .ok_or_else(|| EngineError::NotFound {
                kind: "conversation",
                id: conversation_id.unwrap_or("default").to_string(),
            })?;
        let start_id = interaction_id
            .unwrap_or(&script.default_interaction)
            .to_string();
        if script.interaction(&start_id).is_none() {
            return Err(EngineError::NotFound {
                kind: "interaction",
                id: start_id,
            });
        }

        info!(conversation = %script.id, "conversation started");
        {
            let mut inner = self.inner.write().unwrap();
            if let Some(live) = inner.live.as_mut() {
                live.conversation_id = Some(script.id.clone());
                live.touch();
            }
            inner.script = Some(script.clone());
        }
        self.channels.conversation_started.publish(&ConversationNotice {
            conversation_id: script.id.clone(),
        });

        if cancel.is_cancelled() {
            // Unwind before the interaction begins; pair the start notice.
            warn!(conversation = %script.id, "start cancelled before interaction");
            {
                let mut inner = self.inner.write().unwrap();
                if let Some(live) = inner.live.as_mut() {
                    live.conversation_id = None;
                    live.touch();
                }
                inner.script = None;
            }
            self.channels.conversation_ended.publish(&ConversationNotice {
                conversation_id: script.id,
            });
            return Err(EngineError::Cancelled);
        }

        self.begin_interaction(&start_id).await;
        Ok(())
    }

    /// End the current interaction (if any), optionally speak a farewell,
    /// then end the conversation. A no-op while idle.
    pub async fn stop_conversation(&self, speak: Option<&str>) -> Result<(), EngineError> {
        let _permit = self.op.lock().await;
        self.stop_locked(speak, true).await
    }

    /// Dispose path: force idle without any farewell.
    pub(crate) async fn force_idle(&self) {
        let _permit = self.op.lock().await;
        let _ = self.stop_locked(None, false).await;
    }

    async fn stop_locked(&self, speak: Option<&str>, farewell: bool) -> Result<(), EngineError> {
        let (conversation_id, script_farewell) = {
            let inner = self.inner.read().unwrap();
            match inner.live.as_ref().and_then(|l| l.conversation_id.clone()) {
                Some(id) => (id, inner.script.as_ref().and_then(|s| s.farewell.clone())),
                None => {
                    debug!("stop requested while idle; nothing to do");
                    return Ok(());
                }
            }
        };

        self.end_current_interaction();
        if farewell {
            let line = speak.map(str::to_string).or(script_farewell);
            if let Some(text) = line {
                self.set_speaking(true);
                speak_with_events(
                    &self.channels,
                    self.speech.as_ref(),
                    &self.session,
                    &text,
                    self.live_volume(),
                )
                .await;
                self.set_speaking(false);
            }
        }
        {
            let mut inner = self.inner.write().unwrap();
            if let Some(live) = inner.live.as_mut() {
                live.conversation_id = None;
                live.touch();
            }
            inner.script = None;
        }
        info!(conversation = %conversation_id, "conversation ended");
        self.channels
            .conversation_ended
            .publish(&ConversationNotice { conversation_id });
        Ok(())
    }

    /// Re-enter the current interaction's start behavior without leaving
    /// the conversation. A no-op while idle.
    pub async fn restart_current_interaction(
        &self,
        interrupt_audio: bool,
    ) -> Result<(), EngineError> {
        let _permit = self.op.lock().await;
        let id = match self.inner.read().unwrap().current.as_ref() {
            Some(current) => current.id.clone(),
            None => {
                warn!("restart requested with no current interaction");
                return Ok(());
            }
        };
        if interrupt_audio {
            // Fire-and-continue; an interrupted playback still raises its
            // stop notice, with the cancellation flag set.
            if !self.session.interrupt() {
                self.speech.cancel_speech().await;
            }
        }
        debug!(interaction = %id, "restarting current interaction");
        let restarted = {
            let mut inner = self.inner.write().unwrap();
            let conversation_id = inner.current.as_ref().map(|c| c.conversation_id.clone());
            let restarted = Interaction::begin(id, conversation_id.unwrap_or_default());
            inner.current = Some(restarted.clone());
            if let Some(live) = inner.live.as_mut() {
                live.touch();
            }
            inner.at_animation_start = inner.live.clone();
            restarted
        };
        self.channels.interaction_started.publish(&restarted);
        self.speak_greeting(&restarted.id).await;
        Ok(())
    }

    /// Advance to another interaction in the current script. The caller
    /// must already hold the transition mutex.
    pub(crate) async fn advance_locked(&self, interaction_id: &str) -> Result<(), EngineError> {
        let known = {
            let inner = self.inner.read().unwrap();
            inner
                .script
                .as_ref()
                .map(|s| s.interaction(interaction_id).is_some())
                .unwrap_or(false)
        };
        if !known {
            return Err(EngineError::NotFound {
                kind: "interaction",
                id: interaction_id.to_string(),
            });
        }
        self.end_current_interaction();
        self.begin_interaction(interaction_id).await;
        Ok(())
    }

    /// Exactly one `InteractionEnded` for the old interaction, with
    /// `PreviousState` captured first.
    fn end_current_interaction(&self) {
        let ended = {
            let mut inner = self.inner.write().unwrap();
            let Some(mut ended) = inner.current.take() else {
                return;
            };
            inner.previous = inner.live.clone();
            ended.running = false;
            if let Some(live) = inner.live.as_mut() {
                live.interaction_id = None;
                live.touch();
            }
            ended
        };
        debug!(interaction = %ended.id, "interaction ended");
        self.channels.interaction_ended.publish(&ended);
    }

    async fn begin_interaction(&self, interaction_id: &str) {
        let started = {
            let mut inner = self.inner.write().unwrap();
            let conversation_id = inner
                .script
                .as_ref()
                .map(|s| s.id.clone())
                .unwrap_or_default();
            let started = Interaction::begin(interaction_id, conversation_id);
            if let Some(live) = inner.live.as_mut() {
                live.interaction_id = Some(started.id.clone());
                live.touch();
            }
            inner.current = Some(started.clone());
            inner.at_animation_start = inner.live.clone();
            started
        };
        info!(interaction = %started.id, "interaction started");
        self.channels.interaction_started.publish(&started);
        self.speak_greeting(interaction_id).await;
    }

    async fn speak_greeting(&self, interaction_id: &str) {
        let greeting = {
            let inner = self.inner.read().unwrap();
            inner
                .script
                .as_ref()
                .and_then(|s| s.interaction(interaction_id))
                .and_then(|i| i.greeting.clone())
        };
        if let Some(text) = greeting {
            self.set_speaking(true);
            speak_with_events(
                &self.channels,
                self.speech.as_ref(),
                &self.session,
                &text,
                self.live_volume(),
            )
            .await;
            self.set_speaking(false);
        }
    }
}
