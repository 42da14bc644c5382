use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bus::EventChannels;
use crate::config::CharacterConfig;
use crate::dispatcher::{ResponseDispatcher, SpeechSession};
use crate::error::EngineError;
use crate::gate::{GateDecision, TriggerGate};
use crate::machine::InteractionMachine;
use crate::state::{CharacterState, Interaction};
use crate::traits::{AssetLists, AssetStore, ContentStore, SpeechPipeline};
use crate::trigger::{normalize, RawEvent, TriggerData};

const CREATED: u8 = 0;
const READY: u8 = 1;
const DISPOSED: u8 = 2;

/// The public face of the interaction engine.
///
/// Composes the trigger gate, the interaction state machine, and the
/// response dispatcher, and owns their lifecycle. Construct one with
/// [`Character::new`], call [`Character::initialize`], then wire sensor
/// transports to [`Character::event_sink`] and listeners to
/// [`Character::channels`].
pub struct Character {
    config: CharacterConfig,
    channels: Arc<EventChannels>,
    gate: Arc<TriggerGate>,
    machine: Arc<InteractionMachine>,
    dispatcher: Arc<ResponseDispatcher>,
    assets: Arc<dyn AssetStore>,
    asset_lists: RwLock<AssetLists>,
    op: Arc<Mutex<()>>,
    lifecycle: AtomicU8,
    intake_tx: StdMutex<Option<mpsc::UnboundedSender<RawEvent>>>,
    intake_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Character {
    pub fn new(
        config: CharacterConfig,
        speech: Arc<dyn SpeechPipeline>,
        assets: Arc<dyn AssetStore>,
        content: Arc<dyn ContentStore>,
    ) -> Arc<Self> {
        let channels = Arc::new(EventChannels::new());
        let op = Arc::new(Mutex::new(()));
        let session = Arc::new(SpeechSession::default());
        let machine = Arc::new(InteractionMachine::new(
            channels.clone(),
            content,
            speech.clone(),
            op.clone(),
            session.clone(),
        ));
        let dispatcher = Arc::new(ResponseDispatcher::new(
            channels.clone(),
            speech,
            machine.clone(),
            session,
        ));
        Arc::new(Self {
            config,
            channels,
            gate: Arc::new(TriggerGate::new()),
            machine,
            dispatcher,
            assets,
            asset_lists: RwLock::new(AssetLists::default()),
            op,
            lifecycle: AtomicU8::new(CREATED),
            intake_tx: StdMutex::new(None),
            intake_task: StdMutex::new(None),
        })
    }

    /// The notification channels listeners subscribe to.
    pub fn channels(&self) -> &EventChannels {
        &self.channels
    }

    fn ensure_ready(&self) -> Result<(), EngineError> {
        match self.lifecycle.load(Ordering::SeqCst) {
            READY => Ok(()),
            DISPOSED => Err(EngineError::Disposed),
            _ => Err(EngineError::NotInitialized),
        }
    }

    /// Bring the character to a valid baseline: load asset lists, establish
    /// the live state, and attach the raw-event intake.
    ///
    /// Returns `false` on any setup failure, with the reason logged.
    pub async fn initialize(self: &Arc<Self>) -> bool {
        self.initialize_cancellable(&CancellationToken::new()).await
    }

    /// [`Character::initialize`] with external cancellation, honored only
    /// before the event intake is attached.
    pub async fn initialize_cancellable(self: &Arc<Self>, cancel: &CancellationToken) -> bool {
        match self.lifecycle.load(Ordering::SeqCst) {
            DISPOSED => {
                error!("initialize called on a disposed character");
                return false;
            }
            READY => {
                debug!("initialize called twice; already ready");
                return true;
            }
            _ => {}
        }
        let lists = match self.assets.refresh_asset_lists().await {
            Ok(lists) => lists,
            Err(err) => {
                error!(%err, "initialize failed: asset lists could not be loaded");
                return false;
            }
        };
        *self.asset_lists.write().unwrap() = lists;
        self.machine
            .reset_baseline(CharacterState::baseline(self.config.default_volume));

        if cancel.is_cancelled() {
            warn!("initialize cancelled before event intake was attached");
            return false;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<RawEvent>();
        let this = self.clone();
        let task = tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                match normalize(raw) {
                    Ok(trigger) => {
                        this.process_trigger(trigger).await;
                    }
                    Err(err) => warn!(%err, "dropping malformed raw event"),
                }
            }
        });
        *self.intake_tx.lock().unwrap() = Some(tx);
        *self.intake_task.lock().unwrap() = Some(task);
        self.lifecycle.store(READY, Ordering::SeqCst);
        info!("character initialized");
        true
    }

    /// Sender that sensor transports push raw events into, from any thread.
    pub fn event_sink(&self) -> Result<mpsc::UnboundedSender<RawEvent>, EngineError> {
        self.ensure_ready()?;
        self.intake_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or(EngineError::NotInitialized)
    }

    /// Queue one raw event for normalization and dispatch.
    pub fn push_event(&self, raw: RawEvent) -> Result<(), EngineError> {
        let sink = self.event_sink()?;
        // The intake task only exits on dispose, so a send failure means
        // the character went away underneath us.
        sink.send(raw).map_err(|_| EngineError::Disposed)
    }

    /// Admit `trigger` through the gate and run the matching dispatch,
    /// all under the single transition critical section.
    async fn process_trigger(&self, trigger: TriggerData) -> GateDecision {
        let _permit = self.op.lock().await;
        let decision = self.gate.admit(&trigger);
        match decision {
            GateDecision::Drop => {
                trace!(source = ?trigger.source, "trigger dropped by gate");
            }
            GateDecision::ObserveOnly => {
                self.dispatcher.dispatch(&trigger, false).await;
            }
            GateDecision::Proceed => {
                if let Some(next) = self.dispatcher.dispatch(&trigger, true).await {
                    if let Err(err) = self.machine.advance_locked(&next).await {
                        // Keep processing subsequent events regardless.
                        warn!(%err, interaction = %next, "intent follow-up failed");
                    }
                }
            }
        }
        decision
    }

    /// Inject a trigger as if it had occurred naturally.
    ///
    /// With `set_as_override_event` the trigger bypasses a paused gate;
    /// without it, it is subject to the ordinary admission rules. Returns
    /// the gate's decision.
    pub async fn simulate_trigger(
        &self,
        mut trigger: TriggerData,
        set_as_override_event: bool,
    ) -> Result<GateDecision, EngineError> {
        self.ensure_ready()?;
        trigger.simulated = true;
        trigger.is_override = set_as_override_event;
        Ok(self.process_trigger(trigger).await)
    }

    /// Suspend trigger handling; see [`TriggerGate::pause`].
    pub fn pause_trigger_handling(
        &self,
        ignore_triggering_events: bool,
    ) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.gate.pause(ignore_triggering_events);
        Ok(())
    }

    /// Resume trigger handling. Events dropped during the pause window are
    /// not replayed.
    pub fn restart_trigger_handling(&self) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.gate.restart();
        Ok(())
    }

    /// Start a conversation and its first interaction.
    pub async fn start_conversation(
        &self,
        conversation_id: Option<&str>,
        interaction_id: Option<&str>,
    ) -> Result<(), EngineError> {
        self.start_conversation_cancellable(conversation_id, interaction_id, &CancellationToken::new())
            .await
    }

    /// [`Character::start_conversation`] with external cancellation,
    /// honored only between conversation start and interaction start.
    pub async fn start_conversation_cancellable(
        &self,
        conversation_id: Option<&str>,
        interaction_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.machine
            .start_conversation(conversation_id, interaction_id, cancel)
            .await
    }

    /// End the current interaction and conversation, optionally speaking
    /// `speak` (or the script's farewell) first. A no-op while idle.
    pub async fn stop_conversation(&self, speak: Option<&str>) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.machine.stop_conversation(speak).await
    }

    /// Re-enter the current interaction's start behavior, optionally
    /// cutting short any in-flight speech.
    pub async fn restart_current_interaction(
        &self,
        interrupt_audio: bool,
    ) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.machine.restart_current_interaction(interrupt_audio).await
    }

    /// Clamp `volume` to the device range and apply it to all subsequent
    /// audio, whatever the interaction state. Returns the applied value.
    pub fn change_volume(&self, volume: i32) -> Result<u8, EngineError> {
        self.ensure_ready()?;
        let clamped = self.config.clamp_volume(volume);
        self.machine.set_volume(clamped);
        debug!(requested = volume, applied = clamped, "volume changed");
        Ok(clamped)
    }

    /// Reload the asset name index. Tolerates being called while idle or
    /// mid-interaction; never touches in-flight interaction state.
    pub async fn refresh_asset_lists(&self) -> Result<(), EngineError> {
        self.ensure_ready()?;
        let lists = self
            .assets
            .refresh_asset_lists()
            .await
            .map_err(|e| EngineError::collaborator("refresh asset lists", e))?;
        *self.asset_lists.write().unwrap() = lists;
        Ok(())
    }

    /// The most recently loaded asset name index.
    pub fn asset_lists(&self) -> AssetLists {
        self.asset_lists.read().unwrap().clone()
    }

    /// Speak `text` through the paired speaking notifications at the
    /// current volume. A playback failure is returned after the stop
    /// notice has been raised with the same detail.
    pub async fn say(&self, text: &str) -> Result<(), EngineError> {
        self.ensure_ready()?;
        match self.dispatcher.say(text).await {
            None => Ok(()),
            Some(err) => Err(EngineError::collaborator("speak", anyhow::anyhow!(err))),
        }
    }

    /// Run one listening cycle; a produced transcript is fed back through
    /// the gate as a voice-processing trigger. Returns the transcript.
    pub async fn listen_once(&self) -> Result<Option<String>, EngineError> {
        self.listen_once_cancellable(&CancellationToken::new()).await
    }

    /// [`Character::listen_once`] with external cancellation; the stop
    /// notices are still raised, flagged as cancelled.
    pub async fn listen_once_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, EngineError> {
        self.ensure_ready()?;
        let transcript = self.dispatcher.listen_once(cancel).await;
        if let Some(text) = &transcript {
            match normalize(RawEvent::VoiceRecord {
                transcript: text.clone(),
            }) {
                Ok(trigger) => {
                    self.process_trigger(trigger).await;
                }
                Err(err) => warn!(%err, "transcript did not normalize"),
            }
        }
        Ok(transcript)
    }

    /// The live character state. `None` before initialize.
    pub fn current_state(&self) -> Option<CharacterState> {
        self.machine.current_state()
    }

    /// State captured when the last interaction completed.
    pub fn previous_state(&self) -> Option<CharacterState> {
        self.machine.previous_state()
    }

    /// State captured when the current interaction's behavior began.
    pub fn state_at_animation_start(&self) -> Option<CharacterState> {
        self.machine.state_at_animation_start()
    }

    /// The current interaction, if a conversation is active.
    pub fn current_interaction(&self) -> Option<Interaction> {
        self.machine.current_interaction()
    }

    /// `true` while trigger handling is paused and only an override
    /// trigger can fully proceed.
    pub fn waiting_for_override_trigger(&self) -> bool {
        self.gate.waiting_for_override()
    }

    /// The most recent override trigger, retained for diagnostics.
    pub fn last_override_trigger(&self) -> Option<TriggerData> {
        self.gate.last_override()
    }

    /// Number of triggers dropped while the gate was pausing with ignore.
    pub fn dropped_trigger_count(&self) -> u64 {
        self.gate.dropped_count()
    }

    /// Tear everything down: force the conversation to a stop, detach the
    /// event intake, and drop every subscription. Safe to call repeatedly
    /// and while an interaction is active; every later command fails fast.
    pub async fn dispose(&self) {
        if self.lifecycle.swap(DISPOSED, Ordering::SeqCst) == DISPOSED {
            debug!("dispose called twice");
            return;
        }
        self.intake_tx.lock().unwrap().take();
        let task = self.intake_task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
        }
        self.machine.force_idle().await;
        self.channels.clear_all();
        info!("character disposed");
    }
}
