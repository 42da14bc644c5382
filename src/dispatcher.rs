use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{
    ArTagNotice, BatteryNotice, BumperNotice, EventChannels, FaceNotice, ListeningStopped,
    ObjectNotice, ResponseNotice, SpeakingStarted, SpeakingStopped, SpeechIntentNotice,
    TimeOfFlightNotice, TouchNotice, VoiceProcessed,
};
use crate::machine::InteractionMachine;
use crate::traits::SpeechPipeline;
use crate::trigger::{TriggerData, TriggerSource};

/// Tracks the cancellation tokens of all playbacks currently in flight,
/// so an interrupt request can cut every one of them short while their
/// stop notices still get raised.
///
/// Each playback holds its own entry keyed by a generation id, so a
/// finishing playback can only retire itself and never the entry of an
/// overlapping one.
#[derive(Debug, Default)]
pub(crate) struct SpeechSession {
    active: Mutex<Vec<(u64, CancellationToken)>>,
    next_id: AtomicU64,
}

impl SpeechSession {
    fn begin(&self) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.active.lock().unwrap().push((id, token.clone()));
        (id, token)
    }

    fn finish(&self, id: u64) {
        self.active.lock().unwrap().retain(|(entry, _)| *entry != id);
    }

    /// Cancel every in-flight playback. Returns whether there was any.
    pub(crate) fn interrupt(&self) -> bool {
        let drained: Vec<_> = std::mem::take(&mut *self.active.lock().unwrap());
        for (_, token) in &drained {
            token.cancel();
        }
        !drained.is_empty()
    }
}

/// Speak `text`, always raising `StartedSpeaking` and `StoppedSpeaking` as
/// a matched pair. A playback failure or cancellation surfaces on the stop
/// notice, never by omitting it. Returns the failure detail, if any.
pub(crate) async fn speak_with_events(
    channels: &EventChannels,
    speech: &dyn SpeechPipeline,
    session: &SpeechSession,
    text: &str,
    volume: u8,
) -> Option<String> {
    channels
        .started_speaking
        .publish(&SpeakingStarted { text: text.to_string() });
    let (id, token) = session.begin();
    let (cancelled, error) = tokio::select! {
        res = speech.speak(text, volume) => (false, res.err().map(|e| e.to_string())),
        _ = token.cancelled() => {
            speech.cancel_speech().await;
            (true, None)
        }
    };
    session.finish(id);
    if let Some(err) = &error {
        warn!(%err, "speech playback failed");
    }
    channels.stopped_speaking.publish(&SpeakingStopped {
        text: text.to_string(),
        cancelled,
        error: error.clone(),
    });
    error
}

/// Resolves admitted triggers to their response actions.
///
/// Intent-path triggers raise `SpeechIntentEvent` and, once a listener has
/// handled it, `ResponseEventReceived`; passive sensor triggers raise the
/// matching typed notification without touching interaction state.
pub struct ResponseDispatcher {
    channels: Arc<EventChannels>,
    speech: Arc<dyn SpeechPipeline>,
    machine: Arc<InteractionMachine>,
    session: Arc<SpeechSession>,
}

impl ResponseDispatcher {
    pub(crate) fn new(
        channels: Arc<EventChannels>,
        speech: Arc<dyn SpeechPipeline>,
        machine: Arc<InteractionMachine>,
        session: Arc<SpeechSession>,
    ) -> Self {
        Self {
            channels,
            speech,
            machine,
            session,
        }
    }

    /// Raise the notifications for `trigger`. With `advance` set (a full
    /// `Proceed` admission) an intent may also name a follow-up interaction,
    /// returned for the caller to apply under the transition mutex.
    pub(crate) async fn dispatch(&self, trigger: &TriggerData, advance: bool) -> Option<String> {
        if trigger.source.is_intent() {
            return self.dispatch_intent(trigger, advance);
        }
        self.publish_sensor_notice(trigger);
        None
    }

    fn dispatch_intent(&self, trigger: &TriggerData, advance: bool) -> Option<String> {
        let Some(intent) = trigger.intent.clone() else {
            warn!(source = ?trigger.source, "intent trigger without intent name");
            return None;
        };
        debug!(%intent, simulated = trigger.simulated, "dispatching speech intent");
        let handled = self.channels.speech_intent.publish(&SpeechIntentNotice {
            intent: intent.clone(),
            trigger: trigger.clone(),
        }) > 0;
        if handled {
            self.channels.response_event_received.publish(&ResponseNotice {
                intent: Some(intent.clone()),
                trigger: trigger.clone(),
            });
        }
        if !advance {
            return None;
        }
        self.machine.record_intent(&intent);
        self.machine.next_interaction_for_intent(&intent)
    }

    fn publish_sensor_notice(&self, trigger: &TriggerData) {
        let payload = trigger.payload.clone();
        let delivered = match trigger.source {
            TriggerSource::Bumper => serde_json::from_value::<BumperNotice>(payload)
                .map(|n| self.channels.bumper.publish(&n)),
            TriggerSource::CapTouch => serde_json::from_value::<TouchNotice>(payload)
                .map(|n| self.channels.cap_touch.publish(&n)),
            TriggerSource::ArTag => serde_json::from_value::<ArTagNotice>(payload)
                .map(|n| self.channels.ar_tag.publish(&n)),
            TriggerSource::TimeOfFlight => serde_json::from_value::<TimeOfFlightNotice>(payload)
                .map(|n| self.channels.time_of_flight.publish(&n)),
            TriggerSource::Battery => serde_json::from_value::<BatteryNotice>(payload)
                .map(|n| self.channels.battery.publish(&n)),
            TriggerSource::Object => serde_json::from_value::<ObjectNotice>(payload)
                .map(|n| self.channels.object_detection.publish(&n)),
            TriggerSource::FaceRecognition => serde_json::from_value::<FaceNotice>(payload)
                .map(|n| self.channels.face_recognition.publish(&n)),
            _ => return,
        };
        if let Err(err) = delivered {
            // Normalization guarantees the shape; a mismatch is a bug worth
            // logging, not worth stopping event processing for.
            warn!(source = ?trigger.source, %err, "sensor payload did not match its notice");
        }
    }

    /// One full listening cycle: capture, then speech-to-text.
    ///
    /// The four voice notifications are raised in matched pairs whatever
    /// happens; cancellation and collaborator failures surface on the
    /// completion payloads. Returns the transcript, if one was produced.
    pub(crate) async fn listen_once(&self, cancel: &CancellationToken) -> Option<String> {
        self.machine.set_listening(true);
        self.channels.started_listening.publish(&());
        let mut cancelled = false;
        let mut transcript = None;

        let captured = tokio::select! {
            res = self.speech.capture_audio() => Some(res),
            _ = cancel.cancelled() => {
                cancelled = true;
                None
            }
        };
        match captured {
            Some(Ok(clip)) => {
                self.channels.started_processing_voice.publish(&());
                let mut error = None;
                let processed = tokio::select! {
                    res = self.speech.transcribe(&clip) => Some(res),
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        None
                    }
                };
                match processed {
                    Some(Ok(text)) => transcript = Some(text),
                    Some(Err(e)) => {
                        warn!(err = %e, "voice transcription failed");
                        error = Some(e.to_string());
                    }
                    None => {}
                }
                self.channels
                    .completed_processing_voice
                    .publish(&VoiceProcessed {
                        transcript: transcript.clone(),
                        error,
                    });
            }
            Some(Err(e)) => {
                warn!(err = %e, "audio capture failed");
            }
            None => {}
        }
        self.channels
            .stopped_listening
            .publish(&ListeningStopped { cancelled });
        self.machine.set_listening(false);
        transcript
    }

    /// Speak `text` at the live volume through the paired speaking events.
    pub(crate) async fn say(&self, text: &str) -> Option<String> {
        let volume = self
            .machine
            .current_state()
            .map(|s| s.volume)
            .unwrap_or_default();
        self.machine.set_speaking(true);
        let error = speak_with_events(
            &self.channels,
            self.speech.as_ref(),
            &self.session,
            text,
            volume,
        )
        .await;
        self.machine.set_speaking(false);
        error
    }
}
