use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::state::Interaction;
use crate::trigger::TriggerData;

/// Token returned by [`Multicast::subscribe`], used to detach the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken {
    channel: &'static str,
    id: u64,
}

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// One multicast notification channel.
///
/// Any number of listeners may attach or detach at any time; `publish` is
/// fire-and-forget toward subscribers and reports how many handlers ran,
/// which the dispatcher uses to tell whether anyone handled an event.
pub struct Multicast<T> {
    name: &'static str,
    handlers: Mutex<Vec<(u64, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> Multicast<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Attach `handler`; it runs for every subsequent publish until the
    /// returned token is unsubscribed.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().unwrap().push((id, Arc::new(handler)));
        SubscriptionToken {
            channel: self.name,
            id,
        }
    }

    /// Detach the handler behind `token`. Returns `false` if it was
    /// already gone or belongs to another channel.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        if token.channel != self.name {
            return false;
        }
        let mut handlers = self.handlers.lock().unwrap();
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != token.id);
        handlers.len() != before
    }

    /// Notify every subscriber with `payload`. Returns the number of
    /// handlers invoked.
    pub fn publish(&self, payload: &T) -> usize {
        let handlers: Vec<Handler<T>> = {
            let guard = self.handlers.lock().unwrap();
            guard.iter().map(|(_, h)| h.clone()).collect()
        };
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// Detach every subscriber.
    pub fn clear(&self) {
        self.handlers.lock().unwrap().clear();
    }
}

impl<T> std::fmt::Debug for Multicast<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multicast")
            .field("name", &self.name)
            .field("subscribers", &self.handlers.lock().unwrap().len())
            .finish()
    }
}

/// A conversation began or ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationNotice {
    pub conversation_id: String,
}

/// A recognized speech intent reached the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechIntentNotice {
    pub intent: String,
    pub trigger: TriggerData,
}

/// A listener handled a speech intent; the response is considered taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseNotice {
    pub intent: Option<String>,
    pub trigger: TriggerData,
}

/// End of a listening cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListeningStopped {
    pub cancelled: bool,
}

/// Outcome of a voice-processing phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProcessed {
    pub transcript: Option<String>,
    pub error: Option<String>,
}

/// Speech playback began.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakingStarted {
    pub text: String,
}

/// Speech playback finished, was cancelled, or failed. Always raised once
/// per [`SpeakingStarted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakingStopped {
    pub text: String,
    pub cancelled: bool,
    pub error: Option<String>,
}

/// A face was recognized (or an unknown face seen).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceNotice {
    pub name: Option<String>,
    pub confidence: f64,
}

/// An object was detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectNotice {
    pub label: String,
    pub confidence: f64,
}

/// A bumper changed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BumperNotice {
    pub sensor: String,
    pub pressed: bool,
}

/// A capacitive touch pad changed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouchNotice {
    pub pad: String,
    pub contacted: bool,
}

/// An AR tag entered view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArTagNotice {
    pub tag_id: i64,
}

/// A time-of-flight range reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOfFlightNotice {
    pub sensor: String,
    pub distance_m: f64,
}

/// A battery status reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryNotice {
    pub charge_percent: f64,
    pub charging: bool,
}

/// The engine's nineteen notification channels.
///
/// The engine is the sole producer on every channel; external listeners
/// attach and detach freely. All subscriptions are cleared on dispose.
#[derive(Debug)]
pub struct EventChannels {
    pub conversation_started: Multicast<ConversationNotice>,
    pub conversation_ended: Multicast<ConversationNotice>,
    pub interaction_started: Multicast<Interaction>,
    pub interaction_ended: Multicast<Interaction>,
    pub speech_intent: Multicast<SpeechIntentNotice>,
    pub response_event_received: Multicast<ResponseNotice>,
    pub started_listening: Multicast<()>,
    pub stopped_listening: Multicast<ListeningStopped>,
    pub started_processing_voice: Multicast<()>,
    pub completed_processing_voice: Multicast<VoiceProcessed>,
    pub started_speaking: Multicast<SpeakingStarted>,
    pub stopped_speaking: Multicast<SpeakingStopped>,
    pub face_recognition: Multicast<FaceNotice>,
    pub object_detection: Multicast<ObjectNotice>,
    pub bumper: Multicast<BumperNotice>,
    pub cap_touch: Multicast<TouchNotice>,
    pub ar_tag: Multicast<ArTagNotice>,
    pub time_of_flight: Multicast<TimeOfFlightNotice>,
    pub battery: Multicast<BatteryNotice>,
}

impl EventChannels {
    pub fn new() -> Self {
        Self {
            conversation_started: Multicast::new("conversation_started"),
            conversation_ended: Multicast::new("conversation_ended"),
            interaction_started: Multicast::new("interaction_started"),
            interaction_ended: Multicast::new("interaction_ended"),
            speech_intent: Multicast::new("speech_intent"),
            response_event_received: Multicast::new("response_event_received"),
            started_listening: Multicast::new("started_listening"),
            stopped_listening: Multicast::new("stopped_listening"),
            started_processing_voice: Multicast::new("started_processing_voice"),
            completed_processing_voice: Multicast::new("completed_processing_voice"),
            started_speaking: Multicast::new("started_speaking"),
            stopped_speaking: Multicast::new("stopped_speaking"),
            face_recognition: Multicast::new("face_recognition"),
            object_detection: Multicast::new("object_detection"),
            bumper: Multicast::new("bumper"),
            cap_touch: Multicast::new("cap_touch"),
            ar_tag: Multicast::new("ar_tag"),
            time_of_flight: Multicast::new("time_of_flight"),
            battery: Multicast::new("battery"),
        }
    }

    /// Drop every subscription on every channel.
    pub fn clear_all(&self) {
        self.conversation_started.clear();
        self.conversation_ended.clear();
        self.interaction_started.clear();
        self.interaction_ended.clear();
        self.speech_intent.clear();
        self.response_event_received.clear();
        self.started_listening.clear();
        self.stopped_listening.clear();
        self.started_processing_voice.clear();
        self.completed_processing_voice.clear();
        self.started_speaking.clear();
        self.stopped_speaking.clear();
        self.face_recognition.clear();
        self.object_detection.clear();
        self.bumper.clear();
        self.cap_touch.clear();
        self.ar_tag.clear();
        self.time_of_flight.clear();
        self.battery.clear();
    }
}

impl Default for EventChannels {
    fn default() -> Self {
        Self::new()
    }
}
