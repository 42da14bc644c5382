use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::EngineError;

/// Kind of event a trigger originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerSource {
    Bumper,
    CapTouch,
    ArTag,
    TimeOfFlight,
    Battery,
    Serial,
    External,
    Object,
    FaceRecognition,
    VoiceProcessing,
    SpeechIntent,
}

impl TriggerSource {
    /// Whether triggers of this kind resolve through the intent path
    /// rather than a passive sensor notification.
    pub fn is_intent(self) -> bool {
        matches!(
            self,
            Self::SpeechIntent | Self::VoiceProcessing | Self::Serial | Self::External
        )
    }
}

/// Uniform description of an event that may cause a response.
///
/// Instances are transient: each one lives for a single dispatch cycle,
/// except the most recent override trigger which the gate retains
/// read-only for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerData {
    pub source: TriggerSource,
    /// Normalized payload, shape depends on `source`.
    pub payload: serde_json::Value,
    /// Recognized intent name, for intent-path triggers.
    pub intent: Option<String>,
    /// Originating sensor id, when the hardware reports one.
    pub sensor_id: Option<String>,
    /// Override triggers bypass the pause gate.
    pub is_override: bool,
    /// `true` for manually simulated triggers.
    pub simulated: bool,
    pub received_at: DateTime<Utc>,
}

impl TriggerData {
    fn new(source: TriggerSource, payload: serde_json::Value) -> Self {
        Self {
            source,
            payload,
            intent: None,
            sensor_id: None,
            is_override: false,
            simulated: false,
            received_at: Utc::now(),
        }
    }

    /// Build a simulated intent trigger for `SimulateTrigger`.
    pub fn simulated_intent(intent: impl Into<String>, is_override: bool) -> Self {
        let intent = intent.into();
        let mut td = Self::new(TriggerSource::External, json!({ "intent": intent }));
        td.intent = Some(intent);
        td.is_override = is_override;
        td.simulated = true;
        td
    }
}

/// A raw event as delivered by the sensor transport or voice pipeline,
/// before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawEvent {
    Bump { sensor: String, pressed: bool },
    Touch { pad: String, contacted: bool },
    Tag { tag_id: i64 },
    TimeOfFlight { sensor: String, distance_m: f64 },
    Battery { charge_percent: f64, charging: bool },
    Serial { line: String },
    External { name: String, payload: serde_json::Value },
    Object { label: String, confidence: f64 },
    Face { name: Option<String>, confidence: f64 },
    VoiceRecord { transcript: String },
    SpeechIntent { intent: String, utterance: String, confidence: f64 },
}

fn malformed(source_kind: &'static str, reason: impl Into<String>) -> EngineError {
    EngineError::Normalization {
        source_kind,
        reason: reason.into(),
    }
}

fn valid_confidence(c: f64, kind: &'static str) -> Result<(), EngineError> {
    if c.is_finite() && (0.0..=1.0).contains(&c) {
        Ok(())
    } else {
        Err(malformed(kind, format!("confidence {c} outside 0..=1")))
    }
}

/// Convert one raw event into a [`TriggerData`].
///
/// Stateless and order-independent; multiple raw events may be normalized
/// concurrently. Malformed input yields [`EngineError::Normalization`],
/// which callers log and drop.
pub fn normalize(raw: RawEvent) -> Result<TriggerData, EngineError> {
    let td = match raw {
        RawEvent::Bump { sensor, pressed } => {
            if sensor.is_empty() {
                return Err(malformed("bump", "empty sensor id"));
            }
            let mut td = TriggerData::new(
                TriggerSource::Bumper,
                json!({ "sensor": sensor, "pressed": pressed }),
            );
            td.sensor_id = Some(sensor);
            td
        }
        RawEvent::Touch { pad, contacted } => {
            if pad.is_empty() {
                return Err(malformed("touch", "empty pad id"));
            }
            let mut td = TriggerData::new(
                TriggerSource::CapTouch,
                json!({ "pad": pad, "contacted": contacted }),
            );
            td.sensor_id = Some(pad);
            td
        }
        RawEvent::Tag { tag_id } => {
            if tag_id < 0 {
                return Err(malformed("tag", format!("negative tag id {tag_id}")));
            }
            TriggerData::new(TriggerSource::ArTag, json!({ "tag_id": tag_id }))
        }
        RawEvent::TimeOfFlight { sensor, distance_m } => {
            if !distance_m.is_finite() || distance_m < 0.0 {
                return Err(malformed("time_of_flight", format!("bad distance {distance_m}")));
            }
            let mut td = TriggerData::new(
                TriggerSource::TimeOfFlight,
                json!({ "sensor": sensor, "distance_m": distance_m }),
            );
            td.sensor_id = Some(sensor);
            td
        }
        RawEvent::Battery {
            charge_percent,
            charging,
        } => {
            if !charge_percent.is_finite() || !(0.0..=100.0).contains(&charge_percent) {
                return Err(malformed("battery", format!("bad charge {charge_percent}")));
            }
            TriggerData::new(
                TriggerSource::Battery,
                json!({ "charge_percent": charge_percent, "charging": charging }),
            )
        }
        RawEvent::Serial { line } => {
            let line = line.trim().to_string();
            if line.is_empty() {
                return Err(malformed("serial", "empty line"));
            }
            let mut td = TriggerData::new(TriggerSource::Serial, json!({ "line": line.clone() }));
            td.intent = Some(line);
            td
        }
        RawEvent::External { name, payload } => {
            if name.is_empty() {
                return Err(malformed("external", "empty event name"));
            }
            let mut td = TriggerData::new(
                TriggerSource::External,
                json!({ "name": name.clone(), "payload": payload }),
            );
            td.intent = Some(name);
            td
        }
        RawEvent::Object { label, confidence } => {
            valid_confidence(confidence, "object")?;
            if label.is_empty() {
                return Err(malformed("object", "empty label"));
            }
            TriggerData::new(
                TriggerSource::Object,
                json!({ "label": label, "confidence": confidence }),
            )
        }
        RawEvent::Face { name, confidence } => {
            valid_confidence(confidence, "face")?;
            TriggerData::new(
                TriggerSource::FaceRecognition,
                json!({ "name": name, "confidence": confidence }),
            )
        }
        RawEvent::VoiceRecord { transcript } => {
            let transcript = transcript.trim().to_string();
            if transcript.is_empty() {
                return Err(malformed("voice_record", "empty transcript"));
            }
            let mut td = TriggerData::new(
                TriggerSource::VoiceProcessing,
                json!({ "transcript": transcript.clone() }),
            );
            td.intent = Some(transcript);
            td
        }
        RawEvent::SpeechIntent {
            intent,
            utterance,
            confidence,
        } => {
            valid_confidence(confidence, "speech_intent")?;
            if intent.is_empty() {
                return Err(malformed("speech_intent", "empty intent name"));
            }
            let mut td = TriggerData::new(
                TriggerSource::SpeechIntent,
                json!({ "intent": intent.clone(), "utterance": utterance, "confidence": confidence }),
            );
            td.intent = Some(intent);
            td
        }
    };
    Ok(td)
}
