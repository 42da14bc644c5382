use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::trigger::TriggerData;

/// What the gate decided for one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Dispatch fully, including state-machine advancement.
    Proceed,
    /// Discard silently; no notifications are raised.
    Drop,
    /// Raise notifications but do not advance the state machine.
    ObserveOnly,
}

#[derive(Debug, Default, Clone, Copy)]
struct GateFlags {
    paused: bool,
    ignore_while_paused: bool,
}

/// Pause/override admission control for triggers.
///
/// Two independent booleans drive a closed decision table:
///
/// | paused | ignore | override | decision    |
/// |--------|--------|----------|-------------|
/// | false  |   —    |   any    | Proceed     |
/// | true   | true   |  false   | Drop        |
/// | true   | true   |  true    | Proceed     |
/// | true   | false  |  false   | ObserveOnly |
/// | true   | false  |  true    | Proceed     |
///
/// The gate is single-writer, multi-reader; it is not persisted across
/// process restarts. The pause is a hard edge: triggers dropped while
/// paused are never replayed.
#[derive(Debug, Default)]
pub struct TriggerGate {
    flags: Mutex<GateFlags>,
    last_override: Mutex<Option<TriggerData>>,
    dropped: AtomicU64,
}

impl TriggerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend trigger handling. Idempotent.
    ///
    /// With `ignore_triggering_events` set, triggers arriving while paused
    /// are discarded outright; otherwise they still raise notifications
    /// without advancing the state machine.
    pub fn pause(&self, ignore_triggering_events: bool) {
        let mut flags = self.flags.lock().unwrap();
        flags.paused = true;
        flags.ignore_while_paused = ignore_triggering_events;
        debug!(ignore_triggering_events, "trigger handling paused");
    }

    /// Resume trigger handling. Idempotent; nothing dropped during the
    /// pause window is replayed.
    pub fn restart(&self) {
        let mut flags = self.flags.lock().unwrap();
        flags.paused = false;
        flags.ignore_while_paused = false;
        debug!("trigger handling restarted");
    }

    /// Decide whether `trigger` may proceed, per the table above.
    pub fn admit(&self, trigger: &TriggerData) -> GateDecision {
        if trigger.is_override {
            *self.last_override.lock().unwrap() = Some(trigger.clone());
        }
        let flags = *self.flags.lock().unwrap();
        if !flags.paused {
            return GateDecision::Proceed;
        }
        if trigger.is_override {
            debug!(source = ?trigger.source, "override trigger bypassed pause");
            return GateDecision::Proceed;
        }
        if flags.ignore_while_paused {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(source = ?trigger.source, "trigger dropped while paused");
            GateDecision::Drop
        } else {
            GateDecision::ObserveOnly
        }
    }

    /// `true` while the gate is paused, i.e. only an override-qualified
    /// trigger can fully proceed.
    pub fn waiting_for_override(&self) -> bool {
        self.flags.lock().unwrap().paused
    }

    /// The most recent override trigger admitted, retained read-only for
    /// diagnostics. Last write wins, paused or not.
    pub fn last_override(&self) -> Option<TriggerData> {
        self.last_override.lock().unwrap().clone()
    }

    /// Number of triggers dropped while paused with ignore set.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{RawEvent, normalize};

    fn trigger(is_override: bool) -> TriggerData {
        let mut td = normalize(RawEvent::Bump {
            sensor: "front_left".into(),
            pressed: true,
        })
        .unwrap();
        td.is_override = is_override;
        td
    }

    #[test]
    fn decision_table_is_exhaustive() {
        // (paused, ignore, override) -> expected, all 8 combinations
        let cases = [
            (false, false, false, GateDecision::Proceed),
            (false, false, true, GateDecision::Proceed),
            (false, true, false, GateDecision::Proceed),
            (false, true, true, GateDecision::Proceed),
            (true, true, false, GateDecision::Drop),
            (true, true, true, GateDecision::Proceed),
            (true, false, false, GateDecision::ObserveOnly),
            (true, false, true, GateDecision::Proceed),
        ];
        for (paused, ignore, is_override, expected) in cases {
            let gate = TriggerGate::new();
            if paused {
                gate.pause(ignore);
            } else {
                // ignore has no effect while not paused
                gate.pause(ignore);
                gate.restart();
            }
            assert_eq!(
                gate.admit(&trigger(is_override)),
                expected,
                "paused={paused} ignore={ignore} override={is_override}"
            );
        }
    }

    #[test]
    fn pause_and_restart_are_idempotent() {
        let gate = TriggerGate::new();
        gate.pause(true);
        gate.pause(true);
        assert!(gate.waiting_for_override());
        gate.restart();
        gate.restart();
        assert!(!gate.waiting_for_override());
        assert_eq!(gate.admit(&trigger(false)), GateDecision::Proceed);
    }

    #[test]
    fn dropped_triggers_are_counted_not_replayed() {
        let gate = TriggerGate::new();
        gate.pause(true);
        for _ in 0..3 {
            assert_eq!(gate.admit(&trigger(false)), GateDecision::Drop);
        }
        assert_eq!(gate.dropped_count(), 3);
        gate.restart();
        // nothing queued: the next admit sees only the next live trigger
        assert_eq!(gate.admit(&trigger(false)), GateDecision::Proceed);
        assert_eq!(gate.dropped_count(), 3);
    }

    #[test]
    fn last_override_is_retained_last_write_wins() {
        let gate = TriggerGate::new();
        assert!(gate.last_override().is_none());
        gate.pause(true);
        let first = TriggerData::simulated_intent("first", true);
        let second = TriggerData::simulated_intent("second", true);
        gate.admit(&first);
        gate.admit(&second);
        assert_eq!(
            gate.last_override().and_then(|t| t.intent),
            Some("second".to_string())
        );
    }

    #[test]
    fn last_override_is_recorded_while_unpaused_too() {
        let gate = TriggerGate::new();
        gate.admit(&TriggerData::simulated_intent("open_gate", true));
        assert_eq!(
            gate.last_override().and_then(|t| t.intent),
            Some("open_gate".to_string())
        );
        // non-override admissions never touch the slot
        gate.admit(&trigger(false));
        assert!(gate.last_override().is_some());
    }
}
