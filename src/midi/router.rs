//! Canonical events to synthesis calls.
//!
//! One accepted event is exactly one engine call, made on the caller's thread
//! in arrival order. The router holds no configuration; gain and effect
//! settings are pushed into the engine directly by the reload path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::{EngineError, SynthEngine};
use crate::types::{
    pitch_bend_to_wire, MidiEvent, MAX_DATA_VALUE, MIDI_CHANNELS, PERCUSSION_CHANNEL,
    PITCH_BEND_CENTER,
};

const CC_VOLUME: u8 = 7;
const CC_PAN: u8 = 10;
const CC_EXPRESSION: u8 = 11;
const CC_SUSTAIN: u8 = 64;
const CC_RESET_ALL_CONTROLLERS: u8 = 121;

/// GM reset values.
pub const RESET_VOLUME: u8 = 100;
pub const RESET_PAN: u8 = 64;
pub const RESET_EXPRESSION: u8 = 127;
pub const RESET_PROGRAM: u8 = 0;

const PITCH_BEND_MIN: i16 = -(PITCH_BEND_CENTER as i16);
const PITCH_BEND_MAX: i16 = PITCH_BEND_CENTER as i16 - 1;

/// Why an event was not routed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("router is no longer accepting events")]
    Stopped,

    #[error("channel {0} out of range")]
    InvalidChannel(u8),

    #[error("{field} {value} out of range")]
    OutOfRange { field: &'static str, value: i32 },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Routing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub routed: u64,
    pub dropped: u64,
}

/// Validates canonical events and forwards them to the engine.
pub struct EventRouter {
    engine: Arc<dyn SynthEngine>,
    accepting: AtomicBool,
    routed: AtomicU64,
    dropped: AtomicU64,
}

impl EventRouter {
    pub fn new(engine: Arc<dyn SynthEngine>) -> Self {
        Self {
            engine,
            accepting: AtomicBool::new(true),
            routed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &Arc<dyn SynthEngine> {
        &self.engine
    }

    /// Rejects every later [`dispatch`](Self::dispatch).
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            routed: self.routed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Validates `event` and makes the matching engine call.
    ///
    /// Rejected events are counted and logged at debug level only.
    pub fn dispatch(&self, event: MidiEvent) -> Result<(), DispatchError> {
        let result = self.route(event);
        match &result {
            Ok(()) => {
                self.routed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    kind = event.kind(),
                    channel = event.channel(),
                    error = %e,
                    "Dropped MIDI event"
                );
            }
        }
        result
    }

    fn route(&self, event: MidiEvent) -> Result<(), DispatchError> {
        if !self.is_accepting() {
            return Err(DispatchError::Stopped);
        }
        let channel = event.channel();
        if channel >= MIDI_CHANNELS {
            return Err(DispatchError::InvalidChannel(channel));
        }

        let e = &self.engine;
        match event {
            MidiEvent::NoteOn { note, velocity, .. } => {
                check("note", note)?;
                check("velocity", velocity)?;
                e.note_on(channel, note, velocity)?;
            }
            MidiEvent::NoteOff { note, velocity, .. } => {
                check("note", note)?;
                check("velocity", velocity)?;
                e.note_off(channel, note, velocity)?;
            }
            MidiEvent::ControlChange {
                controller, value, ..
            } => {
                check("controller", controller)?;
                check("value", value)?;
                e.control_change(channel, controller, value)?;
            }
            MidiEvent::ProgramChange { program, .. } => {
                check("program", program)?;
                e.program_change(channel, program)?;
            }
            MidiEvent::PitchBend { value, .. } => {
                if !(PITCH_BEND_MIN..=PITCH_BEND_MAX).contains(&value) {
                    return Err(DispatchError::OutOfRange {
                        field: "pitch_bend",
                        value: value as i32,
                    });
                }
                e.pitch_bend(channel, pitch_bend_to_wire(value))?;
            }
            MidiEvent::ChannelPressure { pressure, .. } => {
                check("pressure", pressure)?;
                e.channel_pressure(channel, pressure)?;
            }
            MidiEvent::KeyPressure { note, pressure, .. } => {
                check("note", note)?;
                check("pressure", pressure)?;
                e.key_pressure(channel, note, pressure)?;
            }
        }
        Ok(())
    }

    /// Issues all-notes-off on each of the 16 channels. Works after
    /// [`stop_accepting`](Self::stop_accepting). Returns the number of
    /// channels where the call failed.
    pub fn all_notes_off(&self) -> usize {
        let mut failures = 0;
        for ch in 0..MIDI_CHANNELS {
            if let Err(e) = self.engine.all_notes_off(ch) {
                debug!(channel = ch, error = %e, "All notes off failed");
                failures += 1;
            }
        }
        failures
    }

    /// Silences every channel and restores GM controller defaults.
    ///
    /// The percussion channel keeps its program. Returns the number of engine
    /// calls that failed.
    pub fn reset_controllers(&self) -> usize {
        let e = &self.engine;
        let mut failures = 0;
        for ch in 0..MIDI_CHANNELS {
            let mut results = vec![
                e.all_sound_off(ch),
                e.all_notes_off(ch),
                e.control_change(ch, CC_RESET_ALL_CONTROLLERS, 0),
                e.control_change(ch, CC_VOLUME, RESET_VOLUME),
                e.control_change(ch, CC_PAN, RESET_PAN),
                e.control_change(ch, CC_EXPRESSION, RESET_EXPRESSION),
                e.control_change(ch, CC_SUSTAIN, 0),
                e.pitch_bend(ch, PITCH_BEND_CENTER),
            ];
            if ch != PERCUSSION_CHANNEL {
                results.push(e.program_change(ch, RESET_PROGRAM));
            }
            for result in results {
                if let Err(err) = result {
                    warn!(channel = ch, error = %err, "Controller reset call failed");
                    failures += 1;
                }
            }
        }
        failures
    }
}

fn check(field: &'static str, value: u8) -> Result<(), DispatchError> {
    if value > MAX_DATA_VALUE {
        return Err(DispatchError::OutOfRange {
            field,
            value: value as i32,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{Call, RecordingEngine};

    fn router() -> (Arc<RecordingEngine>, EventRouter) {
        let engine = Arc::new(RecordingEngine::default());
        let router = EventRouter::new(engine.clone());
        (engine, router)
    }

    #[test]
    fn each_event_is_one_call() {
        let (engine, router) = router();
        router
            .dispatch(MidiEvent::NoteOn {
                channel: 1,
                note: 60,
                velocity: 90,
            })
            .unwrap();
        router
            .dispatch(MidiEvent::NoteOff {
                channel: 1,
                note: 60,
                velocity: 0,
            })
            .unwrap();
        router
            .dispatch(MidiEvent::PitchBend {
                channel: 2,
                value: -8192,
            })
            .unwrap();
        router
            .dispatch(MidiEvent::KeyPressure {
                channel: 3,
                note: 1,
                pressure: 2,
            })
            .unwrap();

        assert_eq!(
            engine.calls(),
            vec![
                Call::NoteOn(1, 60, 90),
                Call::NoteOff(1, 60, 0),
                Call::PitchBend(2, 0),
                Call::KeyPressure(3, 1, 2),
            ]
        );
        assert_eq!(router.stats().routed, 4);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let (engine, router) = router();
        let bad = [
            MidiEvent::NoteOn {
                channel: 16,
                note: 60,
                velocity: 1,
            },
            MidiEvent::NoteOn {
                channel: 0,
                note: 128,
                velocity: 1,
            },
            MidiEvent::ControlChange {
                channel: 0,
                controller: 200,
                value: 0,
            },
            MidiEvent::ProgramChange {
                channel: 0,
                program: 255,
            },
            MidiEvent::PitchBend {
                channel: 0,
                value: 8192,
            },
            MidiEvent::PitchBend {
                channel: 0,
                value: -8193,
            },
        ];
        for event in bad {
            assert!(router.dispatch(event).is_err(), "{:?} accepted", event);
        }
        assert!(engine.calls().is_empty());
        assert_eq!(router.stats(), RouterStats { routed: 0, dropped: 6 });
    }

    #[test]
    fn stopped_router_rejects_events() {
        let (engine, router) = router();
        router.stop_accepting();
        assert!(matches!(
            router.dispatch(MidiEvent::ProgramChange {
                channel: 0,
                program: 1
            }),
            Err(DispatchError::Stopped)
        ));
        assert_eq!(router.all_notes_off(), 0);
        assert_eq!(engine.calls().len(), 16);
    }

    #[test]
    fn all_notes_off_covers_every_channel() {
        let (engine, router) = router();
        router.all_notes_off();
        let expected: Vec<_> = (0..16).map(Call::AllNotesOff).collect();
        assert_eq!(engine.calls(), expected);
    }

    #[test]
    fn reset_skips_percussion_program() {
        let (engine, router) = router();
        assert_eq!(router.reset_controllers(), 0);
        let calls = engine.calls();
        for ch in 0..16u8 {
            assert!(calls.contains(&Call::ControlChange(ch, CC_VOLUME, 100)));
            assert!(calls.contains(&Call::ControlChange(ch, CC_PAN, 64)));
            assert!(calls.contains(&Call::ControlChange(ch, CC_EXPRESSION, 127)));
            assert!(calls.contains(&Call::ControlChange(ch, CC_SUSTAIN, 0)));
            assert!(calls.contains(&Call::PitchBend(ch, 8192)));
            assert_eq!(
                calls.contains(&Call::ProgramChange(ch, 0)),
                ch != PERCUSSION_CHANNEL
            );
        }
    }
}
