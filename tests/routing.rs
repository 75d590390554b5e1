mod common;

use std::sync::Arc;

use midisynthd::midi::{normalize_wire, EventRouter, RESET_EXPRESSION, RESET_PAN, RESET_VOLUME};
use midisynthd::types::{MidiEvent, MIDI_CHANNELS, PERCUSSION_CHANNEL, PITCH_BEND_MAX_WIRE};

use common::StateEngine;

#[test]
fn test_reset_controllers_all_channels() {
    let engine = Arc::new(StateEngine::default());
    let router = EventRouter::new(engine.clone());
    assert_eq!(router.reset_controllers(), 0);

    for ch in 0..MIDI_CHANNELS {
        let state = engine.channel(ch);
        assert_eq!(state.volume, RESET_VOLUME, "channel {}", ch);
        assert_eq!(state.pan, RESET_PAN, "channel {}", ch);
        assert_eq!(state.expression, RESET_EXPRESSION, "channel {}", ch);
        assert_eq!(state.sustain, 0, "channel {}", ch);
        assert_eq!(state.pitch_bend, common::CENTER, "channel {}", ch);
        if ch == PERCUSSION_CHANNEL {
            assert_eq!(state.program, 42, "percussion program must be untouched");
        } else {
            assert_eq!(state.program, 0, "channel {}", ch);
        }
    }
}

#[test]
fn test_pitch_bend_wire_identity() {
    let engine = Arc::new(StateEngine::default());
    let router = EventRouter::new(engine.clone());

    for wire in 0..=PITCH_BEND_MAX_WIRE {
        let bytes = [0xE3, (wire & 0x7F) as u8, (wire >> 7) as u8];
        let event = normalize_wire(&bytes).unwrap();
        assert!(matches!(event, MidiEvent::PitchBend { channel: 3, .. }));
        router.dispatch(event).unwrap();
        assert_eq!(engine.channel(3).pitch_bend, wire);
    }
}

#[test]
fn test_out_of_range_dropped_and_counted() {
    let engine = Arc::new(StateEngine::default());
    let router = EventRouter::new(engine.clone());

    router
        .dispatch(MidiEvent::NoteOn {
            channel: 0,
            note: 60,
            velocity: 100,
        })
        .unwrap();
    assert!(router
        .dispatch(MidiEvent::NoteOn {
            channel: 16,
            note: 60,
            velocity: 100,
        })
        .is_err());
    assert!(router
        .dispatch(MidiEvent::ControlChange {
            channel: 0,
            controller: 7,
            value: 200,
        })
        .is_err());

    let stats = router.stats();
    assert_eq!(stats.routed, 1);
    assert_eq!(stats.dropped, 2);
    assert_eq!(engine.note_on_count(), 1);
}
