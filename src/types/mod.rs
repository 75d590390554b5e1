//! Core types for midisynthd.
//!
//! - [`MidiEvent`]: the canonical, transport-independent MIDI event
//! - [`SoundfontList`]: the bounded, ordered soundfont list of a configuration

mod event;
mod soundfont;

pub use event::{
    pitch_bend_to_signed, pitch_bend_to_wire, MidiEvent, MAX_DATA_VALUE, MIDI_CHANNELS,
    PERCUSSION_CHANNEL, PITCH_BEND_CENTER, PITCH_BEND_MAX_WIRE,
};
pub use soundfont::{
    is_readable, SoundfontEntry, SoundfontList, SoundfontListFull, MAX_SOUNDFONTS,
};
