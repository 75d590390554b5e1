//! Canonical MIDI event shared by every transport.
//!
//! Both MIDI transports are normalized into [`MidiEvent`] before anything is
//! sent to the synthesizer. Values are carried as received; range checks
//! happen in the router, not here.

/// Number of MIDI channels.
pub const MIDI_CHANNELS: u8 = 16;

/// Largest value of a 7-bit MIDI data byte.
pub const MAX_DATA_VALUE: u8 = 127;

/// Centre of the 14-bit pitch-bend wire range.
pub const PITCH_BEND_CENTER: u16 = 8192;

/// Largest 14-bit pitch-bend wire value.
pub const PITCH_BEND_MAX_WIRE: u16 = 16383;

/// Channel reserved for percussion in General MIDI (channel 10, zero-based 9).
pub const PERCUSSION_CHANNEL: u8 = 9;

/// A transport-independent MIDI channel voice message.
///
/// Pitch bend is stored as a signed offset from centre (-8192..=8191).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    PitchBend {
        channel: u8,
        value: i16,
    },
    ChannelPressure {
        channel: u8,
        pressure: u8,
    },
    KeyPressure {
        channel: u8,
        note: u8,
        pressure: u8,
    },
}

impl MidiEvent {
    /// Returns the zero-based channel this event addresses.
    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. }
            | MidiEvent::ChannelPressure { channel, .. }
            | MidiEvent::KeyPressure { channel, .. } => channel,
        }
    }

    /// Short name of the message kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            MidiEvent::NoteOn { .. } => "note_on",
            MidiEvent::NoteOff { .. } => "note_off",
            MidiEvent::ControlChange { .. } => "control_change",
            MidiEvent::ProgramChange { .. } => "program_change",
            MidiEvent::PitchBend { .. } => "pitch_bend",
            MidiEvent::ChannelPressure { .. } => "channel_pressure",
            MidiEvent::KeyPressure { .. } => "key_pressure",
        }
    }
}

/// Converts a 14-bit wire pitch-bend value to the signed canonical form.
#[inline]
pub fn pitch_bend_to_signed(wire: u16) -> i16 {
    wire as i16 - PITCH_BEND_CENTER as i16
}

/// Converts a signed canonical pitch bend back to the 14-bit wire form.
///
/// Exact inverse of [`pitch_bend_to_signed`] for every value in `0..=16383`.
/// Callers must range-check `value` first.
#[inline]
pub fn pitch_bend_to_wire(value: i16) -> u16 {
    (value + PITCH_BEND_CENTER as i16) as u16
}
