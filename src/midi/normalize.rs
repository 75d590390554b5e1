//! Transport messages to canonical events.
//!
//! Pure per-message mapping. Malformed wire messages and event kinds the
//! synthesizer does not handle produce `None`; nothing here is an error.

use tracing::debug;

use super::transport::{SeqRecord, TransportMessage};
use crate::types::{pitch_bend_to_signed, MidiEvent};

/// Normalizes a message from either transport.
pub fn normalize(msg: &TransportMessage) -> Option<MidiEvent> {
    match msg {
        TransportMessage::Wire(bytes) => normalize_wire(bytes),
        TransportMessage::Sequencer(record) => normalize_sequencer(record),
    }
}

/// Number of data bytes a channel voice status expects.
fn data_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

/// Maps a status-and-data wire message.
///
/// Messages that are too short, that lack a status byte (running status),
/// that carry a data byte with the high bit set, or that are system messages
/// are dropped. Bytes past the first message are ignored.
pub fn normalize_wire(bytes: &[u8]) -> Option<MidiEvent> {
    let Some(&status) = bytes.first() else {
        debug!("Dropping empty MIDI message");
        return None;
    };
    if status < 0x80 {
        debug!(status, "Dropping MIDI message without status byte");
        return None;
    }
    if status >= 0xF0 {
        debug!(status, "Ignoring system MIDI message");
        return None;
    }

    let needed = data_len(status);
    let data = &bytes[1..];
    if data.len() < needed {
        debug!(status, len = bytes.len(), "Dropping truncated MIDI message");
        return None;
    }
    let data = &data[..needed];
    if data.iter().any(|b| b & 0x80 != 0) {
        debug!(status, "Dropping MIDI message with invalid data byte");
        return None;
    }

    let channel = status & 0x0F;
    let d1 = data[0];
    let d2 = data.get(1).copied().unwrap_or(0);

    let event = match status & 0xF0 {
        0x80 => MidiEvent::NoteOff {
            channel,
            note: d1,
            velocity: d2,
        },
        0x90 => MidiEvent::NoteOn {
            channel,
            note: d1,
            velocity: d2,
        },
        0xA0 => MidiEvent::KeyPressure {
            channel,
            note: d1,
            pressure: d2,
        },
        0xB0 => MidiEvent::ControlChange {
            channel,
            controller: d1,
            value: d2,
        },
        0xC0 => MidiEvent::ProgramChange {
            channel,
            program: d1,
        },
        0xD0 => MidiEvent::ChannelPressure {
            channel,
            pressure: d1,
        },
        0xE0 => MidiEvent::PitchBend {
            channel,
            value: pitch_bend_to_signed(((d2 as u16) << 7) | d1 as u16),
        },
        _ => return None,
    };
    Some(event)
}

/// Out-of-range values saturate to 255 so the router rejects them.
fn saturate_u8(v: i64) -> u8 {
    u8::try_from(v).unwrap_or(u8::MAX)
}

fn saturate_i16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Renames a sequencer record into the canonical variant.
pub fn normalize_sequencer(record: &SeqRecord) -> Option<MidiEvent> {
    let event = match *record {
        SeqRecord::NoteOn {
            channel,
            note,
            velocity,
        } => MidiEvent::NoteOn {
            channel,
            note,
            velocity,
        },
        SeqRecord::NoteOff {
            channel,
            note,
            velocity,
        } => MidiEvent::NoteOff {
            channel,
            note,
            velocity,
        },
        SeqRecord::KeyPressure {
            channel,
            note,
            pressure,
        } => MidiEvent::KeyPressure {
            channel,
            note,
            pressure,
        },
        SeqRecord::Controller {
            channel,
            param,
            value,
        } => MidiEvent::ControlChange {
            channel,
            controller: saturate_u8(param as i64),
            value: saturate_u8(value as i64),
        },
        SeqRecord::ProgramChange { channel, value } => MidiEvent::ProgramChange {
            channel,
            program: saturate_u8(value as i64),
        },
        SeqRecord::ChannelPressure { channel, value } => MidiEvent::ChannelPressure {
            channel,
            pressure: saturate_u8(value as i64),
        },
        SeqRecord::PitchBend { channel, value } => MidiEvent::PitchBend {
            channel,
            value: saturate_i16(value),
        },
        SeqRecord::Unsupported => return None,
    };
    Some(event)
}
