//! Backend detection and selection.
//!
//! - [`Prober`]: inspects the host for usable audio and MIDI backends
//! - [`DriverSelector`]: resolves the configured choice and opens it with one fallback

mod probe;
mod select;

pub use probe::{Availability, ProbeEnv, Prober, PROBE_BUDGET};
pub use select::{
    midi_fallback, resolve_audio, resolve_midi, DriverSelector, SelectedDrivers, Selection,
    SelectionOrigin, SelectionState, AUDIO_PRIORITY,
};
