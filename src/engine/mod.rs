//! Synthesis capability.
//!
//! [`SynthEngine`] is the narrow call surface the router and the lifecycle
//! controller drive. [`SoundFontEngine`] implements it on top of `rustysynth`
//! and hands the audio output a [`Renderer`] that pulls samples from it.

mod soundfont;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{ChorusSettings, ReverbSettings};

pub use soundfont::{Renderer, SoundFontEngine, ENGINE_SAMPLE_RATES, ENGINE_POLYPHONY};

/// Identifier of a loaded soundfont.
pub type SoundfontId = u32;

/// Error returned by a synthesis call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no soundfont loaded")]
    NoSoundfont,

    #[error("cannot open soundfont {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid soundfont {}: {reason}", .path.display())]
    InvalidSoundfont { path: PathBuf, reason: String },

    #[error("unknown soundfont id {0}")]
    UnknownSoundfont(SoundfontId),

    #[error("synthesizer rejected settings: {0}")]
    Settings(String),
}

/// Snapshot reported on a status request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineStatus {
    pub active_voices: u32,
    /// Fraction of the real-time budget spent rendering, 0.0 to 1.0 and above.
    pub cpu_load: f32,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub soundfonts: usize,
}

/// Synthesis call surface.
///
/// Every call is synchronous. Channel and value ranges are checked by the
/// caller; `pitch_bend` takes the 14-bit wire value.
pub trait SynthEngine: Send + Sync {
    fn note_on(&self, channel: u8, note: u8, velocity: u8) -> Result<(), EngineError>;
    fn note_off(&self, channel: u8, note: u8, velocity: u8) -> Result<(), EngineError>;
    fn control_change(&self, channel: u8, controller: u8, value: u8) -> Result<(), EngineError>;
    fn program_change(&self, channel: u8, program: u8) -> Result<(), EngineError>;
    fn pitch_bend(&self, channel: u8, value: u16) -> Result<(), EngineError>;
    fn channel_pressure(&self, channel: u8, pressure: u8) -> Result<(), EngineError>;
    fn key_pressure(&self, channel: u8, note: u8, pressure: u8) -> Result<(), EngineError>;

    /// Releases every sounding note on `channel`.
    fn all_notes_off(&self, channel: u8) -> Result<(), EngineError>;
    /// Silences `channel` immediately, skipping release envelopes.
    fn all_sound_off(&self, channel: u8) -> Result<(), EngineError>;

    fn set_gain(&self, gain: f32) -> Result<(), EngineError>;
    fn set_chorus(&self, chorus: &ChorusSettings) -> Result<(), EngineError>;
    fn set_reverb(&self, reverb: &ReverbSettings) -> Result<(), EngineError>;
    fn set_polyphony(&self, voices: u32) -> Result<(), EngineError>;

    fn load_soundfont(&self, path: &Path) -> Result<SoundfontId, EngineError>;
    fn unload_soundfont(&self, id: SoundfontId) -> Result<(), EngineError>;

    fn status(&self) -> EngineStatus;

    /// Drops every loaded soundfont and stops producing sound.
    fn release(&self) {}
}
