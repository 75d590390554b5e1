//! Post-load validation.

use std::fmt::Display;
use std::ops::RangeInclusive;

use tracing::warn;

use super::{limits, Bound, Configuration, DEFAULT_CLIENT_NAME};
use crate::error::{DaemonError, Result};
use crate::types::is_readable;

/// Re-clamps every bounded field and disables unreadable soundfonts.
///
/// Each corrected field or disabled soundfont counts as one fix and is logged
/// with its old and new value. Fails with `NO_SOUNDFONT` when no enabled
/// soundfont remains.
pub fn validate(cfg: &mut Configuration) -> Result<usize> {
    let mut fixes = 0;

    let a = &mut cfg.audio;
    clamp("sample_rate", &mut a.sample_rate, limits::SAMPLE_RATE, &mut fixes);
    clamp("buffer_size", &mut a.buffer_size, limits::BUFFER_SIZE, &mut fixes);
    clamp("audio_periods", &mut a.periods, limits::AUDIO_PERIODS, &mut fixes);

    let s = &mut cfg.synth;
    clamp("polyphony", &mut s.polyphony, limits::POLYPHONY, &mut fixes);
    clamp("gain", &mut s.gain, limits::GAIN, &mut fixes);
    clamp("chorus_level", &mut s.chorus.level, limits::CHORUS_LEVEL, &mut fixes);
    clamp("chorus_voices", &mut s.chorus.voices, limits::CHORUS_VOICES, &mut fixes);
    clamp("chorus_speed", &mut s.chorus.speed, limits::CHORUS_SPEED, &mut fixes);
    clamp("chorus_depth", &mut s.chorus.depth, limits::CHORUS_DEPTH, &mut fixes);
    clamp("reverb_level", &mut s.reverb.level, limits::REVERB_LEVEL, &mut fixes);
    clamp("reverb_roomsize", &mut s.reverb.room_size, limits::REVERB_ROOM_SIZE, &mut fixes);
    clamp("reverb_damping", &mut s.reverb.damping, limits::REVERB_DAMPING, &mut fixes);
    clamp("reverb_width", &mut s.reverb.width, limits::REVERB_WIDTH, &mut fixes);

    for entry in cfg.soundfonts.iter_mut() {
        clamp(
            "soundfont_bank_offset",
            &mut entry.bank_offset,
            limits::BANK_OFFSET,
            &mut fixes,
        );
    }

    if cfg.midi.client_name.trim().is_empty() {
        warn!(
            key = "client_name",
            old = %cfg.midi.client_name,
            new = DEFAULT_CLIENT_NAME,
            "Corrected configuration value"
        );
        cfg.midi.client_name = DEFAULT_CLIENT_NAME.to_string();
        fixes += 1;
    }

    for entry in cfg.soundfonts.iter_mut().filter(|e| e.enabled) {
        if !is_readable(&entry.path) {
            warn!(path = %entry.path.display(), "Soundfont not readable, disabling");
            entry.enabled = false;
            fixes += 1;
        }
    }

    if cfg.soundfonts.enabled_count() == 0 {
        return Err(DaemonError::no_soundfont(cfg.soundfonts.len()));
    }

    Ok(fixes)
}

/// Moves the sample rate to the nearest rate in `supported`.
///
/// The configured range is wider than what a given synthesizer renders at.
/// Returns 1 if the value changed, logged like any other fix.
pub fn fit_sample_rate(cfg: &mut Configuration, supported: RangeInclusive<u32>) -> usize {
    let old = cfg.audio.sample_rate;
    let new = old.clamp(*supported.start(), *supported.end());
    if new == old {
        return 0;
    }
    warn!(key = "sample_rate", old, new, "Corrected configuration value");
    cfg.audio.sample_rate = new;
    1
}

fn clamp<T>(key: &str, field: &mut T, bound: Bound<T>, fixes: &mut usize)
where
    T: PartialOrd + Copy + Display,
{
    if !bound.contains(*field) {
        warn!(key, old = %field, new = %bound.default, "Corrected configuration value");
        *field = bound.default;
        *fixes += 1;
    }
}
