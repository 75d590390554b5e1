//! SoundFont engine on `rustysynth`.
//!
//! The synthesizer renders from one soundfont at a time: the first one loaded
//! becomes primary. Later loads are parsed and kept so unloading the primary
//! promotes the next. Engine state lives behind one mutex shared by the MIDI
//! thread and the audio callback; the master gain is an atomic the render path
//! reads once per block.

use std::fs::File;
use std::io::BufReader;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use tracing::{debug, info};

use super::{EngineError, EngineStatus, SoundfontId, SynthEngine};
use crate::config::{limits, ChorusSettings, ReverbSettings, SynthConfig};
use crate::types::MIDI_CHANNELS;

/// Sample rates the synthesizer accepts.
pub const ENGINE_SAMPLE_RATES: RangeInclusive<u32> = 16_000..=192_000;

/// Voice counts the synthesizer accepts. Requests outside are clamped.
pub const ENGINE_POLYPHONY: RangeInclusive<u32> = 8..=256;

const CC_REVERB_SEND: i32 = 91;
const CC_CHORUS_SEND: i32 = 93;
const CC_ALL_SOUND_OFF: u8 = 120;
const CC_ALL_NOTES_OFF: u8 = 123;

/// Smoothing factor for the render-time load estimate.
const LOAD_SMOOTHING: f32 = 0.1;

struct LoadedFont {
    id: SoundfontId,
    path: PathBuf,
    font: Arc<SoundFont>,
}

struct State {
    synth: Option<Synthesizer>,
    fonts: Vec<LoadedFont>,
    next_id: SoundfontId,
    polyphony: usize,
    chorus: ChorusSettings,
    reverb: ReverbSettings,
    /// Held notes per channel, one bit per key.
    held: [u128; MIDI_CHANNELS as usize],
}

impl State {
    /// Builds a synthesizer on the primary soundfont, or clears it if none is loaded.
    fn rebuild(&mut self, sample_rate: u32) -> Result<(), EngineError> {
        self.held = [0; MIDI_CHANNELS as usize];
        let Some(primary) = self.fonts.first() else {
            self.synth = None;
            return Ok(());
        };

        let settings = synthesizer_settings(sample_rate, self.polyphony);
        let synth = Synthesizer::new(&primary.font, &settings)
            .map_err(|e| EngineError::Settings(e.to_string()))?;
        debug!(path = %primary.path.display(), polyphony = self.polyphony, "Built synthesizer");
        self.synth = Some(synth);
        self.apply_sends();
        Ok(())
    }

    /// Pushes the effect send levels to every channel. A disabled effect gets
    /// a zero send.
    fn apply_sends(&mut self) {
        let reverb = send_level(self.reverb.enabled, self.reverb.level, limits::REVERB_LEVEL.max);
        let chorus = send_level(self.chorus.enabled, self.chorus.level, limits::CHORUS_LEVEL.max);
        if let Some(synth) = self.synth.as_mut() {
            for ch in 0..MIDI_CHANNELS as i32 {
                synth.process_midi_message(ch, 0xB0, CC_REVERB_SEND, reverb);
                synth.process_midi_message(ch, 0xB0, CC_CHORUS_SEND, chorus);
            }
        }
    }

    fn synth(&mut self) -> Result<&mut Synthesizer, EngineError> {
        self.synth.as_mut().ok_or(EngineError::NoSoundfont)
    }

    fn active_voices(&self) -> u32 {
        let held: u32 = self.held.iter().map(|bits| bits.count_ones()).sum();
        held.min(self.polyphony as u32)
    }
}

/// Effect units are always built, so enabling or disabling chorus and reverb
/// only changes the sends and never rebuilds a sounding synthesizer.
fn synthesizer_settings(sample_rate: u32, polyphony: usize) -> SynthesizerSettings {
    let mut settings = SynthesizerSettings::new(sample_rate as i32);
    settings.maximum_polyphony = polyphony;
    settings.enable_reverb_and_chorus = true;
    settings
}

/// Maps a configured effect level onto a 7-bit send value.
fn send_level(enabled: bool, level: f32, max: f32) -> i32 {
    if !enabled || max <= 0.0 {
        return 0;
    }
    ((level / max).clamp(0.0, 1.0) * 127.0).round() as i32
}

struct Shared {
    state: Mutex<State>,
    gain_bits: AtomicU32,
    load_bits: AtomicU32,
    sample_rate: u32,
    buffer_size: u32,
}

/// [`SynthEngine`] backed by `rustysynth`.
#[derive(Clone)]
pub struct SoundFontEngine {
    shared: Arc<Shared>,
}

impl SoundFontEngine {
    /// Creates an engine with no soundfont loaded.
    pub fn new(
        sample_rate: u32,
        buffer_size: u32,
        synth: &SynthConfig,
    ) -> Result<Self, EngineError> {
        if !ENGINE_SAMPLE_RATES.contains(&sample_rate) {
            return Err(EngineError::Settings(format!(
                "sample rate {} outside {}..={}",
                sample_rate,
                ENGINE_SAMPLE_RATES.start(),
                ENGINE_SAMPLE_RATES.end()
            )));
        }

        let state = State {
            synth: None,
            fonts: Vec::new(),
            next_id: 1,
            polyphony: clamp_polyphony(synth.polyphony),
            chorus: synth.chorus,
            reverb: synth.reverb,
            held: [0; MIDI_CHANNELS as usize],
        };

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                gain_bits: AtomicU32::new(synth.gain.to_bits()),
                load_bits: AtomicU32::new(0f32.to_bits()),
                sample_rate,
                buffer_size,
            }),
        })
    }

    /// Returns a render handle for the audio output.
    pub fn renderer(&self) -> Renderer {
        Renderer {
            shared: Arc::clone(&self.shared),
            left: vec![0.0; self.shared.buffer_size as usize],
            right: vec![0.0; self.shared.buffer_size as usize],
        }
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.shared.gain_bits.load(Ordering::Acquire))
    }

    fn with_synth<R>(&self, f: impl FnOnce(&mut Synthesizer) -> R) -> Result<R, EngineError> {
        let mut state = self.shared.state.lock();
        Ok(f(state.synth()?))
    }

    fn message(&self, channel: u8, command: i32, data1: u8, data2: u8) -> Result<(), EngineError> {
        self.with_synth(|s| {
            s.process_midi_message(channel as i32, command, data1 as i32, data2 as i32)
        })
    }
}

fn clamp_polyphony(requested: u32) -> usize {
    let clamped = requested.clamp(*ENGINE_POLYPHONY.start(), *ENGINE_POLYPHONY.end());
    if clamped != requested {
        debug!(requested, clamped, "Polyphony limited by synthesizer");
    }
    clamped as usize
}

impl SynthEngine for SoundFontEngine {
    fn note_on(&self, channel: u8, note: u8, velocity: u8) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        let synth = state.synth()?;
        let bit = 1u128 << (note & 0x7F);
        if velocity == 0 {
            synth.note_off(channel as i32, note as i32);
            state.held[channel as usize] &= !bit;
        } else {
            synth.note_on(channel as i32, note as i32, velocity as i32);
            state.held[channel as usize] |= bit;
        }
        Ok(())
    }

    fn note_off(&self, channel: u8, note: u8, _velocity: u8) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        state.synth()?.note_off(channel as i32, note as i32);
        state.held[channel as usize] &= !(1u128 << (note & 0x7F));
        Ok(())
    }

    fn control_change(&self, channel: u8, controller: u8, value: u8) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        state
            .synth()?
            .process_midi_message(channel as i32, 0xB0, controller as i32, value as i32);
        if controller == CC_ALL_NOTES_OFF || controller == CC_ALL_SOUND_OFF {
            state.held[channel as usize] = 0;
        }
        Ok(())
    }

    fn program_change(&self, channel: u8, program: u8) -> Result<(), EngineError> {
        self.message(channel, 0xC0, program, 0)
    }

    fn pitch_bend(&self, channel: u8, value: u16) -> Result<(), EngineError> {
        let lsb = (value & 0x7F) as u8;
        let msb = ((value >> 7) & 0x7F) as u8;
        self.message(channel, 0xE0, lsb, msb)
    }

    fn channel_pressure(&self, channel: u8, pressure: u8) -> Result<(), EngineError> {
        self.message(channel, 0xD0, pressure, 0)
    }

    fn key_pressure(&self, channel: u8, note: u8, pressure: u8) -> Result<(), EngineError> {
        self.message(channel, 0xA0, note, pressure)
    }

    fn all_notes_off(&self, channel: u8) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        state.synth()?.note_off_all_channel(channel as i32, false);
        state.held[channel as usize] = 0;
        Ok(())
    }

    fn all_sound_off(&self, channel: u8) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        state.synth()?.note_off_all_channel(channel as i32, true);
        state.held[channel as usize] = 0;
        Ok(())
    }

    fn set_gain(&self, gain: f32) -> Result<(), EngineError> {
        self.shared.gain_bits.store(gain.to_bits(), Ordering::Release);
        Ok(())
    }

    fn set_chorus(&self, chorus: &ChorusSettings) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        state.chorus = *chorus;
        state.apply_sends();
        Ok(())
    }

    fn set_reverb(&self, reverb: &ReverbSettings) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        state.reverb = *reverb;
        state.apply_sends();
        Ok(())
    }

    fn set_polyphony(&self, voices: u32) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        let polyphony = clamp_polyphony(voices);
        if polyphony == state.polyphony {
            return Ok(());
        }
        state.polyphony = polyphony;
        if state.synth.is_some() {
            state.rebuild(self.shared.sample_rate)?;
        }
        Ok(())
    }

    fn load_soundfont(&self, path: &Path) -> Result<SoundfontId, EngineError> {
        // Parse outside the lock; large soundfonts take a while.
        let file = File::open(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let font = SoundFont::new(&mut BufReader::new(file)).map_err(|e| {
            EngineError::InvalidSoundfont {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.fonts.push(LoadedFont {
            id,
            path: path.to_path_buf(),
            font: Arc::new(font),
        });
        if state.synth.is_none() {
            if let Err(e) = state.rebuild(self.shared.sample_rate) {
                state.fonts.pop();
                return Err(e);
            }
        }
        info!(id, path = %path.display(), primary = state.fonts.len() == 1, "Loaded soundfont");
        Ok(id)
    }

    fn unload_soundfont(&self, id: SoundfontId) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        let idx = state
            .fonts
            .iter()
            .position(|f| f.id == id)
            .ok_or(EngineError::UnknownSoundfont(id))?;
        let removed = state.fonts.remove(idx);
        info!(id, path = %removed.path.display(), "Unloaded soundfont");
        if idx == 0 {
            state.rebuild(self.shared.sample_rate)?;
        }
        Ok(())
    }

    fn status(&self) -> EngineStatus {
        let state = self.shared.state.lock();
        EngineStatus {
            active_voices: state.active_voices(),
            cpu_load: f32::from_bits(self.shared.load_bits.load(Ordering::Acquire)),
            sample_rate: self.shared.sample_rate,
            buffer_size: self.shared.buffer_size,
            soundfonts: state.fonts.len(),
        }
    }

    fn release(&self) {
        let mut state = self.shared.state.lock();
        state.synth = None;
        state.fonts.clear();
        state.held = [0; MIDI_CHANNELS as usize];
    }
}

/// Pulls audio from a [`SoundFontEngine`]. Owned by the audio callback.
pub struct Renderer {
    shared: Arc<Shared>,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl Renderer {
    /// Renders one block into split stereo buffers of equal length.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let started = Instant::now();
        let gain = f32::from_bits(self.shared.gain_bits.load(Ordering::Acquire));
        {
            let mut state = self.shared.state.lock();
            match state.synth.as_mut() {
                Some(synth) => {
                    synth.set_master_volume(gain);
                    synth.render(left, right);
                }
                None => {
                    left.fill(0.0);
                    right.fill(0.0);
                }
            }
        }
        self.record_load(started, left.len());
    }

    /// Renders into an interleaved buffer with `channels` channels.
    ///
    /// Channels beyond the first two are filled with silence; a mono output
    /// gets the average of left and right.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        let frames = out.len() / channels;
        if self.left.len() < frames {
            self.left.resize(frames, 0.0);
            self.right.resize(frames, 0.0);
        }

        let mut left = std::mem::take(&mut self.left);
        let mut right = std::mem::take(&mut self.right);
        self.render(&mut left[..frames], &mut right[..frames]);

        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            if channels == 1 {
                frame[0] = 0.5 * (left[i] + right[i]);
                continue;
            }
            frame[0] = left[i];
            frame[1] = right[i];
            for sample in &mut frame[2..] {
                *sample = 0.0;
            }
        }
        self.left = left;
        self.right = right;
    }

    fn record_load(&self, started: Instant, frames: usize) {
        if frames == 0 {
            return;
        }
        let budget = frames as f32 / self.shared.sample_rate as f32;
        let sample = started.elapsed().as_secs_f32() / budget;
        let previous = f32::from_bits(self.shared.load_bits.load(Ordering::Relaxed));
        let smoothed = previous + LOAD_SMOOTHING * (sample - previous);
        self.shared
            .load_bits
            .store(smoothed.to_bits(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SoundFontEngine {
        SoundFontEngine::new(48_000, 256, &SynthConfig::default()).unwrap()
    }

    #[test]
    fn rejects_unsupported_sample_rate() {
        let err = SoundFontEngine::new(8_000, 256, &SynthConfig::default()).err();
        assert!(matches!(err, Some(EngineError::Settings(_))));
    }

    #[test]
    fn events_need_a_soundfont() {
        let engine = engine();
        assert!(matches!(
            engine.note_on(0, 60, 100),
            Err(EngineError::NoSoundfont)
        ));
        assert!(matches!(engine.all_notes_off(3), Err(EngineError::NoSoundfont)));
    }

    #[test]
    fn load_reports_missing_and_invalid_files() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            engine.load_soundfont(&dir.path().join("absent.sf2")),
            Err(EngineError::Io { .. })
        ));

        let junk = dir.path().join("junk.sf2");
        std::fs::write(&junk, b"this is not a riff file").unwrap();
        assert!(matches!(
            engine.load_soundfont(&junk),
            Err(EngineError::InvalidSoundfont { .. })
        ));
        assert_eq!(engine.status().soundfonts, 0);
    }

    #[test]
    fn gain_is_visible_to_renderer() {
        let engine = engine();
        engine.set_gain(1.25).unwrap();
        assert_eq!(engine.gain(), 1.25);
    }

    #[test]
    fn renderer_outputs_silence_without_soundfont() {
        let engine = engine();
        let mut renderer = engine.renderer();
        let mut out = vec![1.0f32; 512 * 2];
        renderer.render_interleaved(&mut out, 2);
        assert!(out.iter().all(|s| *s == 0.0));

        let mut mono = vec![1.0f32; 100];
        renderer.render_interleaved(&mut mono, 1);
        assert!(mono.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn status_reports_configuration() {
        let engine = engine();
        let status = engine.status();
        assert_eq!(status.sample_rate, 48_000);
        assert_eq!(status.buffer_size, 256);
        assert_eq!(status.active_voices, 0);
    }

    #[test]
    fn unknown_soundfont_id() {
        assert!(matches!(
            engine().unload_soundfont(42),
            Err(EngineError::UnknownSoundfont(42))
        ));
    }

    #[test]
    fn send_level_scale() {
        assert_eq!(send_level(false, 5.0, 10.0), 0);
        assert_eq!(send_level(true, 10.0, 10.0), 127);
        assert_eq!(send_level(true, 0.0, 10.0), 0);
        assert_eq!(send_level(true, 20.0, 10.0), 127);
    }

    #[test]
    fn effects_always_built() {
        let settings = synthesizer_settings(44_100, 64);
        assert!(settings.enable_reverb_and_chorus);
        assert_eq!(settings.maximum_polyphony, 64);
        assert_eq!(settings.sample_rate, 44_100);
    }

    #[test]
    fn effect_toggles_keep_engine_usable() {
        let engine = engine();
        let mut chorus = ChorusSettings::default();
        chorus.enabled = !chorus.enabled;
        engine.set_chorus(&chorus).unwrap();
        let mut reverb = ReverbSettings::default();
        reverb.enabled = !reverb.enabled;
        engine.set_reverb(&reverb).unwrap();
        assert_eq!(engine.shared.state.lock().chorus, chorus);
        assert_eq!(engine.shared.state.lock().reverb, reverb);
    }

    #[test]
    fn polyphony_is_clamped() {
        assert_eq!(clamp_polyphony(4096), 256);
        assert_eq!(clamp_polyphony(2), 8);
        assert_eq!(clamp_polyphony(64), 64);
    }
}
