#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tempfile::NamedTempFile;

use midisynthd::audio::{AudioError, AudioOutput, AudioParams, AudioSource, AudioStream};
use midisynthd::backend::Availability;
use midisynthd::config::{
    AudioBackend, ChorusSettings, ConfigSources, Configuration, LogLevel, MidiBackend, Overrides,
    ReverbSettings,
};
use midisynthd::engine::{EngineError, EngineStatus, SoundfontId, SynthEngine};
use midisynthd::lifecycle::{Controller, SignalFlags, Startup};
use midisynthd::logging::LogHandle;
use midisynthd::midi::{EventStream, MidiTransport, TransportError, TransportMessage};
use midisynthd::types::{SoundfontEntry, MIDI_CHANNELS, PITCH_BEND_CENTER};

/// Per-channel controller state as a GM synth would hold it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub volume: u8,
    pub pan: u8,
    pub expression: u8,
    pub sustain: u8,
    pub pitch_bend: u16,
    pub program: u8,
}

impl Default for ChannelState {
    /// Deliberately off-default so a reset is observable.
    fn default() -> Self {
        Self {
            volume: 7,
            pan: 7,
            expression: 7,
            sustain: 127,
            pitch_bend: 0,
            program: 42,
        }
    }
}

/// Engine double that tracks channel state and counts calls.
#[derive(Debug, Default)]
pub struct StateEngine {
    pub channels: Mutex<[ChannelState; MIDI_CHANNELS as usize]>,
    pub note_ons: Mutex<Vec<(u8, u8, u8)>>,
    pub gains: Mutex<Vec<f32>>,
    pub loads: Mutex<Vec<std::path::PathBuf>>,
    pub released: Mutex<bool>,
}

impl StateEngine {
    pub fn note_on_count(&self) -> usize {
        self.note_ons.lock().len()
    }

    pub fn channel(&self, ch: u8) -> ChannelState {
        self.channels.lock()[ch as usize]
    }
}

impl SynthEngine for StateEngine {
    fn note_on(&self, channel: u8, note: u8, velocity: u8) -> Result<(), EngineError> {
        self.note_ons.lock().push((channel, note, velocity));
        Ok(())
    }
    fn note_off(&self, _: u8, _: u8, _: u8) -> Result<(), EngineError> {
        Ok(())
    }
    fn control_change(&self, channel: u8, controller: u8, value: u8) -> Result<(), EngineError> {
        let mut channels = self.channels.lock();
        let state = &mut channels[channel as usize];
        match controller {
            7 => state.volume = value,
            10 => state.pan = value,
            11 => state.expression = value,
            64 => state.sustain = value,
            _ => {}
        }
        Ok(())
    }
    fn program_change(&self, channel: u8, program: u8) -> Result<(), EngineError> {
        self.channels.lock()[channel as usize].program = program;
        Ok(())
    }
    fn pitch_bend(&self, channel: u8, value: u16) -> Result<(), EngineError> {
        self.channels.lock()[channel as usize].pitch_bend = value;
        Ok(())
    }
    fn channel_pressure(&self, _: u8, _: u8) -> Result<(), EngineError> {
        Ok(())
    }
    fn key_pressure(&self, _: u8, _: u8, _: u8) -> Result<(), EngineError> {
        Ok(())
    }
    fn all_notes_off(&self, _: u8) -> Result<(), EngineError> {
        Ok(())
    }
    fn all_sound_off(&self, _: u8) -> Result<(), EngineError> {
        Ok(())
    }
    fn set_gain(&self, gain: f32) -> Result<(), EngineError> {
        self.gains.lock().push(gain);
        Ok(())
    }
    fn set_chorus(&self, _: &ChorusSettings) -> Result<(), EngineError> {
        Ok(())
    }
    fn set_reverb(&self, _: &ReverbSettings) -> Result<(), EngineError> {
        Ok(())
    }
    fn set_polyphony(&self, _: u32) -> Result<(), EngineError> {
        Ok(())
    }
    fn load_soundfont(&self, path: &Path) -> Result<SoundfontId, EngineError> {
        let mut loads = self.loads.lock();
        loads.push(path.to_path_buf());
        Ok(loads.len() as SoundfontId)
    }
    fn unload_soundfont(&self, _: SoundfontId) -> Result<(), EngineError> {
        Ok(())
    }
    fn status(&self) -> EngineStatus {
        EngineStatus {
            active_voices: 0,
            cpu_load: 0.0,
            sample_rate: 48_000,
            buffer_size: 512,
            soundfonts: self.loads.lock().len(),
        }
    }
    fn release(&self) {
        *self.released.lock() = true;
    }
}

/// Audio output that refuses the backends in `broken`.
pub struct FakeAudio {
    pub broken: Vec<AudioBackend>,
    pub opened: Arc<Mutex<Vec<AudioBackend>>>,
}

struct FakeStream {
    backend: AudioBackend,
}

impl AudioStream for FakeStream {
    fn backend(&self) -> AudioBackend {
        self.backend
    }
    fn close(self: Box<Self>) {}
}

impl AudioOutput for FakeAudio {
    fn open(
        &self,
        backend: AudioBackend,
        _params: &AudioParams,
        _source: Box<dyn AudioSource>,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        if self.broken.contains(&backend) {
            return Err(AudioError::Stream {
                backend,
                reason: "device busy".into(),
            });
        }
        self.opened.lock().push(backend);
        Ok(Box::new(FakeStream { backend }))
    }
}

pub struct Silence;

impl AudioSource for Silence {
    fn render(&mut self, out: &mut [f32], _channels: usize) {
        out.fill(0.0);
    }
}

/// Transport that hands its sender to the test.
pub struct FakeTransport {
    pub sender: Arc<Mutex<Option<Sender<TransportMessage>>>>,
}

impl MidiTransport for FakeTransport {
    fn name(&self) -> &'static str {
        "fake"
    }
    fn open(
        &mut self,
        _client_name: &str,
        _autoconnect: bool,
    ) -> Result<EventStream, TransportError> {
        let (tx, stream) = EventStream::channel();
        *self.sender.lock() = Some(tx);
        Ok(stream)
    }
    fn refresh_connections(&mut self) -> Result<usize, TransportError> {
        Ok(0)
    }
    fn close(&mut self) -> Result<(), TransportError> {
        self.sender.lock().take();
        Ok(())
    }
}

/// A running controller wired to fakes.
pub struct TestDaemon {
    pub controller: Controller,
    pub engine: Arc<StateEngine>,
    pub sender: Sender<TransportMessage>,
    pub opened_audio: Arc<Mutex<Vec<AudioBackend>>>,
}

pub fn start_daemon(
    config: Configuration,
    sources: ConfigSources,
    snapshot: Availability,
    broken_audio: Vec<AudioBackend>,
) -> TestDaemon {
    let engine = Arc::new(StateEngine::default());
    let opened_audio = Arc::new(Mutex::new(Vec::new()));
    let audio = FakeAudio {
        broken: broken_audio,
        opened: Arc::clone(&opened_audio),
    };
    let slot = Arc::new(Mutex::new(None));
    let transport_slot = Arc::clone(&slot);

    let controller = Controller::start(
        config,
        Startup {
            sources,
            overrides: Overrides::default(),
            log: LogHandle::detached(LogLevel::Info),
            signals: SignalFlags::new(),
            snapshot,
            engine: engine.clone(),
            audio: &audio,
            audio_source: Box::new(|| Box::new(Silence) as Box<dyn AudioSource>),
            transports: Box::new(move |_: MidiBackend, _: &str| {
                Ok(Box::new(FakeTransport {
                    sender: Arc::clone(&transport_slot),
                }) as Box<dyn MidiTransport>)
            }),
        },
    )
    .unwrap();

    let sender = slot.lock().clone().unwrap();
    TestDaemon {
        controller,
        engine,
        sender,
        opened_audio,
    }
}

/// A readable file standing in for an SF2.
pub fn fake_soundfont() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".sf2").tempfile().unwrap();
    file.write_all(b"RIFF").unwrap();
    file
}

pub fn config_with(soundfont: &Path) -> Configuration {
    let mut cfg = Configuration::default();
    cfg.soundfonts.push(SoundfontEntry::new(soundfont)).unwrap();
    cfg
}

pub fn write_config(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

pub const CENTER: u16 = PITCH_BEND_CENTER;
