//! Daemon configuration module.
//!
//! Holds the typed [`Configuration`] aggregate and the operations on it:
//! - [`Configuration::load_defaults`]: documented defaults plus soundfont discovery
//! - [`load_file`] / [`load`]: layered `key = value` files
//! - [`validate`]: re-clamping and the soundfont availability check
//! - [`Configuration::merge`]: applies the hot-reloadable subset of a fresh configuration

mod file;
mod validate;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::types::{SoundfontEntry, SoundfontList};

pub use file::{
    load, load_file, user_config_path, ConfigFileError, ConfigSources, FileLoad, LoadSummary,
    CONFIG_FILE_NAME, SYSTEM_CONFIG_PATH,
};
pub use validate::{fit_sample_rate, validate};

/// Inclusive bounds and compiled-in default of one numeric setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound<T> {
    pub min: T,
    pub max: T,
    pub default: T,
}

impl<T: PartialOrd + Copy> Bound<T> {
    pub const fn new(min: T, max: T, default: T) -> Self {
        Self { min, max, default }
    }

    /// Returns true if `value` lies inside the bounds. NaN never does.
    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Bounds of every clamped setting.
pub mod limits {
    use super::Bound;

    pub const SAMPLE_RATE: Bound<u32> = Bound::new(8000, 192_000, 48_000);
    pub const BUFFER_SIZE: Bound<u32> = Bound::new(64, 8192, 512);
    pub const AUDIO_PERIODS: Bound<u32> = Bound::new(2, 8, 2);
    pub const POLYPHONY: Bound<u32> = Bound::new(16, 4096, 256);
    pub const GAIN: Bound<f32> = Bound::new(0.0, 2.0, 0.5);

    pub const CHORUS_LEVEL: Bound<f32> = Bound::new(0.0, 10.0, 1.2);
    pub const CHORUS_VOICES: Bound<u32> = Bound::new(0, 99, 3);
    pub const CHORUS_SPEED: Bound<f32> = Bound::new(0.1, 5.0, 0.3);
    pub const CHORUS_DEPTH: Bound<f32> = Bound::new(0.0, 256.0, 8.0);

    pub const REVERB_LEVEL: Bound<f32> = Bound::new(0.0, 10.0, 0.9);
    pub const REVERB_ROOM_SIZE: Bound<f32> = Bound::new(0.0, 1.0, 0.2);
    pub const REVERB_DAMPING: Bound<f32> = Bound::new(0.0, 1.0, 0.0);
    pub const REVERB_WIDTH: Bound<f32> = Bound::new(0.0, 100.0, 0.5);

    pub const BANK_OFFSET: Bound<i32> = Bound::new(0, 16383, 0);
}

/// Client name announced to MIDI transports when none is configured.
pub const DEFAULT_CLIENT_NAME: &str = "MidiSynth Daemon";

/// Conventional soundfont install locations, searched in order.
pub const DEFAULT_SOUNDFONT_PATHS: &[&str] = &[
    "/usr/share/soundfonts/FluidR3_GM.sf2",
    "/usr/share/soundfonts/FluidR3_GM_GS.sf2",
    "/usr/share/soundfonts/GeneralUser_GS.sf2",
    "/usr/share/soundfonts/default.sf2",
    "/usr/share/sounds/sf2/FluidR3_GM.sf2",
    "/usr/share/sounds/sf2/FluidR3_GM_GS.sf2",
    "/usr/share/sounds/sf2/GeneralUser_GS.sf2",
    "/usr/share/sounds/sf2/default.sf2",
];

/// Audio output backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioBackend {
    /// Probe the host and pick the first available backend.
    /// Priority: JACK > PipeWire > PulseAudio > ALSA
    #[default]
    Auto,
    Jack,
    PipeWire,
    PulseAudio,
    /// Raw ALSA output, always available.
    Alsa,
}

impl AudioBackend {
    /// Returns the string representation of the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioBackend::Auto => "auto",
            AudioBackend::Jack => "jack",
            AudioBackend::PipeWire => "pipewire",
            AudioBackend::PulseAudio => "pulseaudio",
            AudioBackend::Alsa => "alsa",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(AudioBackend::Auto),
            "jack" => Some(AudioBackend::Jack),
            "pipewire" => Some(AudioBackend::PipeWire),
            "pulseaudio" | "pulse" => Some(AudioBackend::PulseAudio),
            "alsa" => Some(AudioBackend::Alsa),
            _ => None,
        }
    }
}

impl std::fmt::Display for AudioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// MIDI input transport selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MidiBackend {
    /// Sequencer when the host has one, otherwise the port transport.
    #[default]
    Auto,
    /// ALSA sequencer client with pre-parsed events.
    Sequencer,
    /// Port-based transport delivering raw wire bytes.
    Raw,
    /// Port-based transport hosted by a JACK server.
    Jack,
}

impl MidiBackend {
    /// Returns the string representation of the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            MidiBackend::Auto => "auto",
            MidiBackend::Sequencer => "sequencer",
            MidiBackend::Raw => "raw",
            MidiBackend::Jack => "jack",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(MidiBackend::Auto),
            "sequencer" | "alsa_seq" | "seq" => Some(MidiBackend::Sequencer),
            "raw" | "alsa_raw" | "rawmidi" => Some(MidiBackend::Raw),
            "jack" => Some(MidiBackend::Jack),
            _ => None,
        }
    }
}

impl std::fmt::Display for MidiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// Returns the string representation of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    /// Parses a level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audio output settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioConfig {
    pub backend: AudioBackend,
    /// Device name passed to the output backend. Empty selects the default device.
    pub device: String,
    pub sample_rate: u32,
    /// Frames per period.
    pub buffer_size: u32,
    /// Number of periods in the device buffer.
    pub periods: u32,
    pub realtime_priority: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: AudioBackend::Auto,
            device: String::new(),
            sample_rate: limits::SAMPLE_RATE.default,
            buffer_size: limits::BUFFER_SIZE.default,
            periods: limits::AUDIO_PERIODS.default,
            realtime_priority: true,
        }
    }
}

/// MIDI input settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiConfig {
    pub backend: MidiBackend,
    pub device: String,
    /// Name shown to other MIDI clients.
    pub client_name: String,
    /// Connect to every existing MIDI source on open and refresh.
    pub autoconnect: bool,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            backend: MidiBackend::Auto,
            device: String::new(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            autoconnect: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChorusSettings {
    pub enabled: bool,
    pub level: f32,
    pub voices: u32,
    /// Modulation speed in Hz.
    pub speed: f32,
    /// Modulation depth in milliseconds.
    pub depth: f32,
}

impl Default for ChorusSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: limits::CHORUS_LEVEL.default,
            voices: limits::CHORUS_VOICES.default,
            speed: limits::CHORUS_SPEED.default,
            depth: limits::CHORUS_DEPTH.default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReverbSettings {
    pub enabled: bool,
    pub level: f32,
    pub room_size: f32,
    pub damping: f32,
    pub width: f32,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: limits::REVERB_LEVEL.default,
            room_size: limits::REVERB_ROOM_SIZE.default,
            damping: limits::REVERB_DAMPING.default,
            width: limits::REVERB_WIDTH.default,
        }
    }
}

/// Synthesis engine settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthConfig {
    pub polyphony: u32,
    /// Master gain, 0.0 to 2.0.
    pub gain: f32,
    pub chorus: ChorusSettings,
    pub reverb: ReverbSettings,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            polyphony: limits::POLYPHONY.default,
            gain: limits::GAIN.default,
            chorus: ChorusSettings::default(),
            reverb: ReverbSettings::default(),
        }
    }
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaemonSettings {
    pub log_level: LogLevel,
    /// Account to run as. Empty keeps the invoking user.
    pub user: String,
    pub group: String,
    pub realtime_scheduling: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            user: String::new(),
            group: String::new(),
            realtime_scheduling: true,
        }
    }
}

/// The complete daemon configuration.
///
/// Built once at startup from defaults and file layers. After startup only
/// the reload path writes to it, and only through [`Configuration::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Configuration {
    pub audio: AudioConfig,
    pub midi: MidiConfig,
    pub synth: SynthConfig,
    pub soundfonts: SoundfontList,
    pub daemon: DaemonSettings,
}

/// Which hot-reloadable groups a [`Configuration::merge`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HotChanges {
    pub gain: bool,
    pub chorus: bool,
    pub reverb: bool,
    pub log_level: bool,
}

impl HotChanges {
    pub fn any(&self) -> bool {
        self.gain || self.chorus || self.reverb || self.log_level
    }
}

/// Settings given on the command line, applied after every file layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub log_level: Option<LogLevel>,
    pub soundfont: Option<PathBuf>,
    pub no_realtime: bool,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl Configuration {
    /// Documented defaults with the first readable conventional soundfont enabled.
    pub fn load_defaults() -> Self {
        Self::load_defaults_with(DEFAULT_SOUNDFONT_PATHS.iter().map(Path::new))
    }

    /// Documented defaults, enabling the first readable path from `candidates`.
    pub fn load_defaults_with<'a, I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut cfg = Self::default();
        if let Some(found) = candidates
            .into_iter()
            .find(|p| crate::types::is_readable(p))
        {
            tracing::debug!(path = %found.display(), "Found default soundfont");
            // An empty list always has room.
            let _ = cfg.soundfonts.push(SoundfontEntry::new(found));
        }
        cfg
    }

    /// Applies command-line overrides on top of the loaded file layers.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level {
            self.daemon.log_level = level;
        }
        if let Some(path) = &overrides.soundfont {
            self.soundfonts = SoundfontList::new();
            let _ = self.soundfonts.push(SoundfontEntry::new(path));
        }
        if overrides.no_realtime {
            self.audio.realtime_priority = false;
            self.daemon.realtime_scheduling = false;
        }
        if let Some(user) = &overrides.user {
            self.daemon.user = user.clone();
        }
        if let Some(group) = &overrides.group {
            self.daemon.group = group.clone();
        }
    }

    /// Copies the hot-reloadable fields (gain, chorus, reverb, log level)
    /// from `overlay` into `self` and reports which groups changed.
    ///
    /// `overlay` is expected to be a fully validated configuration, so every
    /// one of its hot fields counts as explicitly set. Backend selection,
    /// devices and the soundfont list are never touched.
    pub fn merge(&mut self, overlay: &Configuration) -> HotChanges {
        let changes = HotChanges {
            gain: self.synth.gain.to_bits() != overlay.synth.gain.to_bits(),
            chorus: self.synth.chorus != overlay.synth.chorus,
            reverb: self.synth.reverb != overlay.synth.reverb,
            log_level: self.daemon.log_level != overlay.daemon.log_level,
        };

        self.synth.gain = overlay.synth.gain;
        self.synth.chorus = overlay.synth.chorus;
        self.synth.reverb = overlay.synth.reverb;
        self.daemon.log_level = overlay.daemon.log_level;

        changes
    }
}

impl std::fmt::Display for Configuration {
    /// Renders the configuration in config-file format.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&file::render(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_inside_bounds() {
        let cfg = Configuration::default();
        assert!(limits::SAMPLE_RATE.contains(cfg.audio.sample_rate));
        assert!(limits::BUFFER_SIZE.contains(cfg.audio.buffer_size));
        assert!(limits::AUDIO_PERIODS.contains(cfg.audio.periods));
        assert!(limits::POLYPHONY.contains(cfg.synth.polyphony));
        assert!(limits::GAIN.contains(cfg.synth.gain));
        assert_eq!(cfg.midi.client_name, DEFAULT_CLIENT_NAME);
        assert_eq!(cfg.daemon.log_level, LogLevel::Info);
        assert!(cfg.soundfonts.is_empty());
    }

    #[test]
    fn defaults_pick_first_readable_soundfont() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.sf2");
        let second = dir.path().join("second.sf2");
        let third = dir.path().join("third.sf2");
        std::fs::write(&second, b"RIFF").unwrap();
        std::fs::write(&third, b"RIFF").unwrap();

        let cfg = Configuration::load_defaults_with([
            missing.as_path(),
            second.as_path(),
            third.as_path(),
        ]);
        assert_eq!(cfg.soundfonts.len(), 1);
        assert_eq!(cfg.soundfonts.primary().unwrap().path, second);
    }

    #[test]
    fn defaults_leave_list_empty_when_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.sf2");
        let cfg = Configuration::load_defaults_with([missing.as_path()]);
        assert!(cfg.soundfonts.is_empty());
    }

    #[test]
    fn backend_parse_accepts_aliases() {
        assert_eq!(AudioBackend::parse("PULSE"), Some(AudioBackend::PulseAudio));
        assert_eq!(AudioBackend::parse("pipewire"), Some(AudioBackend::PipeWire));
        assert_eq!(AudioBackend::parse("oss"), None);
        assert_eq!(MidiBackend::parse("alsa_seq"), Some(MidiBackend::Sequencer));
        assert_eq!(MidiBackend::parse("rawmidi"), Some(MidiBackend::Raw));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
    }

    #[test]
    fn merge_copies_only_hot_fields() {
        let mut live = Configuration::default();
        live.soundfonts.push(SoundfontEntry::new("/live.sf2")).unwrap();

        let mut fresh = Configuration::default();
        fresh.synth.gain = 1.0;
        fresh.synth.reverb.room_size = 0.8;
        fresh.daemon.log_level = LogLevel::Debug;
        fresh.audio.backend = AudioBackend::Jack;
        fresh.audio.sample_rate = 44_100;
        fresh.synth.polyphony = 64;

        let changes = live.merge(&fresh);
        assert!(changes.gain && changes.reverb && changes.log_level);
        assert!(!changes.chorus);

        assert_eq!(live.synth.gain, 1.0);
        assert_eq!(live.synth.reverb.room_size, 0.8);
        assert_eq!(live.daemon.log_level, LogLevel::Debug);
        assert_eq!(live.audio.backend, AudioBackend::Auto);
        assert_eq!(live.audio.sample_rate, 48_000);
        assert_eq!(live.synth.polyphony, 256);
        assert_eq!(live.soundfonts.len(), 1);
        assert_eq!(
            live.soundfonts.iter().next().unwrap().path,
            PathBuf::from("/live.sf2")
        );
    }

    #[test]
    fn merge_of_equal_config_changes_nothing() {
        let mut live = Configuration::default();
        let fresh = live.clone();
        assert!(!live.merge(&fresh).any());
    }

    #[test]
    fn overrides_replace_soundfonts_and_level() {
        let mut cfg = Configuration::default();
        cfg.soundfonts.push(SoundfontEntry::new("/a.sf2")).unwrap();
        cfg.soundfonts.push(SoundfontEntry::new("/b.sf2")).unwrap();

        cfg.apply_overrides(&Overrides {
            log_level: Some(LogLevel::Debug),
            soundfont: Some(PathBuf::from("/c.sf2")),
            no_realtime: true,
            user: Some("audio".into()),
            group: None,
        });

        assert_eq!(cfg.soundfonts.len(), 1);
        assert_eq!(cfg.soundfonts.iter().next().unwrap().path, PathBuf::from("/c.sf2"));
        assert_eq!(cfg.daemon.log_level, LogLevel::Debug);
        assert!(!cfg.audio.realtime_priority);
        assert!(!cfg.daemon.realtime_scheduling);
        assert_eq!(cfg.daemon.user, "audio");
        assert_eq!(cfg.daemon.group, "");
    }
}
