//! `key = value` configuration files and the layered load.

use std::fmt::{Display, Write as _};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::{limits, AudioBackend, Bound, Configuration, LogLevel, MidiBackend};
use crate::error::{DaemonError, Result};
use crate::types::SoundfontEntry;

/// System-wide configuration layer.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/midisynthd.conf";

/// File name of the per-user layer inside the user config directory.
pub const CONFIG_FILE_NAME: &str = "midisynthd.conf";

/// Returns the per-user configuration path, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Error opening a configuration file that exists.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of loading one file layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLoad {
    /// The file does not exist; the configuration is unchanged.
    Missing,
    /// The file was applied. `fixes` counts values replaced by defaults.
    Loaded { fixes: usize },
}

/// Ordered configuration layers, later layers overriding earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSources {
    layers: Vec<PathBuf>,
    explicit: bool,
}

impl ConfigSources {
    /// The system layer followed by the per-user layer.
    pub fn standard() -> Self {
        let mut layers = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
        layers.extend(user_config_path());
        Self {
            layers,
            explicit: false,
        }
    }

    /// A single file named on the command line. It must exist.
    pub fn explicit(path: impl Into<PathBuf>) -> Self {
        Self {
            layers: vec![path.into()],
            explicit: true,
        }
    }

    /// Arbitrary optional layers, applied in order.
    pub fn layered<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            layers: paths.into_iter().map(Into::into).collect(),
            explicit: false,
        }
    }

    /// `--config` if given, the standard layers otherwise.
    pub fn from_cli(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::explicit(p),
            None => Self::standard(),
        }
    }

    pub fn layers(&self) -> &[PathBuf] {
        &self.layers
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }
}

/// What [`load`] applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Layers that existed and were applied, in order.
    pub loaded: Vec<PathBuf>,
    /// Values replaced by defaults across all layers.
    pub fixes: usize,
    /// Standard layers that exist but could not be read.
    pub skipped: usize,
}

/// Applies every layer of `sources` to `cfg` in order.
///
/// Missing standard layers are ignored and unreadable ones are skipped with a
/// warning. An explicit layer that is missing or unreadable is fatal.
pub fn load(cfg: &mut Configuration, sources: &ConfigSources) -> Result<LoadSummary> {
    let mut summary = LoadSummary::default();

    for path in sources.layers() {
        match load_file(cfg, path) {
            Ok(FileLoad::Loaded { fixes }) => {
                info!(path = %path.display(), fixes, "Loaded configuration");
                summary.loaded.push(path.clone());
                summary.fixes += fixes;
            }
            Ok(FileLoad::Missing) if sources.is_explicit() => {
                return Err(DaemonError::config_unreadable(
                    path,
                    io::Error::new(io::ErrorKind::NotFound, "file does not exist"),
                ));
            }
            Ok(FileLoad::Missing) => {
                debug!(path = %path.display(), "Configuration layer not present");
            }
            Err(ConfigFileError::Unreadable { path, source }) => {
                if sources.is_explicit() {
                    return Err(DaemonError::config_unreadable(&path, source));
                }
                warn!(
                    path = %path.display(),
                    error = %source,
                    "Skipping unreadable configuration layer"
                );
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

/// Applies one configuration file to `cfg`.
///
/// Only a file that exists but cannot be read is an error. Unknown keys and
/// lines without `=` are ignored; bad values fall back to the key's default
/// and are counted.
pub fn load_file(
    cfg: &mut Configuration,
    path: &Path,
) -> std::result::Result<FileLoad, ConfigFileError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FileLoad::Missing),
        Err(source) => {
            return Err(ConfigFileError::Unreadable {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let text = String::from_utf8_lossy(&bytes);

    let mut layer = Layer {
        cfg,
        path,
        replaced_soundfonts: false,
        fixes: 0,
    };
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            debug!(path = %path.display(), line = idx + 1, "Ignoring line without '='");
            continue;
        };
        layer.apply(idx + 1, &key.trim().to_lowercase(), value.trim());
    }

    Ok(FileLoad::Loaded {
        fixes: layer.fixes,
    })
}

/// Parsing state for one file layer.
struct Layer<'a> {
    cfg: &'a mut Configuration,
    path: &'a Path,
    /// First `soundfont` line of a layer replaces the inherited list.
    replaced_soundfonts: bool,
    fixes: usize,
}

impl Layer<'_> {
    fn apply(&mut self, line: usize, key: &str, value: &str) {
        match key {
            "log_level" => {
                self.cfg.daemon.log_level =
                    self.choice(line, key, value, LogLevel::parse, LogLevel::default())
            }
            "audio_driver" => {
                self.cfg.audio.backend =
                    self.choice(line, key, value, AudioBackend::parse, AudioBackend::default())
            }
            "audio_device" => self.cfg.audio.device = value.to_string(),
            "sample_rate" => {
                self.cfg.audio.sample_rate = self.bounded(line, key, value, limits::SAMPLE_RATE)
            }
            "buffer_size" => {
                self.cfg.audio.buffer_size = self.bounded(line, key, value, limits::BUFFER_SIZE)
            }
            "audio_periods" => {
                self.cfg.audio.periods = self.bounded(line, key, value, limits::AUDIO_PERIODS)
            }
            "realtime_priority" => {
                self.cfg.audio.realtime_priority = self.flag(line, key, value, true)
            }
            "midi_driver" => {
                self.cfg.midi.backend =
                    self.choice(line, key, value, MidiBackend::parse, MidiBackend::default())
            }
            "midi_device" => self.cfg.midi.device = value.to_string(),
            "client_name" => self.cfg.midi.client_name = value.to_string(),
            "midi_autoconnect" => self.cfg.midi.autoconnect = self.flag(line, key, value, true),
            "polyphony" => {
                self.cfg.synth.polyphony = self.bounded(line, key, value, limits::POLYPHONY)
            }
            "gain" => self.cfg.synth.gain = self.bounded(line, key, value, limits::GAIN),
            "chorus_enabled" => self.cfg.synth.chorus.enabled = self.flag(line, key, value, true),
            "chorus_level" => {
                self.cfg.synth.chorus.level = self.bounded(line, key, value, limits::CHORUS_LEVEL)
            }
            "chorus_voices" | "chorus_nr" => {
                self.cfg.synth.chorus.voices =
                    self.bounded(line, key, value, limits::CHORUS_VOICES)
            }
            "chorus_speed" => {
                self.cfg.synth.chorus.speed = self.bounded(line, key, value, limits::CHORUS_SPEED)
            }
            "chorus_depth" => {
                self.cfg.synth.chorus.depth = self.bounded(line, key, value, limits::CHORUS_DEPTH)
            }
            "reverb_enabled" => self.cfg.synth.reverb.enabled = self.flag(line, key, value, true),
            "reverb_level" => {
                self.cfg.synth.reverb.level = self.bounded(line, key, value, limits::REVERB_LEVEL)
            }
            "reverb_roomsize" => {
                self.cfg.synth.reverb.room_size =
                    self.bounded(line, key, value, limits::REVERB_ROOM_SIZE)
            }
            "reverb_damping" => {
                self.cfg.synth.reverb.damping =
                    self.bounded(line, key, value, limits::REVERB_DAMPING)
            }
            "reverb_width" => {
                self.cfg.synth.reverb.width = self.bounded(line, key, value, limits::REVERB_WIDTH)
            }
            "soundfont" | "soundfont_path" => self.soundfont(line, key, value),
            "soundfont_enabled" => {
                let enabled = self.flag(line, key, value, true);
                self.with_last_soundfont(line, key, |entry| entry.enabled = enabled);
            }
            "soundfont_bank_offset" => {
                let offset = self.bounded(line, key, value, limits::BANK_OFFSET);
                self.with_last_soundfont(line, key, |entry| entry.bank_offset = offset);
            }
            "realtime_scheduling" => {
                self.cfg.daemon.realtime_scheduling = self.flag(line, key, value, true)
            }
            "user" => self.cfg.daemon.user = value.to_string(),
            "group" => self.cfg.daemon.group = value.to_string(),
            _ => debug!(path = %self.path.display(), line, key, "Ignoring unknown key"),
        }
    }

    fn soundfont(&mut self, line: usize, key: &str, value: &str) {
        if value.is_empty() {
            self.reject(line, key, value, "skipped");
            return;
        }
        if !self.replaced_soundfonts {
            self.cfg.soundfonts.clear();
            self.replaced_soundfonts = true;
        }
        if self.cfg.soundfonts.push(SoundfontEntry::new(value)).is_err() {
            self.reject(line, key, value, "skipped (list full)");
        }
    }

    fn with_last_soundfont(
        &mut self,
        line: usize,
        key: &str,
        f: impl FnOnce(&mut SoundfontEntry),
    ) {
        // Only entries declared in this layer may be modified.
        if self.replaced_soundfonts {
            if let Some(entry) = self.cfg.soundfonts.last_mut() {
                f(entry);
                return;
            }
        }
        self.reject(line, key, "", "ignored (no preceding soundfont)");
    }

    fn bounded<T>(&mut self, line: usize, key: &str, value: &str, bound: Bound<T>) -> T
    where
        T: FromStr + PartialOrd + Copy + Display,
    {
        match value.parse::<T>() {
            Ok(v) if bound.contains(v) => v,
            _ => {
                self.reject(line, key, value, bound.default);
                bound.default
            }
        }
    }

    fn flag(&mut self, line: usize, key: &str, value: &str, default: bool) -> bool {
        match parse_bool(value) {
            Some(b) => b,
            None => {
                self.reject(line, key, value, default);
                default
            }
        }
    }

    fn choice<T: Display + Copy>(
        &mut self,
        line: usize,
        key: &str,
        value: &str,
        parse: fn(&str) -> Option<T>,
        default: T,
    ) -> T {
        match parse(value) {
            Some(v) => v,
            None => {
                self.reject(line, key, value, default);
                default
            }
        }
    }

    fn reject(&mut self, line: usize, key: &str, value: &str, replacement: impl Display) {
        warn!(
            path = %self.path.display(),
            line,
            key,
            old = value,
            new = %replacement,
            "Invalid configuration value"
        );
        self.fixes += 1;
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Renders `cfg` in the file format read by [`load_file`].
///
/// An empty soundfont list renders as a commented placeholder. Reading such a
/// file keeps whatever soundfonts the earlier layers or defaults provided.
pub(crate) fn render(cfg: &Configuration) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_config(&mut out, cfg);
    out
}

fn write_config(out: &mut String, cfg: &Configuration) -> std::fmt::Result {
    let a = &cfg.audio;
    let m = &cfg.midi;
    let s = &cfg.synth;
    let d = &cfg.daemon;

    writeln!(out, "# midisynthd configuration")?;
    writeln!(out, "log_level = {}", d.log_level)?;
    writeln!(out)?;
    writeln!(out, "# Audio")?;
    writeln!(out, "audio_driver = {}", a.backend)?;
    writeln!(out, "audio_device = {}", a.device)?;
    writeln!(out, "sample_rate = {}", a.sample_rate)?;
    writeln!(out, "buffer_size = {}", a.buffer_size)?;
    writeln!(out, "audio_periods = {}", a.periods)?;
    writeln!(out, "realtime_priority = {}", a.realtime_priority)?;
    writeln!(out)?;
    writeln!(out, "# MIDI")?;
    writeln!(out, "midi_driver = {}", m.backend)?;
    writeln!(out, "midi_device = {}", m.device)?;
    writeln!(out, "client_name = {}", m.client_name)?;
    writeln!(out, "midi_autoconnect = {}", m.autoconnect)?;
    writeln!(out)?;
    writeln!(out, "# Synthesis")?;
    writeln!(out, "polyphony = {}", s.polyphony)?;
    writeln!(out, "gain = {}", s.gain)?;
    writeln!(out, "chorus_enabled = {}", s.chorus.enabled)?;
    writeln!(out, "chorus_level = {}", s.chorus.level)?;
    writeln!(out, "chorus_voices = {}", s.chorus.voices)?;
    writeln!(out, "chorus_speed = {}", s.chorus.speed)?;
    writeln!(out, "chorus_depth = {}", s.chorus.depth)?;
    writeln!(out, "reverb_enabled = {}", s.reverb.enabled)?;
    writeln!(out, "reverb_level = {}", s.reverb.level)?;
    writeln!(out, "reverb_roomsize = {}", s.reverb.room_size)?;
    writeln!(out, "reverb_damping = {}", s.reverb.damping)?;
    writeln!(out, "reverb_width = {}", s.reverb.width)?;
    writeln!(out)?;
    writeln!(out, "# Soundfonts")?;
    if cfg.soundfonts.is_empty() {
        writeln!(out, "# soundfont = /path/to/soundfont.sf2")?;
    }
    for entry in &cfg.soundfonts {
        writeln!(out, "soundfont = {}", entry.path.display())?;
        if !entry.enabled {
            writeln!(out, "soundfont_enabled = false")?;
        }
        if entry.bank_offset != 0 {
            writeln!(out, "soundfont_bank_offset = {}", entry.bank_offset)?;
        }
    }
    writeln!(out)?;
    writeln!(out, "# Daemon")?;
    writeln!(out, "realtime_scheduling = {}", d.realtime_scheduling)?;
    writeln!(out, "user = {}", d.user)?;
    writeln!(out, "group = {}", d.group)?;
    Ok(())
}
