//! Error types for midisynthd.
//!
//! [`DaemonError`] carries the fatal startup conditions that decide the
//! process exit code. Component-local failures that never leave their
//! component (engine calls, audio opens, transports, dispatch) have their
//! own small error enums next to the code that raises them.

use std::fmt;

/// Error codes for fatal startup failures.
///
/// Each code names the resource that could not be brought up, so the single
/// log line emitted on exit tells the operator what to fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No soundfont entry resolved to a readable file.
    /// Trigger: every configured path is missing, unreadable or disabled.
    NoSoundfont,

    /// An explicitly requested configuration file could not be read.
    /// Trigger: `--config` points at a missing file, or a layer exists but
    /// cannot be opened (permissions).
    ConfigUnreadable,

    /// Neither the selected nor the fallback audio backend could be opened.
    AudioInitFailed,

    /// No MIDI transport could be activated.
    MidiInitFailed,

    /// The synthesis engine could not be created or loaded no soundfont.
    SynthInitFailed,

    /// Process signal handlers could not be installed.
    SignalSetupFailed,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoSoundfont => "NO_SOUNDFONT",
            ErrorCode::ConfigUnreadable => "CONFIG_UNREADABLE",
            ErrorCode::AudioInitFailed => "AUDIO_INIT_FAILED",
            ErrorCode::MidiInitFailed => "MIDI_INIT_FAILED",
            ErrorCode::SynthInitFailed => "SYNTH_INIT_FAILED",
            ErrorCode::SignalSetupFailed => "SIGNAL_SETUP_FAILED",
        }
    }

    /// Returns a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::NoSoundfont => "No readable soundfont is configured",
            ErrorCode::ConfigUnreadable => "Configuration file could not be read",
            ErrorCode::AudioInitFailed => "No audio output backend could be opened",
            ErrorCode::MidiInitFailed => "No MIDI input transport could be opened",
            ErrorCode::SynthInitFailed => "Synthesis engine failed to initialize",
            ErrorCode::SignalSetupFailed => "Signal handlers could not be installed",
        }
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::NoSoundfont => {
                "Install a General MIDI soundfont (e.g. FluidR3_GM.sf2) or point \
                 `soundfont = /path/to/file.sf2` at a readable file"
            }
            ErrorCode::ConfigUnreadable => {
                "Check that the file exists and is readable by the daemon user"
            }
            ErrorCode::AudioInitFailed => {
                "Check that the audio device is not held by another program, or set \
                 `audio_driver = alsa` and `audio_device` explicitly"
            }
            ErrorCode::MidiInitFailed => {
                "Check that the ALSA sequencer is loaded (`modprobe snd-seq`) and \
                 the daemon user may open /dev/snd/seq"
            }
            ErrorCode::SynthInitFailed => {
                "Check the sample rate and that the soundfont file is a valid SF2"
            }
            ErrorCode::SignalSetupFailed => "Restart the daemon; this is not expected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for fatal daemon failures.
#[derive(Debug)]
pub struct DaemonError {
    /// The error code identifying the failed resource.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DaemonError {
    /// Creates a new DaemonError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new DaemonError with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a NO_SOUNDFONT error.
    pub fn no_soundfont(candidates: usize) -> Self {
        Self::new(
            ErrorCode::NoSoundfont,
            format!(
                "No soundfont resolved to a readable file ({} configured)",
                candidates
            ),
        )
    }

    /// Creates a CONFIG_UNREADABLE error.
    pub fn config_unreadable(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::with_source(
            ErrorCode::ConfigUnreadable,
            format!("Cannot read configuration file {}", path.display()),
            source,
        )
    }

    /// Creates an AUDIO_INIT_FAILED error.
    pub fn audio_init_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::AudioInitFailed,
            format!("Audio output failed: {}", reason.into()),
        )
    }

    /// Creates a MIDI_INIT_FAILED error.
    pub fn midi_init_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::MidiInitFailed,
            format!("MIDI input failed: {}", reason.into()),
        )
    }

    /// Creates a SYNTH_INIT_FAILED error.
    pub fn synth_init_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::SynthInitFailed,
            format!("Synthesizer failed: {}", reason.into()),
        )
    }

    /// Creates a SIGNAL_SETUP_FAILED error.
    pub fn signal_setup_failed(source: std::io::Error) -> Self {
        Self::with_source(
            ErrorCode::SignalSetupFailed,
            "Failed to install signal handlers",
            source,
        )
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Recovery: {}",
            self.code,
            self.message,
            self.code.recovery_hint()
        )
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias using DaemonError.
pub type Result<T> = std::result::Result<T, DaemonError>;
