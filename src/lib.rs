//! midisynthd: system MIDI synthesizer daemon.
//!
//! This library holds the daemon's control plane: configuration, backend
//! detection and selection, MIDI event normalization and routing, and the
//! lifecycle controller that ties them to a synthesis engine and an audio
//! output.
//!
//! # Modules
//!
//! - [`config`]: layered configuration files, validation and hot reload merge
//! - [`backend`]: availability probing and driver selection with fallback
//! - [`midi`]: transports, normalization, routing and the delivery thread
//! - [`engine`]: synthesis capability and its SoundFont implementation
//! - [`audio`]: audio output capability and its cpal implementation
//! - [`lifecycle`]: startup, signal handling, reload and teardown
//! - [`realtime`]: thread priority for the audio and delivery threads
//! - [`types`]: canonical MIDI events and the bounded soundfont list
//! - [`error`]: fatal startup error codes
//!
//! # Example
//!
//! ```rust,ignore
//! use midisynthd::config::{self, ConfigSources, Configuration};
//!
//! let mut cfg = Configuration::load_defaults();
//! config::load(&mut cfg, &ConfigSources::standard())?;
//! let fixes = config::validate(&mut cfg)?;
//! println!("{} values corrected\n{}", fixes, cfg);
//! ```

pub mod audio;
pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod midi;
pub mod realtime;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use config::{Configuration, HotChanges, Overrides};
pub use error::{DaemonError, ErrorCode, Result};
pub use types::{MidiEvent, SoundfontEntry, SoundfontList};
