//! Audio and MIDI backend selection with one fallback retry.

use std::fmt::Display;

use serde::Serialize;
use tracing::{info, warn};

use super::probe::Availability;
use crate::config::{AudioBackend, MidiBackend};
use crate::error::{DaemonError, Result};

/// Auto-detection priority for audio output. User-observable; keep the order.
pub const AUDIO_PRIORITY: [AudioBackend; 4] = [
    AudioBackend::Jack,
    AudioBackend::PipeWire,
    AudioBackend::PulseAudio,
    AudioBackend::Alsa,
];

/// How a backend came to be chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOrigin {
    /// Named in the configuration.
    Explicit,
    /// Picked from the availability snapshot.
    AutoDetected,
    /// Retried after the first choice failed to open.
    Fallback,
}

/// A resolved backend and how it was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Selection<B> {
    pub backend: B,
    pub origin: SelectionOrigin,
}

/// The active audio and MIDI pair. Only replaced by a full restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SelectedDrivers {
    pub audio: Selection<AudioBackend>,
    pub midi: Selection<MidiBackend>,
}

/// Selection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState<B> {
    Unselected,
    Probing,
    Selected(B),
    Activating(B),
    FallbackSelected(B),
    Activated(B),
    Failed,
}

/// Picks the audio backend for `requested`.
///
/// An explicit choice is returned verbatim. `Auto` takes the first available
/// backend in [`AUDIO_PRIORITY`].
pub fn resolve_audio(
    requested: AudioBackend,
    snapshot: &Availability,
) -> Selection<AudioBackend> {
    if requested != AudioBackend::Auto {
        return Selection {
            backend: requested,
            origin: SelectionOrigin::Explicit,
        };
    }
    let backend = AUDIO_PRIORITY
        .iter()
        .copied()
        .find(|b| snapshot.audio(*b))
        .unwrap_or(AudioBackend::Alsa);
    Selection {
        backend,
        origin: SelectionOrigin::AutoDetected,
    }
}

/// Picks the MIDI transport for `requested`.
///
/// `Auto` prefers the sequencer when the host has one.
pub fn resolve_midi(requested: MidiBackend, snapshot: &Availability) -> Selection<MidiBackend> {
    if requested != MidiBackend::Auto {
        return Selection {
            backend: requested,
            origin: SelectionOrigin::Explicit,
        };
    }
    let backend = if snapshot.sequencer {
        MidiBackend::Sequencer
    } else {
        MidiBackend::Raw
    };
    Selection {
        backend,
        origin: SelectionOrigin::AutoDetected,
    }
}

/// Transport retried when `failed` cannot be opened.
pub fn midi_fallback(failed: MidiBackend) -> MidiBackend {
    match failed {
        MidiBackend::Sequencer => MidiBackend::Raw,
        MidiBackend::Raw | MidiBackend::Jack | MidiBackend::Auto => MidiBackend::Sequencer,
    }
}

/// Drives selection and activation, recording every state it passes through.
#[derive(Debug, Default)]
pub struct DriverSelector {
    audio_trace: Vec<SelectionState<AudioBackend>>,
    midi_trace: Vec<SelectionState<MidiBackend>>,
}

impl DriverSelector {
    pub fn new() -> Self {
        Self {
            audio_trace: vec![SelectionState::Unselected],
            midi_trace: vec![SelectionState::Unselected],
        }
    }

    /// States the audio selection passed through, oldest first.
    pub fn audio_trace(&self) -> &[SelectionState<AudioBackend>] {
        &self.audio_trace
    }

    pub fn midi_trace(&self) -> &[SelectionState<MidiBackend>] {
        &self.midi_trace
    }

    pub fn audio_state(&self) -> SelectionState<AudioBackend> {
        self.audio_trace
            .last()
            .copied()
            .unwrap_or(SelectionState::Unselected)
    }

    pub fn midi_state(&self) -> SelectionState<MidiBackend> {
        self.midi_trace
            .last()
            .copied()
            .unwrap_or(SelectionState::Unselected)
    }

    /// Selects and opens an audio backend.
    ///
    /// `open` is called with the selected backend; if that fails and the
    /// backend was not raw ALSA, it is called once more with ALSA. A second
    /// failure is `AUDIO_INIT_FAILED`.
    pub fn activate_audio<T, E, F>(
        &mut self,
        requested: AudioBackend,
        snapshot: &Availability,
        mut open: F,
    ) -> Result<(T, Selection<AudioBackend>)>
    where
        E: Display,
        F: FnMut(AudioBackend) -> std::result::Result<T, E>,
    {
        if requested == AudioBackend::Auto {
            self.audio_trace.push(SelectionState::Probing);
        }
        let selection = resolve_audio(requested, snapshot);
        self.audio_trace.push(SelectionState::Selected(selection.backend));
        info!(backend = %selection.backend, origin = ?selection.origin, "Selected audio backend");

        self.audio_trace.push(SelectionState::Activating(selection.backend));
        let first_error = match open(selection.backend) {
            Ok(handle) => {
                self.audio_trace.push(SelectionState::Activated(selection.backend));
                return Ok((handle, selection));
            }
            Err(e) => e.to_string(),
        };

        if selection.backend == AudioBackend::Alsa {
            self.audio_trace.push(SelectionState::Failed);
            return Err(DaemonError::audio_init_failed(format!(
                "{}: {}",
                selection.backend, first_error
            )));
        }

        warn!(
            backend = %selection.backend,
            error = %first_error,
            "Audio backend failed to open, falling back to alsa"
        );
        let fallback = AudioBackend::Alsa;
        self.audio_trace.push(SelectionState::FallbackSelected(fallback));
        self.audio_trace.push(SelectionState::Activating(fallback));
        match open(fallback) {
            Ok(handle) => {
                self.audio_trace.push(SelectionState::Activated(fallback));
                Ok((
                    handle,
                    Selection {
                        backend: fallback,
                        origin: SelectionOrigin::Fallback,
                    },
                ))
            }
            Err(e) => {
                self.audio_trace.push(SelectionState::Failed);
                Err(DaemonError::audio_init_failed(format!(
                    "{}: {}; {}: {}",
                    selection.backend, first_error, fallback, e
                )))
            }
        }
    }

    /// Selects and opens a MIDI transport, retrying once with the other one.
    /// A second failure is `MIDI_INIT_FAILED`.
    pub fn activate_midi<T, E, F>(
        &mut self,
        requested: MidiBackend,
        snapshot: &Availability,
        mut open: F,
    ) -> Result<(T, Selection<MidiBackend>)>
    where
        E: Display,
        F: FnMut(MidiBackend) -> std::result::Result<T, E>,
    {
        if requested == MidiBackend::Auto {
            self.midi_trace.push(SelectionState::Probing);
        }
        let selection = resolve_midi(requested, snapshot);
        self.midi_trace.push(SelectionState::Selected(selection.backend));
        info!(backend = %selection.backend, origin = ?selection.origin, "Selected MIDI backend");

        self.midi_trace.push(SelectionState::Activating(selection.backend));
        let first_error = match open(selection.backend) {
            Ok(handle) => {
                self.midi_trace.push(SelectionState::Activated(selection.backend));
                return Ok((handle, selection));
            }
            Err(e) => e.to_string(),
        };

        let fallback = midi_fallback(selection.backend);
        warn!(
            backend = %selection.backend,
            error = %first_error,
            fallback = %fallback,
            "MIDI transport failed to open, retrying"
        );
        self.midi_trace.push(SelectionState::FallbackSelected(fallback));
        self.midi_trace.push(SelectionState::Activating(fallback));
        match open(fallback) {
            Ok(handle) => {
                self.midi_trace.push(SelectionState::Activated(fallback));
                Ok((
                    handle,
                    Selection {
                        backend: fallback,
                        origin: SelectionOrigin::Fallback,
                    },
                ))
            }
            Err(e) => {
                self.midi_trace.push(SelectionState::Failed);
                Err(DaemonError::midi_init_failed(format!(
                    "{}: {}; {}: {}",
                    selection.backend, first_error, fallback, e
                )))
            }
        }
    }
}
