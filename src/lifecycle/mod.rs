//! Daemon lifecycle.
//!
//! [`Controller`] owns everything that lives for the whole run: the live
//! configuration, the synthesis engine, the audio stream, the MIDI transport
//! and its delivery thread. It is driven by one control loop that turns
//! signal flags into reload, status, panic and shutdown work.

mod signals;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

pub use signals::{Requests, SignalFlags, SignalGuard};

use crate::audio::{AudioOutput, AudioParams, AudioSource, AudioStream};
use crate::backend::{Availability, DriverSelector, SelectedDrivers};
use crate::config::{self, ConfigSources, Configuration, HotChanges, MidiBackend, Overrides};
use crate::engine::{EngineStatus, SynthEngine};
use crate::error::{DaemonError, Result};
use crate::logging::LogHandle;
use crate::midi::{EventRouter, MidiPump, MidiTransport, RouterStats, TransportError};

/// Control loop period. Bounds reload and shutdown latency.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// How long teardown waits for the MIDI delivery thread.
pub const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Starting,
    Running,
    ReloadPending,
    ShuttingDown,
    Stopped,
}

impl DaemonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Starting => "starting",
            DaemonState::Running => "running",
            DaemonState::ReloadPending => "reload_pending",
            DaemonState::ShuttingDown => "shutting_down",
            DaemonState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    /// A component failed after startup.
    Failure,
}

impl ExitStatus {
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
        }
    }
}

/// Builds a MIDI transport for a resolved backend and device filter.
pub type TransportFactory<'a> = Box<
    dyn FnMut(MidiBackend, &str) -> std::result::Result<Box<dyn MidiTransport>, TransportError>
        + 'a,
>;

/// Builds a fresh sample source for each audio open attempt.
pub type SourceFactory<'a> = Box<dyn FnMut() -> Box<dyn AudioSource> + 'a>;

/// Everything [`Controller::start`] needs besides the configuration.
pub struct Startup<'a> {
    /// Layers re-read on reload.
    pub sources: ConfigSources,
    /// Command-line settings re-applied on reload.
    pub overrides: Overrides,
    pub log: LogHandle,
    pub signals: SignalFlags,
    /// Availability snapshot taken before startup.
    pub snapshot: Availability,
    pub engine: Arc<dyn SynthEngine>,
    pub audio: &'a dyn AudioOutput,
    pub audio_source: SourceFactory<'a>,
    pub transports: TransportFactory<'a>,
}

/// The running daemon.
pub struct Controller {
    state: DaemonState,
    exit: ExitStatus,
    config: Configuration,
    sources: ConfigSources,
    overrides: Overrides,
    log: LogHandle,
    signals: SignalFlags,
    engine: Arc<dyn SynthEngine>,
    router: Arc<EventRouter>,
    drivers: SelectedDrivers,
    audio: Option<Box<dyn AudioStream>>,
    midi: Option<Box<dyn MidiTransport>>,
    pump: Option<MidiPump>,
    _signal_guard: SignalGuard,
}

impl Controller {
    /// Brings the daemon up from a validated configuration.
    ///
    /// Order: signal handlers, synthesizer settings, audio output,
    /// soundfonts, controller reset, MIDI input, delivery thread. Anything
    /// opened before a fatal failure is closed again before returning.
    pub fn start(config: Configuration, startup: Startup<'_>) -> Result<Self> {
        let Startup {
            sources,
            overrides,
            log,
            signals,
            snapshot,
            engine,
            audio,
            mut audio_source,
            mut transports,
        } = startup;
        info!(state = %DaemonState::Starting, "Starting midisynthd");

        let signal_guard = signals.install().map_err(DaemonError::signal_setup_failed)?;
        let mut selector = DriverSelector::new();

        apply_synth_settings(engine.as_ref(), &config);

        let params = AudioParams::from_config(&config.audio);
        let (stream, audio_selection) =
            selector.activate_audio(config.audio.backend, &snapshot, |b| {
                audio.open(b, &params, audio_source())
            })?;

        let loaded = load_soundfonts(engine.as_ref(), &config);
        if loaded == 0 {
            engine.release();
            stream.close();
            return Err(DaemonError::synth_init_failed("no soundfont could be loaded"));
        }

        let router = Arc::new(EventRouter::new(Arc::clone(&engine)));
        let failures = router.reset_controllers();
        if failures > 0 {
            warn!(failures, "Controller reset incomplete");
        }

        let midi = &config.midi;
        let opened = selector.activate_midi(midi.backend, &snapshot, |b| {
            let mut transport = transports(b, &midi.device)?;
            let events = transport.open(&midi.client_name, midi.autoconnect)?;
            Ok::<_, TransportError>((transport, events))
        });
        let ((mut transport, events), midi_selection) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                engine.release();
                stream.close();
                return Err(e);
            }
        };

        let realtime = config.daemon.realtime_scheduling;
        let pump = match MidiPump::spawn(events, Arc::clone(&router), realtime) {
            Ok(pump) => pump,
            Err(e) => {
                let _ = transport.close();
                engine.release();
                stream.close();
                return Err(DaemonError::midi_init_failed(format!(
                    "cannot start delivery thread: {}",
                    e
                )));
            }
        };

        let drivers = SelectedDrivers {
            audio: audio_selection,
            midi: midi_selection,
        };
        if !config.daemon.user.is_empty() || !config.daemon.group.is_empty() {
            info!(
                user = %config.daemon.user,
                group = %config.daemon.group,
                "Privilege dropping is left to the service manager"
            );
        }
        info!(
            audio = %drivers.audio.backend,
            midi = %drivers.midi.backend,
            soundfonts = loaded,
            sample_rate = config.audio.sample_rate,
            buffer_size = config.audio.buffer_size,
            "midisynthd running"
        );

        Ok(Self {
            state: DaemonState::Running,
            exit: ExitStatus::Success,
            config,
            sources,
            overrides,
            log,
            signals,
            engine,
            router,
            drivers,
            audio: Some(stream),
            midi: Some(transport),
            pump: Some(pump),
            _signal_guard: signal_guard,
        })
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn exit_status(&self) -> ExitStatus {
        self.exit
    }

    pub fn drivers(&self) -> SelectedDrivers {
        self.drivers
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Flags shared with the signal handlers. Clones can request work from
    /// other threads.
    pub fn signals(&self) -> &SignalFlags {
        &self.signals
    }

    /// Runs the control loop until shutdown.
    pub fn run(mut self) -> ExitStatus {
        let ticker = crossbeam_channel::tick(TICK_INTERVAL);
        while self.step() {
            let _ = ticker.recv();
        }
        self.exit
    }

    /// Handles whatever is pending, once. Returns false once stopped.
    pub fn step(&mut self) -> bool {
        if self.state == DaemonState::Stopped {
            return false;
        }

        let requests = self.signals.take();
        if requests.terminate {
            info!("Termination requested");
            self.shutdown();
            return false;
        }
        if requests.reload {
            let _ = self.reload();
        }
        if requests.status {
            self.report_status();
        }
        if requests.panic {
            self.panic();
        }

        if !self.is_healthy() {
            error!("MIDI delivery thread stopped unexpectedly");
            self.exit = ExitStatus::Failure;
            self.shutdown();
            return false;
        }
        true
    }

    /// Re-reads the configuration and applies the hot-reloadable fields.
    ///
    /// On error the live configuration is unchanged. Backends are never
    /// re-selected.
    pub fn reload(&mut self) -> Result<HotChanges> {
        self.state = DaemonState::ReloadPending;
        let result = self.load_scratch();
        self.state = DaemonState::Running;

        let scratch = match result {
            Ok(scratch) => scratch,
            Err(e) => {
                warn!(error = %e, "Reload rejected, keeping current configuration");
                return Err(e);
            }
        };

        let changes = self.config.merge(&scratch);
        self.apply_hot(&changes);

        if self.config.midi.autoconnect {
            if let Some(transport) = self.midi.as_mut() {
                match transport.refresh_connections() {
                    Ok(0) => {}
                    Ok(n) => info!(connections = n, "Connected new MIDI sources"),
                    Err(e) => warn!(error = %e, "MIDI connection refresh failed"),
                }
            }
        }

        info!(
            gain = changes.gain,
            chorus = changes.chorus,
            reverb = changes.reverb,
            log_level = changes.log_level,
            "Configuration reloaded"
        );
        Ok(changes)
    }

    fn load_scratch(&self) -> Result<Configuration> {
        let mut scratch = Configuration::load_defaults();
        let summary = config::load(&mut scratch, &self.sources)?;
        scratch.apply_overrides(&self.overrides);
        let fixes = config::validate(&mut scratch)?;
        debug!(
            layers = summary.loaded.len(),
            fixes = summary.fixes + fixes,
            "Reload candidate validated"
        );
        Ok(scratch)
    }

    fn apply_hot(&self, changes: &HotChanges) {
        let synth = &self.config.synth;
        if changes.gain {
            if let Err(e) = self.engine.set_gain(synth.gain) {
                warn!(error = %e, "Could not apply gain");
            }
        }
        if changes.chorus {
            if let Err(e) = self.engine.set_chorus(&synth.chorus) {
                warn!(error = %e, "Could not apply chorus settings");
            }
        }
        if changes.reverb {
            if let Err(e) = self.engine.set_reverb(&synth.reverb) {
                warn!(error = %e, "Could not apply reverb settings");
            }
        }
        if changes.log_level {
            if let Err(e) = self.log.set_level(self.config.daemon.log_level) {
                warn!(error = %e, "Could not change log level");
            }
        }
    }

    /// Logs one status line and returns what it reported.
    pub fn report_status(&self) -> (EngineStatus, RouterStats) {
        let status = self.engine.status();
        let stats = self.router.stats();
        info!(
            state = %self.state,
            audio = %self.drivers.audio.backend,
            midi = %self.drivers.midi.backend,
            active_voices = status.active_voices,
            cpu_load = f64::from(status.cpu_load),
            sample_rate = status.sample_rate,
            buffer_size = status.buffer_size,
            soundfonts = status.soundfonts,
            routed = stats.routed,
            dropped = stats.dropped,
            "Status"
        );
        (status, stats)
    }

    /// Releases every note on every channel.
    pub fn panic(&self) -> usize {
        let failures = self.router.all_notes_off();
        info!(failures, "All notes off");
        failures
    }

    fn is_healthy(&self) -> bool {
        !self.pump.as_ref().is_some_and(|p| p.is_finished())
    }

    /// Tears everything down: MIDI input, delivery thread, engine, audio.
    pub fn shutdown(&mut self) {
        if matches!(self.state, DaemonState::ShuttingDown | DaemonState::Stopped) {
            return;
        }
        self.state = DaemonState::ShuttingDown;
        info!("Shutting down");

        self.router.stop_accepting();
        let mut silence = false;

        if let Some(mut transport) = self.midi.take() {
            if let Err(e) = transport.close() {
                warn!(error = %e, "MIDI transport did not close cleanly");
                silence = true;
            }
        }
        if let Some(pump) = self.pump.take() {
            match pump.join_timeout(PUMP_JOIN_TIMEOUT) {
                Some(stats) => debug!(?stats, "MIDI delivery thread joined"),
                None => {
                    warn!("MIDI delivery thread did not stop in time");
                    silence = true;
                }
            }
        }
        if silence {
            self.router.all_notes_off();
        }

        self.engine.release();
        if let Some(stream) = self.audio.take() {
            stream.close();
        }

        self.state = DaemonState::Stopped;
        info!(exit = self.exit.code(), "Stopped");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn apply_synth_settings(engine: &dyn SynthEngine, cfg: &Configuration) {
    let synth = &cfg.synth;
    let results = [
        ("polyphony", engine.set_polyphony(synth.polyphony)),
        ("gain", engine.set_gain(synth.gain)),
        ("chorus", engine.set_chorus(&synth.chorus)),
        ("reverb", engine.set_reverb(&synth.reverb)),
    ];
    for (setting, result) in results {
        if let Err(e) = result {
            warn!(setting, error = %e, "Synthesizer rejected setting");
        }
    }
}

/// Loads every enabled soundfont. Returns how many loaded.
fn load_soundfonts(engine: &dyn SynthEngine, cfg: &Configuration) -> usize {
    let mut loaded = 0;
    for entry in cfg.soundfonts.enabled() {
        match engine.load_soundfont(&entry.path) {
            Ok(id) => {
                info!(id, path = %entry.path.display(), "Loaded soundfont");
                loaded += 1;
            }
            Err(e) => warn!(path = %entry.path.display(), error = %e, "Could not load soundfont"),
        }
    }
    loaded
}
