//! midisynthd: system MIDI synthesizer daemon.
//!
//! Loads and validates the configuration, probes the host, brings up audio
//! output, the synthesizer and MIDI input, then runs the control loop until
//! a termination signal arrives.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use midisynthd::audio::{AudioSource, CpalOutput};
use midisynthd::backend::Prober;
use midisynthd::cli::Cli;
use midisynthd::config::{self, ConfigSources, Configuration, LogLevel, MidiBackend};
use midisynthd::engine::{SoundFontEngine, ENGINE_SAMPLE_RATES};
use midisynthd::error::{DaemonError, Result};
use midisynthd::lifecycle::{Controller, SignalFlags, Startup};
use midisynthd::logging::{self, LogHandle};
use midisynthd::midi;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    if cli.version {
        println!("{}", Cli::version_line());
        return ExitCode::SUCCESS;
    }

    let log = logging::init(cli.log_level().unwrap_or(LogLevel::Info), cli.ansi_logs());
    match run(&cli, log) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(code = %e.code, "{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, log: LogHandle) -> Result<u8> {
    let sources = ConfigSources::from_cli(cli.config.as_deref());
    let overrides = cli.to_overrides();

    let mut cfg = Configuration::load_defaults();
    let summary = config::load(&mut cfg, &sources)?;
    cfg.apply_overrides(&overrides);
    let fixes = summary.fixes
        + config::validate(&mut cfg)?
        + config::fit_sample_rate(&mut cfg, ENGINE_SAMPLE_RATES);
    if let Err(e) = log.set_level(cfg.daemon.log_level) {
        error!(error = %e, "Could not apply configured log level");
    }
    info!(
        layers = summary.loaded.len(),
        fixes,
        soundfonts = cfg.soundfonts.enabled_count(),
        "Configuration valid"
    );

    if cli.test_config {
        return match print_config(&cfg, cli.json) {
            Ok(()) => Ok(0),
            Err(e) => {
                error!("{:#}", e);
                Ok(1)
            }
        };
    }

    let snapshot = Prober::new().probe();
    info!(?snapshot, "Probed backends");

    let engine = SoundFontEngine::new(cfg.audio.sample_rate, cfg.audio.buffer_size, &cfg.synth)
        .map_err(|e| DaemonError::synth_init_failed(e.to_string()))?;
    let render_engine = engine.clone();
    let output = CpalOutput::new();

    let controller = Controller::start(
        cfg,
        Startup {
            sources,
            overrides,
            log,
            signals: SignalFlags::new(),
            snapshot,
            engine: Arc::new(engine),
            audio: &output,
            audio_source: Box::new(move || {
                Box::new(render_engine.renderer()) as Box<dyn AudioSource>
            }),
            transports: Box::new(|backend: MidiBackend, device: &str| {
                midi::transport_for(backend, device)
            }),
        },
    )?;

    Ok(controller.run().code())
}

fn print_config(cfg: &Configuration, json: bool) -> anyhow::Result<()> {
    let rendered = if json {
        serde_json::to_string_pretty(cfg).context("Cannot serialize configuration")?
    } else {
        cfg.to_string()
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", rendered.trim_end()).context("Cannot write configuration")?;
    Ok(())
}
